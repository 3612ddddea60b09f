//! Test utilities for the display adapter driver
//!
//! Provides a scripted [`MockEngine`] implementing [`TransferEngine`], builders
//! for the descriptors and EDID blocks adapters return, and async helpers.
//!
//! # Example
//!
//! ```
//! use common::TransferEngine;
//! use common::test_utils::{MockDevice, MockEngine};
//! use protocol::BusAddress;
//!
//! let address = BusAddress::new(1, 4);
//! let mut engine = MockEngine::new();
//! engine.attach(address, MockDevice::adapter(0xB0, "SN0001"));
//!
//! assert_eq!(engine.vendor_product(address).unwrap().0, 0x17E9);
//! ```

use crate::engine::{EngineResult, TransferEngine};
use protocol::constants::{
    EDID_I2C_ADDRESS, REQUEST_CHANNEL, REQUEST_I2C_SUB_IO, REQUEST_STATUS, STATUS_RESPONSE_LEN,
};
use protocol::{
    BulkEndpoint, BusAddress, DeviceSummary, EDID_BLOCK_SIZE, SetupPacket, UsbError, VENDOR_ID,
};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Product id used by [`MockDevice::adapter`]
pub const MOCK_PRODUCT_ID: u16 = 0x0141;

/// Bulk OUT endpoint address used by [`MockDevice::adapter`]
pub const MOCK_BULK_OUT: u8 = 0x01;

/// Scripted responses of one attached device
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Status query response (truncated to the request length)
    pub status: Vec<u8>,
    /// Serial number as UTF-16 code units
    pub serial: Vec<u16>,
    /// Raw configuration descriptor
    pub config: Vec<u8>,
    /// Bytes returned by the I2C sub-reads
    pub edid: [u8; EDID_BLOCK_SIZE],
    /// (offset, status) at which the I2C read reports failure
    pub i2c_fail_at: Option<(u8, u8)>,
    pub fail_status: Option<UsbError>,
    pub fail_serial: Option<UsbError>,
    pub fail_config: Option<UsbError>,
    pub fail_channel: Option<UsbError>,
    pub fail_open_endpoint: Option<UsbError>,
}

impl MockDevice {
    /// A supported adapter with the given family byte and serial
    pub fn adapter(type_byte: u8, serial: &str) -> Self {
        Self {
            vendor_id: VENDOR_ID,
            product_id: MOCK_PRODUCT_ID,
            status: vec![0x00, 0x00, 0x00, type_byte, 0x00, 0x00],
            serial: serial.encode_utf16().collect(),
            config: vendor_config_descriptor(0, MOCK_BULK_OUT, 512),
            edid: sample_edid(),
            i2c_fail_at: None,
            fail_status: None,
            fail_serial: None,
            fail_config: None,
            fail_channel: None,
            fail_open_endpoint: None,
        }
    }

    /// A device from another vendor
    pub fn foreign(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            ..Self::adapter(0x00, "")
        }
    }
}

/// One transfer seen by the mock, in issue order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transfer {
    VendorProduct {
        address: BusAddress,
    },
    ControlIn {
        address: BusAddress,
        setup: SetupPacket,
        timeout: Duration,
    },
    ControlOut {
        address: BusAddress,
        setup: SetupPacket,
        data: Vec<u8>,
        timeout: Duration,
    },
    SerialString {
        address: BusAddress,
        lang_id: u16,
    },
    ConfigDescriptor {
        address: BusAddress,
    },
    OpenEndpoint {
        address: BusAddress,
        endpoint: BulkEndpoint,
    },
    Bulk {
        address: BusAddress,
        endpoint: u8,
        data: Vec<u8>,
        timeout: Duration,
    },
    ReleaseEndpoint {
        address: BusAddress,
        endpoint: BulkEndpoint,
    },
}

impl Transfer {
    pub fn is_bulk(&self) -> bool {
        matches!(self, Transfer::Bulk { .. })
    }

    /// Whether this is a control IN carrying `request`
    pub fn is_control_in(&self, request: u8) -> bool {
        matches!(self, Transfer::ControlIn { setup, .. } if setup.request == request)
    }
}

struct InFlight {
    remaining: usize,
    outcome: EngineResult<()>,
}

/// Scripted [`TransferEngine`]
///
/// Devices are attached per bus address. Every call is recorded so tests can
/// assert exact transfer sequences. A submitted bulk chunk stays busy for
/// `busy_cycles` calls to [`pump`](TransferEngine::pump).
#[derive(Default)]
pub struct MockEngine {
    devices: BTreeMap<BusAddress, MockDevice>,
    transfers: Vec<Transfer>,
    in_flight: HashMap<(BusAddress, u8), InFlight>,
    bulk_count: usize,
    pumps: usize,
    /// Pump cycles each bulk chunk stays in flight
    pub busy_cycles: usize,
    /// (chunk index, error) at which a bulk chunk completes with failure
    pub fail_bulk_at: Option<(usize, UsbError)>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, address: BusAddress, device: MockDevice) {
        self.devices.insert(address, device);
    }

    pub fn detach(&mut self, address: BusAddress) -> Option<MockDevice> {
        self.devices.remove(&address)
    }

    pub fn device_mut(&mut self, address: BusAddress) -> Option<&mut MockDevice> {
        self.devices.get_mut(&address)
    }

    pub fn transfers(&self) -> &[Transfer] {
        &self.transfers
    }

    pub fn clear_transfers(&mut self) {
        self.transfers.clear();
    }

    /// Payloads of every bulk chunk, in order
    pub fn bulk_payloads(&self) -> Vec<&[u8]> {
        self.transfers
            .iter()
            .filter_map(|t| match t {
                Transfer::Bulk { data, .. } => Some(data.as_slice()),
                _ => None,
            })
            .collect()
    }

    /// Number of I2C sub-reads issued
    pub fn i2c_reads(&self) -> usize {
        self.transfers
            .iter()
            .filter(|t| t.is_control_in(REQUEST_I2C_SUB_IO))
            .count()
    }

    pub fn pumps(&self) -> usize {
        self.pumps
    }

    fn device(&self, address: BusAddress) -> EngineResult<&MockDevice> {
        self.devices.get(&address).ok_or(UsbError::NoDevice)
    }
}

fn copy_into(buf: &mut [u8], src: &[u8]) -> usize {
    let n = buf.len().min(src.len());
    buf[..n].copy_from_slice(&src[..n]);
    n
}

impl TransferEngine for MockEngine {
    fn list_devices(&mut self) -> EngineResult<Vec<DeviceSummary>> {
        Ok(self
            .devices
            .iter()
            .map(|(address, d)| DeviceSummary {
                address: *address,
                vendor_id: d.vendor_id,
                product_id: d.product_id,
            })
            .collect())
    }

    fn vendor_product(&mut self, address: BusAddress) -> EngineResult<(u16, u16)> {
        self.transfers.push(Transfer::VendorProduct { address });
        let device = self.device(address)?;
        Ok((device.vendor_id, device.product_id))
    }

    fn control_in(
        &mut self,
        address: BusAddress,
        setup: SetupPacket,
        buf: &mut [u8],
        timeout: Duration,
    ) -> EngineResult<usize> {
        self.transfers.push(Transfer::ControlIn {
            address,
            setup,
            timeout,
        });
        let device = self.device(address)?;
        let limit = buf.len().min(setup.length as usize);
        let buf = &mut buf[..limit];

        match setup.request {
            REQUEST_STATUS => {
                if let Some(err) = &device.fail_status {
                    return Err(err.clone());
                }
                let len = device.status.len().min(STATUS_RESPONSE_LEN);
                Ok(copy_into(buf, &device.status[..len]))
            }
            REQUEST_I2C_SUB_IO if setup.index == EDID_I2C_ADDRESS => {
                let offset = (setup.value >> 8) as u8;
                let response = match device.i2c_fail_at {
                    Some((at, status)) if at == offset => [status, 0],
                    _ => [0, device.edid[offset as usize % EDID_BLOCK_SIZE]],
                };
                Ok(copy_into(buf, &response))
            }
            _ => Err(UsbError::Pipe),
        }
    }

    fn control_out(
        &mut self,
        address: BusAddress,
        setup: SetupPacket,
        data: &[u8],
        timeout: Duration,
    ) -> EngineResult<()> {
        self.transfers.push(Transfer::ControlOut {
            address,
            setup,
            data: data.to_vec(),
            timeout,
        });
        let device = self.device(address)?;
        match setup.request {
            REQUEST_CHANNEL => match &device.fail_channel {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            },
            _ => Err(UsbError::Pipe),
        }
    }

    fn serial_string_descriptor(
        &mut self,
        address: BusAddress,
        lang_id: u16,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> EngineResult<usize> {
        self.transfers
            .push(Transfer::SerialString { address, lang_id });
        let device = self.device(address)?;
        if let Some(err) = &device.fail_serial {
            return Err(err.clone());
        }
        Ok(copy_into(buf, &serial_descriptor(&device.serial)))
    }

    fn config_descriptor(
        &mut self,
        address: BusAddress,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> EngineResult<usize> {
        self.transfers.push(Transfer::ConfigDescriptor { address });
        let device = self.device(address)?;
        if let Some(err) = &device.fail_config {
            return Err(err.clone());
        }
        Ok(copy_into(buf, &device.config))
    }

    fn open_endpoint(&mut self, address: BusAddress, endpoint: BulkEndpoint) -> EngineResult<()> {
        self.transfers
            .push(Transfer::OpenEndpoint { address, endpoint });
        match &self.device(address)?.fail_open_endpoint {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn submit_bulk(
        &mut self,
        address: BusAddress,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> EngineResult<()> {
        self.transfers.push(Transfer::Bulk {
            address,
            endpoint,
            data: data.to_vec(),
            timeout,
        });
        self.device(address)?;

        let index = self.bulk_count;
        self.bulk_count += 1;
        let outcome = match &self.fail_bulk_at {
            Some((at, err)) if *at == index => Err(err.clone()),
            _ => Ok(()),
        };
        self.in_flight.insert(
            (address, endpoint),
            InFlight {
                remaining: self.busy_cycles,
                outcome,
            },
        );
        Ok(())
    }

    fn endpoint_busy(&mut self, address: BusAddress, endpoint: u8) -> EngineResult<bool> {
        let key = (address, endpoint);
        match self.in_flight.get(&key) {
            None => return Ok(false),
            Some(t) if t.remaining > 0 => return Ok(true),
            Some(_) => {}
        }
        match self.in_flight.remove(&key) {
            Some(t) => t.outcome.map(|_| false),
            None => Ok(false),
        }
    }

    fn pump(&mut self) {
        self.pumps += 1;
        for t in self.in_flight.values_mut() {
            t.remaining = t.remaining.saturating_sub(1);
        }
    }

    fn release_endpoint(&mut self, address: BusAddress, endpoint: BulkEndpoint) {
        self.transfers
            .push(Transfer::ReleaseEndpoint { address, endpoint });
        self.in_flight.remove(&(address, endpoint.address));
    }
}

/// Configuration descriptor with one vendor-specific interface holding a bulk
/// IN and a bulk OUT endpoint
pub fn vendor_config_descriptor(interface: u8, bulk_out: u8, max_packet: u16) -> Vec<u8> {
    let [mp_lo, mp_hi] = max_packet.to_le_bytes();
    let mut desc = vec![
        // Configuration descriptor
        0x09, // bLength
        0x02, // bDescriptorType (Configuration)
        0x00, 0x00, // wTotalLength (patched below)
        0x01, // bNumInterfaces
        0x01, // bConfigurationValue
        0x00, // iConfiguration
        0x80, // bmAttributes (Bus-powered)
        0xFA, // bMaxPower (500mA)
        // Interface descriptor
        0x09, // bLength
        0x04, // bDescriptorType (Interface)
        interface, // bInterfaceNumber
        0x00, // bAlternateSetting
        0x02, // bNumEndpoints
        0xFF, // bInterfaceClass (Vendor-specific)
        0x00, // bInterfaceSubClass
        0x00, // bInterfaceProtocol
        0x00, // iInterface
        // Endpoint descriptor
        0x07, // bLength
        0x05, // bDescriptorType (Endpoint)
        0x81, // bEndpointAddress (EP1 IN)
        0x02, // bmAttributes (Bulk)
        mp_lo, mp_hi, // wMaxPacketSize
        0x00, // bInterval
        // Endpoint descriptor
        0x07, // bLength
        0x05, // bDescriptorType (Endpoint)
        bulk_out, // bEndpointAddress (OUT)
        0x02, // bmAttributes (Bulk)
        mp_lo, mp_hi, // wMaxPacketSize
        0x00, // bInterval
    ];
    let total = desc.len() as u16;
    desc[2..4].copy_from_slice(&total.to_le_bytes());
    desc
}

/// String descriptor carrying `units` as UTF-16LE
pub fn serial_descriptor(units: &[u16]) -> Vec<u8> {
    let len = (2 + units.len() * 2).min(u8::MAX as usize);
    let mut desc = vec![len as u8, protocol::constants::DESC_STRING];
    desc.extend(units.iter().flat_map(|u| u.to_le_bytes()));
    desc.truncate(len);
    desc
}

/// A 128-byte base EDID block with a valid header and checksum
///
/// The first detailed timing descriptor is 1024x768 at 60 Hz (65 MHz pixel
/// clock, 1344x806 total).
pub fn sample_edid() -> [u8; EDID_BLOCK_SIZE] {
    let mut edid = [0u8; EDID_BLOCK_SIZE];
    edid[..8].copy_from_slice(&[0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00]);
    // manufacturer, product, serial, week/year
    edid[8..18].copy_from_slice(&[0x10, 0xAC, 0x34, 0x12, 0x01, 0x00, 0x00, 0x00, 0x01, 0x1E]);
    // EDID 1.3
    edid[18] = 0x01;
    edid[19] = 0x03;

    // Detailed timing descriptor 1
    edid[54..72].copy_from_slice(&[
        0x64, 0x19, // pixel clock 65.00 MHz in 10 kHz units
        0x00, // horizontal active, low 8 bits (1024)
        0x40, // horizontal blanking, low 8 bits (320)
        0x41, // active / blanking high nibbles
        0x00, // vertical active, low 8 bits (768)
        0x26, // vertical blanking, low 8 bits (38)
        0x30, // active / blanking high nibbles
        0x18, 0x88, 0x36, 0x00, // sync offsets and widths
        0x00, 0x00, 0x00, // image size
        0x00, 0x00, // borders
        0x18, // features
    ]);

    let sum = edid[..EDID_BLOCK_SIZE - 1]
        .iter()
        .fold(0u8, |acc, b| acc.wrapping_add(*b));
    edid[EDID_BLOCK_SIZE - 1] = 0u8.wrapping_sub(sum);
    edid
}

/// Timeout wrapper for async tests
///
/// Wraps an async operation with a timeout to prevent tests from hanging.
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{decode_string_descriptor, find_bulk_out};

    #[test]
    fn test_vendor_config_descriptor_parses() {
        let desc = vendor_config_descriptor(2, 0x03, 512);

        assert_eq!(desc.len(), 32);
        let ep = find_bulk_out(&desc).unwrap();
        assert_eq!(ep.interface, 2);
        assert_eq!(ep.address, 0x03);
        assert_eq!(ep.max_packet_size, 512);
    }

    #[test]
    fn test_serial_descriptor_round_trip() {
        let units: Vec<u16> = "SN42".encode_utf16().collect();
        let desc = serial_descriptor(&units);

        assert_eq!(desc[0], 10);
        assert_eq!(decode_string_descriptor(&desc).as_bytes(), b"SN42");
    }

    #[test]
    fn test_sample_edid_checksum() {
        let edid = sample_edid();
        let sum = edid.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        assert_eq!(sum, 0);
    }

    #[test]
    fn test_mock_records_in_order() {
        let address = BusAddress::new(1, 2);
        let mut engine = MockEngine::new();
        engine.attach(address, MockDevice::adapter(0xB0, "A"));

        engine.vendor_product(address).unwrap();
        let mut buf = [0u8; 6];
        let setup = SetupPacket::vendor_in(REQUEST_STATUS, 0, 0, 6);
        assert_eq!(
            engine
                .control_in(address, setup, &mut buf, Duration::from_millis(1000))
                .unwrap(),
            6
        );
        assert_eq!(buf[3], 0xB0);

        assert_eq!(engine.transfers().len(), 2);
        assert!(engine.transfers()[1].is_control_in(REQUEST_STATUS));
    }

    #[test]
    fn test_mock_unknown_address() {
        let mut engine = MockEngine::new();
        assert_eq!(
            engine.vendor_product(BusAddress::new(9, 9)),
            Err(UsbError::NoDevice)
        );
    }

    #[test]
    fn test_mock_bulk_busy_cycles() {
        let address = BusAddress::new(1, 2);
        let mut engine = MockEngine::new();
        engine.attach(address, MockDevice::adapter(0xB0, "A"));
        engine.busy_cycles = 2;

        engine
            .submit_bulk(address, 1, &[1, 2, 3], Duration::from_secs(1))
            .unwrap();
        assert_eq!(engine.endpoint_busy(address, 1), Ok(true));
        engine.pump();
        assert_eq!(engine.endpoint_busy(address, 1), Ok(true));
        engine.pump();
        assert_eq!(engine.endpoint_busy(address, 1), Ok(false));
        assert_eq!(engine.pumps(), 2);
    }

    #[test]
    fn test_mock_bulk_failure_reported_once() {
        let address = BusAddress::new(1, 2);
        let mut engine = MockEngine::new();
        engine.attach(address, MockDevice::adapter(0xB0, "A"));
        engine.fail_bulk_at = Some((0, UsbError::Timeout));

        engine
            .submit_bulk(address, 1, &[0; 4], Duration::from_secs(1))
            .unwrap();
        assert_eq!(engine.endpoint_busy(address, 1), Err(UsbError::Timeout));
        assert_eq!(engine.endpoint_busy(address, 1), Ok(false));
    }

    #[tokio::test]
    async fn test_with_timeout_success() {
        let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await;

        assert!(result.is_ok());
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_timeout_failure() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            42
        })
        .await;

        assert!(result.is_err());
    }
}
