//! USB and adapter type definitions
//!
//! This module defines the value types shared by the parser, the transfer
//! engine seam and the driver: addresses, setup packets, the device family
//! classification, serial identity keys and engine-level error kinds.

use crate::constants::{EDID_BLOCK_SIZE, STATUS_TYPE_BYTE};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bus address of an attached device
///
/// Assigned at enumeration time by the host stack. It is transient: the same
/// physical adapter gets a new address after a bus reset or reconnect, so it
/// is never used as identity (see [`Serial`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BusAddress {
    /// Bus number
    pub bus: u8,
    /// Device address on the bus
    pub address: u8,
}

impl BusAddress {
    pub const fn new(bus: u8, address: u8) -> Self {
        Self { bus, address }
    }
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}:{:03}", self.bus, self.address)
    }
}

/// Transfer direction as seen from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Host to device
    Out,
    /// Device to host
    In,
}

/// Control transfer setup packet [USB 2.0 §9.3]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupPacket {
    /// bmRequestType
    pub request_type: u8,
    /// bRequest
    pub request: u8,
    /// wValue
    pub value: u16,
    /// wIndex
    pub index: u16,
    /// wLength
    pub length: u16,
}

impl SetupPacket {
    const TYPE_STANDARD: u8 = 0x00;
    const TYPE_VENDOR: u8 = 0x02 << 5;
    const RECIPIENT_DEVICE: u8 = 0x00;
    const DIR_IN: u8 = 0x80;

    /// Vendor request addressed to the device, data stage device-to-host
    pub const fn vendor_in(request: u8, value: u16, index: u16, length: u16) -> Self {
        Self {
            request_type: Self::DIR_IN | Self::TYPE_VENDOR | Self::RECIPIENT_DEVICE,
            request,
            value,
            index,
            length,
        }
    }

    /// Vendor request addressed to the device, data stage host-to-device
    pub const fn vendor_out(request: u8, value: u16, index: u16, length: u16) -> Self {
        Self {
            request_type: Self::TYPE_VENDOR | Self::RECIPIENT_DEVICE,
            request,
            value,
            index,
            length,
        }
    }

    /// Standard GET_DESCRIPTOR request
    pub const fn get_descriptor(kind: u8, desc_index: u8, language: u16, length: u16) -> Self {
        Self {
            request_type: Self::DIR_IN | Self::TYPE_STANDARD | Self::RECIPIENT_DEVICE,
            request: crate::constants::REQUEST_GET_DESCRIPTOR,
            value: ((kind as u16) << 8) | desc_index as u16,
            index: language,
            length,
        }
    }

    pub fn direction(&self) -> Direction {
        if self.request_type & Self::DIR_IN != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }
}

/// Adapter family, classified from the status query response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    /// Base platform
    Base,
    /// Alex chipset
    Alex,
    /// Ollie chipset
    Ollie,
    /// Supported vendor, unrecognized family. Kept rather than rejected; what to
    /// do with it is left to the caller.
    Unknown,
}

impl DeviceType {
    const NIBBLE_BASE: u8 = 0xB;
    const NIBBLE_ALEX: u8 = 0xF;
    const BYTE_OLLIE: u8 = 0xF1;

    /// Classify from the family byte of the status response
    ///
    /// The high nibble decides first; the full-byte Ollie code is only
    /// consulted when the nibble matched nothing.
    pub fn from_type_byte(byte: u8) -> Self {
        match (byte >> 4) & 0xF {
            Self::NIBBLE_BASE => DeviceType::Base,
            Self::NIBBLE_ALEX => DeviceType::Alex,
            _ if byte == Self::BYTE_OLLIE => DeviceType::Ollie,
            _ => DeviceType::Unknown,
        }
    }

    /// Classify a full status response, `None` if it is too short to carry
    /// the family byte
    pub fn from_status(status: &[u8]) -> Option<Self> {
        status.get(STATUS_TYPE_BYTE).copied().map(Self::from_type_byte)
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceType::Base => "base",
            DeviceType::Alex => "alex",
            DeviceType::Ollie => "ollie",
            DeviceType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Decoded serial string, the stable identity key of an adapter
///
/// Holds the transcoded bytes. Serials containing UTF-16 surrogates decode to
/// byte sequences that are not valid UTF-8 (see [`crate::serial`]), so the key
/// is bytes and display is lossy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Serial(Vec<u8>);

impl Serial {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Serial {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// Base EDID block read from the attached monitor
#[derive(Clone, PartialEq, Eq)]
pub struct EdidBlock(pub [u8; EDID_BLOCK_SIZE]);

impl EdidBlock {
    pub fn as_bytes(&self) -> &[u8; EDID_BLOCK_SIZE] {
        &self.0
    }
}

impl Default for EdidBlock {
    fn default() -> Self {
        Self([0; EDID_BLOCK_SIZE])
    }
}

impl fmt::Debug for EdidBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EdidBlock({:02x?}..)", &self.0[..8])
    }
}

/// Bulk OUT endpoint located by the descriptor parser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkEndpoint {
    /// bInterfaceNumber of the owning vendor-specific interface
    pub interface: u8,
    /// bEndpointAddress (direction bit clear)
    pub address: u8,
    /// wMaxPacketSize
    pub max_packet_size: u16,
}

/// Summary of an attached device, as reported by enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub address: BusAddress,
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceSummary {
    /// Whether the vendor id matches the supported adapters
    pub fn is_supported(&self) -> bool {
        self.vendor_id == crate::constants::VENDOR_ID
    }
}

/// USB error types
///
/// Engine-level failure kinds. Maps to libusb error codes, see rusb::Error for
/// details.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum UsbError {
    /// Transfer timed out
    Timeout,
    /// Endpoint stalled (protocol error)
    Pipe,
    /// Device was disconnected
    NoDevice,
    /// Device or endpoint not found
    NotFound,
    /// Device is busy
    Busy,
    /// Buffer overflow
    Overflow,
    /// I/O error
    Io,
    /// Invalid parameter
    InvalidParam,
    /// Access denied (permissions)
    Access,
    /// Other error with message
    Other { message: String },
}

impl fmt::Display for UsbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsbError::Timeout => f.write_str("timeout"),
            UsbError::Pipe => f.write_str("pipe stall"),
            UsbError::NoDevice => f.write_str("no device"),
            UsbError::NotFound => f.write_str("not found"),
            UsbError::Busy => f.write_str("busy"),
            UsbError::Overflow => f.write_str("overflow"),
            UsbError::Io => f.write_str("i/o error"),
            UsbError::InvalidParam => f.write_str("invalid parameter"),
            UsbError::Access => f.write_str("access denied"),
            UsbError::Other { message } => f.write_str(message),
        }
    }
}

impl std::error::Error for UsbError {}
