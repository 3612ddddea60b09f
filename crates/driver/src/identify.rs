//! Device identification
//!
//! Turns a freshly attached bus address into a device record: vendor check,
//! status query for the device family, serial fetch, then lookup-or-insert in
//! the registry keyed by serial.

use crate::registry::{Binding, Registry};
use crate::record::DeviceRecord;
use crate::settings::Timeouts;
use common::TransferEngine;
use protocol::constants::{
    REQUEST_STATUS, STATUS_RESPONSE_LEN, STATUS_TYPE_BYTE, STRING_DESCRIPTOR_CAPACITY,
};
use protocol::{
    BusAddress, DeviceType, DloError, LANG_ID_ENGLISH, Result, Serial, SetupPacket, UsbError,
    VENDOR_ID, decode_string_descriptor,
};
use tracing::{debug, info};

/// Identify the device at `address` and bind it to its record
///
/// Nothing is registered unless every step succeeds.
pub fn identify<'r, E: TransferEngine>(
    engine: &mut E,
    registry: &'r mut Registry,
    address: BusAddress,
    timeouts: Timeouts,
) -> Result<&'r mut DeviceRecord> {
    let (vendor_id, product_id) = engine.vendor_product(address)?;
    debug!(
        "Checking device at {}: vid={:#06x}, pid={:#06x}",
        address, vendor_id, product_id
    );

    if vendor_id != VENDOR_ID {
        return Err(DloError::UnsupportedDevice { vendor_id });
    }

    let device_type = query_device_type(engine, address, timeouts)?;
    let serial = read_serial(engine, address, timeouts)?;

    let (binding, _) = registry.bind(serial.clone(), device_type, address, timeouts);
    match binding {
        Binding::Created => info!("New {} adapter {} at {}", device_type, serial, address),
        Binding::Rebound { previous } => {
            info!("Adapter {} moved from {:?} to {}", serial, previous, address)
        }
        Binding::Unchanged => debug!("Adapter {} already known at {}", serial, address),
    }

    for (stale_address, endpoint) in registry.take_detached() {
        engine.release_endpoint(stale_address, endpoint);
    }

    registry
        .get_mut(&serial)
        .ok_or(DloError::UnknownDevice(serial))
}

/// Issue the status query and classify the family byte
pub fn query_device_type<E: TransferEngine>(
    engine: &mut E,
    address: BusAddress,
    timeouts: Timeouts,
) -> Result<DeviceType> {
    let mut status = [0u8; STATUS_RESPONSE_LEN];
    let setup = SetupPacket::vendor_in(REQUEST_STATUS, 0, 0, STATUS_RESPONSE_LEN as u16);
    let received = engine.control_in(address, setup, &mut status, timeouts.identify)?;

    let device_type = DeviceType::from_status(&status[..received]).ok_or_else(|| {
        UsbError::Other {
            message: format!(
                "status response too short: {} bytes, need {}",
                received,
                STATUS_TYPE_BYTE + 1
            ),
        }
    })?;

    debug!(
        "Status byte {:#04x} classified as {}",
        status[STATUS_TYPE_BYTE], device_type
    );
    Ok(device_type)
}

/// Fetch and decode the serial number string
pub fn read_serial<E: TransferEngine>(
    engine: &mut E,
    address: BusAddress,
    timeouts: Timeouts,
) -> Result<Serial> {
    let mut buf = [0u8; STRING_DESCRIPTOR_CAPACITY];
    let received =
        engine.serial_string_descriptor(address, LANG_ID_ENGLISH, &mut buf, timeouts.control)?;
    Ok(decode_string_descriptor(&buf[..received]))
}
