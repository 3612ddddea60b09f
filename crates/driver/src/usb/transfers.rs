//! USB transfer execution
//!
//! Synchronous rusb transfers on an open handle, with rusb errors mapped to
//! [`UsbError`]. Called only from the worker thread.

use protocol::constants::{
    CONFIG_DESCRIPTOR_CAPACITY, DESC_CONFIGURATION, DESC_STRING, STRING_DESCRIPTOR_CAPACITY,
};
use protocol::{SetupPacket, UsbError};
use rusb::{Context, DeviceHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Control transfer with a device-to-host data stage
///
/// Returns at most `setup.length` bytes.
pub fn control_in(
    handle: &DeviceHandle<Context>,
    setup: SetupPacket,
    timeout: Duration,
) -> Result<Vec<u8>, UsbError> {
    let mut buffer = vec![0u8; setup.length as usize];
    let len = handle
        .read_control(
            setup.request_type,
            setup.request,
            setup.value,
            setup.index,
            &mut buffer,
            timeout,
        )
        .map_err(|e| {
            warn!(
                "Control IN {:#04x} (value={:#06x}, index={:#06x}) failed: {}",
                setup.request, setup.value, setup.index, e
            );
            map_rusb_error(e)
        })?;
    buffer.truncate(len);
    Ok(buffer)
}

/// Control transfer with a host-to-device data stage
pub fn control_out(
    handle: &DeviceHandle<Context>,
    setup: SetupPacket,
    data: &[u8],
    timeout: Duration,
) -> Result<(), UsbError> {
    handle
        .write_control(
            setup.request_type,
            setup.request,
            setup.value,
            setup.index,
            data,
            timeout,
        )
        .map_err(|e| {
            warn!("Control OUT {:#04x} failed: {}", setup.request, e);
            map_rusb_error(e)
        })?;
    Ok(())
}

/// Raw string descriptor `index` in language `lang_id`
pub fn string_descriptor(
    handle: &DeviceHandle<Context>,
    index: u8,
    lang_id: u16,
    timeout: Duration,
) -> Result<Vec<u8>, UsbError> {
    let setup = SetupPacket::get_descriptor(
        DESC_STRING,
        index,
        lang_id,
        STRING_DESCRIPTOR_CAPACITY as u16,
    );
    control_in(handle, setup, timeout)
}

/// Raw configuration descriptor 0, truncated to the fetch buffer
pub fn config_descriptor(
    handle: &DeviceHandle<Context>,
    timeout: Duration,
) -> Result<Vec<u8>, UsbError> {
    let setup =
        SetupPacket::get_descriptor(DESC_CONFIGURATION, 0, 0, CONFIG_DESCRIPTOR_CAPACITY as u16);
    control_in(handle, setup, timeout)
}

/// Bulk OUT transfer of the whole of `data`
pub fn bulk_out(
    handle: &DeviceHandle<Context>,
    endpoint: u8,
    data: &[u8],
    timeout: Duration,
) -> Result<(), UsbError> {
    let written = handle
        .write_bulk(endpoint, data, timeout)
        .map_err(map_rusb_error)?;

    if written != data.len() {
        warn!(
            "Short bulk write on endpoint {:#04x}: {} of {} bytes",
            endpoint,
            written,
            data.len()
        );
        return Err(UsbError::Other {
            message: format!("short bulk write: {} of {} bytes", written, data.len()),
        });
    }

    debug!("Bulk OUT {:#04x}: {} bytes", endpoint, written);
    Ok(())
}

/// Map rusb::Error to protocol::UsbError
pub fn map_rusb_error(err: rusb::Error) -> UsbError {
    match err {
        rusb::Error::Timeout => UsbError::Timeout,
        rusb::Error::Pipe => UsbError::Pipe,
        rusb::Error::NoDevice => UsbError::NoDevice,
        rusb::Error::NotFound => UsbError::NotFound,
        rusb::Error::Busy => UsbError::Busy,
        rusb::Error::Overflow => UsbError::Overflow,
        rusb::Error::Io => UsbError::Io,
        rusb::Error::InvalidParam => UsbError::InvalidParam,
        rusb::Error::Access => UsbError::Access,
        _ => UsbError::Other {
            message: err.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_rusb_error() {
        assert_eq!(map_rusb_error(rusb::Error::Timeout), UsbError::Timeout);
        assert_eq!(map_rusb_error(rusb::Error::Pipe), UsbError::Pipe);
        assert_eq!(map_rusb_error(rusb::Error::NoDevice), UsbError::NoDevice);
        assert_eq!(map_rusb_error(rusb::Error::NotFound), UsbError::NotFound);
        assert!(matches!(
            map_rusb_error(rusb::Error::NotSupported),
            UsbError::Other { .. }
        ));
    }
}
