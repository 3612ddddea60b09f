//! Channel selection
//!
//! The adapter ignores bulk commands until an authorization payload has been
//! written to it with a vendor control OUT request. Completion of the transfer
//! is the only success signal.

use crate::record::DeviceRecord;
use common::TransferEngine;
use protocol::constants::REQUEST_CHANNEL;
use protocol::{Result, STD_CHANNEL, SetupPacket, UsbError};
use tracing::{debug, info};

/// Send `payload`, or the standard payload when `None`
///
/// An empty custom payload sends nothing and succeeds.
pub fn select_channel<E: TransferEngine>(
    engine: &mut E,
    record: &DeviceRecord,
    payload: Option<&[u8]>,
) -> Result<()> {
    let payload = payload.unwrap_or(&STD_CHANNEL);
    if payload.is_empty() {
        debug!("Empty channel payload for {}, nothing sent", record.serial);
        return Ok(());
    }

    let address = record.connection()?.bus_address;

    let length = u16::try_from(payload.len()).map_err(|_| UsbError::InvalidParam)?;
    let setup = SetupPacket::vendor_out(REQUEST_CHANNEL, 0, 0, length);
    engine.control_out(address, setup, payload, record.timeouts.channel_select)?;

    info!("Selected channel on {} ({} bytes)", record.serial, length);
    Ok(())
}

/// Send the standard channel payload
pub fn select_std_channel<E: TransferEngine>(engine: &mut E, record: &DeviceRecord) -> Result<()> {
    select_channel(engine, record, Some(&STD_CHANNEL))
}
