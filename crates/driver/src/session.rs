//! Device session lifecycle
//!
//! `open` claims a record's adapter: it resolves and opens the bulk endpoint,
//! allocates the staging buffer, seeds the supported modes and tries to refine
//! them from the monitor's EDID. `close` undoes it.

use crate::edid::{EdidDecoder, read_edid};
use crate::record::{DeviceRecord, StagingBuffer};
use common::TransferEngine;
use protocol::constants::CONFIG_DESCRIPTOR_CAPACITY;
use protocol::{Result, find_bulk_out};
use tracing::{debug, info, warn};

/// Open and claim the adapter bound to `record`
///
/// An EDID failure is logged and leaves the default modes in place. If the
/// staging buffer cannot be allocated the endpoint is released again and the
/// record is left unclaimed.
pub fn open<E: TransferEngine, D: EdidDecoder + ?Sized>(
    engine: &mut E,
    record: &mut DeviceRecord,
    decoder: &mut D,
    staging_capacity: usize,
) -> Result<()> {
    if record.claimed {
        debug!("Adapter {} already open", record.serial);
        return Ok(());
    }

    let address = record.connection()?.bus_address;

    let mut raw = [0u8; CONFIG_DESCRIPTOR_CAPACITY];
    let received = engine.config_descriptor(address, &mut raw, record.timeouts.control)?;
    let endpoint = find_bulk_out(&raw[..received])?;
    engine.open_endpoint(address, endpoint)?;
    debug!(
        "Opened bulk endpoint {:#04x} on interface {} of {}",
        endpoint.address, endpoint.interface, address
    );

    if record.staging.is_none() {
        match StagingBuffer::allocate(staging_capacity) {
            Ok(staging) => record.staging = Some(staging),
            Err(e) => {
                engine.release_endpoint(address, endpoint);
                return Err(e);
            }
        }
    }

    if let Some(connection) = record.connection.as_mut() {
        connection.endpoint = Some(endpoint);
    }
    record.claimed = true;

    record.modes = decoder.default_modes();
    if let Err(e) = read_edid(engine, record, decoder) {
        warn!(
            "EDID read for {} failed, keeping default modes: {}",
            record.serial, e
        );
    }

    info!(
        "Opened {} adapter {} ({} modes)",
        record.device_type,
        record.serial,
        record.modes.len()
    );
    Ok(())
}

/// Release the endpoint and free the staging buffer
///
/// Closing an unopened record is a no-op. The bus address binding is kept.
pub fn close<E: TransferEngine>(engine: &mut E, record: &mut DeviceRecord) -> Result<()> {
    record.staging = None;
    record.claimed = false;

    if let Some(connection) = record.connection.as_mut()
        && let Some(endpoint) = connection.endpoint.take()
    {
        engine.release_endpoint(connection.bus_address, endpoint);
        info!("Closed adapter {}", record.serial);
    }
    Ok(())
}
