//! Bulk command writer
//!
//! Streams a command buffer to the record's bulk OUT endpoint in chunks. Each
//! chunk is submitted, then the endpoint is polled while the engine is pumped,
//! so the caller sees one synchronous chunk in flight at a time.

use crate::record::DeviceRecord;
use common::{EngineResult, TransferEngine};
use protocol::{BusAddress, DloError, Result};
use tracing::{trace, warn};

/// Flush the staging buffer
///
/// The staging buffer is reset on return whether or not the write succeeded;
/// unsent bytes are discarded.
pub fn write<E: TransferEngine>(
    engine: &mut E,
    record: &mut DeviceRecord,
    chunk_size: usize,
) -> Result<()> {
    let Some(mut staging) = record.staging.take() else {
        return Err(DloError::NotClaimed);
    };

    let result = write_buf(engine, record, staging.as_slice(), chunk_size);

    staging.reset();
    record.staging = Some(staging);
    result
}

/// Write `bytes` to the record's bulk endpoint
///
/// Either every chunk is delivered or the first failure is returned; no
/// partial progress is reported.
pub fn write_buf<E: TransferEngine>(
    engine: &mut E,
    record: &DeviceRecord,
    bytes: &[u8],
    chunk_size: usize,
) -> Result<()> {
    if !record.claimed {
        return Err(DloError::NotClaimed);
    }
    if bytes.is_empty() {
        return Ok(());
    }

    let connection = record.connection()?;
    let endpoint = connection.endpoint.ok_or(DloError::NotClaimed)?.address;
    let address = connection.bus_address;

    for (index, chunk) in bytes.chunks(chunk_size.max(1)).enumerate() {
        trace!("Chunk {} ({} bytes) to {}", index, chunk.len(), address);

        let outcome = engine
            .submit_bulk(address, endpoint, chunk, record.timeouts.bulk_write)
            .and_then(|()| wait_idle(engine, address, endpoint));

        if let Err(e) = outcome {
            warn!("Bulk write to {} failed at chunk {}: {}", record.serial, index, e);
            return Err(e.into());
        }
    }

    Ok(())
}

/// Pump the engine until the endpoint's in-flight transfer completes
fn wait_idle<E: TransferEngine>(
    engine: &mut E,
    address: BusAddress,
    endpoint: u8,
) -> EngineResult<()> {
    while engine.endpoint_busy(address, endpoint)? {
        engine.pump();
    }
    Ok(())
}
