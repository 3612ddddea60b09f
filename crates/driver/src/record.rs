//! Device records
//!
//! A [`DeviceRecord`] is the persistent identity of one physical adapter,
//! keyed by its serial. Its [`Connection`] is the transient part: which bus
//! address it is reachable at and, once opened, which bulk endpoint it streams
//! to. The record owns the connection outright, so there is no way for one to
//! outlive the other.

use crate::edid::DisplayMode;
use crate::settings::Timeouts;
use protocol::{BulkEndpoint, BusAddress, DeviceType, DloError, Result, Serial};

/// Where a record is currently attached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub bus_address: BusAddress,
    /// Resolved by `open`, released by `close`
    pub endpoint: Option<BulkEndpoint>,
}

impl Connection {
    pub fn new(bus_address: BusAddress) -> Self {
        Self {
            bus_address,
            endpoint: None,
        }
    }
}

/// Fixed-capacity command staging buffer
///
/// Filled by callers through [`extend`](Self::extend) and drained by the bulk
/// writer, which resets it after every flush.
#[derive(Debug)]
pub struct StagingBuffer {
    buf: Vec<u8>,
    capacity: usize,
}

impl StagingBuffer {
    /// Reserve exactly `capacity` bytes up front
    pub fn allocate(capacity: usize) -> Result<Self> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(capacity)
            .map_err(|_| DloError::AllocationFailure {
                requested: capacity,
            })?;
        Ok(Self { buf, capacity })
    }

    /// Append `bytes`, failing without a partial append if they do not fit
    pub fn extend(&mut self, bytes: &[u8]) -> Result<()> {
        let available = self.remaining();
        if bytes.len() > available {
            return Err(DloError::StagingOverflow {
                needed: bytes.len(),
                available,
            });
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.buf.len()
    }

    /// Move the cursor back to the start; capacity is kept
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

/// Persistent state of one adapter
#[derive(Debug)]
pub struct DeviceRecord {
    pub device_type: DeviceType,
    /// Identity key, unique within a registry
    pub serial: Serial,
    /// Set by a successful `open`, cleared by `close`
    pub claimed: bool,
    /// Present while the record is open
    pub staging: Option<StagingBuffer>,
    pub timeouts: Timeouts,
    /// `None` once the device has been unplugged
    pub connection: Option<Connection>,
    /// Modes the attached monitor is believed to support
    pub modes: Vec<DisplayMode>,
}

impl DeviceRecord {
    pub fn new(
        device_type: DeviceType,
        serial: Serial,
        bus_address: BusAddress,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            device_type,
            serial,
            claimed: false,
            staging: None,
            timeouts,
            connection: Some(Connection::new(bus_address)),
            modes: Vec::new(),
        }
    }

    pub fn bus_address(&self) -> Option<BusAddress> {
        self.connection.map(|c| c.bus_address)
    }

    /// The live connection, or `Disconnected`
    pub fn connection(&self) -> Result<Connection> {
        self.connection.ok_or(DloError::Disconnected)
    }

    /// Append to the staging buffer of an open record
    pub fn stage(&mut self, bytes: &[u8]) -> Result<()> {
        match self.staging.as_mut() {
            Some(staging) if self.claimed => staging.extend(bytes),
            _ => Err(DloError::NotClaimed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_extend_and_reset() {
        let mut staging = StagingBuffer::allocate(8).unwrap();
        staging.extend(&[1, 2, 3]).unwrap();
        assert_eq!(staging.len(), 3);
        assert_eq!(staging.remaining(), 5);

        staging.reset();
        assert!(staging.is_empty());
        assert_eq!(staging.capacity(), 8);
    }

    #[test]
    fn test_staging_overflow_leaves_contents() {
        let mut staging = StagingBuffer::allocate(4).unwrap();
        staging.extend(&[1, 2, 3]).unwrap();

        let err = staging.extend(&[4, 5]).unwrap_err();
        assert_eq!(
            err,
            DloError::StagingOverflow {
                needed: 2,
                available: 1
            }
        );
        assert_eq!(staging.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn test_oversized_allocation_fails() {
        let err = StagingBuffer::allocate(usize::MAX).unwrap_err();
        assert_eq!(
            err,
            DloError::AllocationFailure {
                requested: usize::MAX
            }
        );
    }

    #[test]
    fn test_new_record_is_connected_and_unclaimed() {
        let record = DeviceRecord::new(
            DeviceType::Base,
            Serial::from("SN1"),
            BusAddress::new(1, 3),
            Timeouts::default(),
        );

        assert!(!record.claimed);
        assert!(record.staging.is_none());
        assert_eq!(record.bus_address(), Some(BusAddress::new(1, 3)));
        assert_eq!(record.connection().unwrap().endpoint, None);
    }

    #[test]
    fn test_stage_requires_open_record() {
        let mut record = DeviceRecord::new(
            DeviceType::Alex,
            Serial::from("SN2"),
            BusAddress::new(1, 4),
            Timeouts::default(),
        );
        assert_eq!(record.stage(&[0xAF]), Err(DloError::NotClaimed));
    }
}
