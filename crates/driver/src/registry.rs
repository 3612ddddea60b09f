//! Device registry
//!
//! Holds at most one [`DeviceRecord`] per serial. [`Registry::bind`] is the
//! single lookup-or-insert operation identification goes through.

use crate::record::{Connection, DeviceRecord};
use crate::settings::Timeouts;
use protocol::{BulkEndpoint, BusAddress, DeviceType, Serial};
use std::collections::BTreeMap;
use tracing::debug;

/// What [`Registry::bind`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// A new record was created
    Created,
    /// An existing record was moved to a new bus address
    Rebound { previous: Option<BusAddress> },
    /// An existing record was already bound to this address
    Unchanged,
}

#[derive(Debug, Default)]
pub struct Registry {
    records: BTreeMap<Serial, DeviceRecord>,
    /// Endpoints of records detached by `bind`, awaiting release
    detached: Vec<(BusAddress, BulkEndpoint)>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, serial: &Serial) -> Option<&DeviceRecord> {
        self.records.get(serial)
    }

    pub fn get_mut(&mut self, serial: &Serial) -> Option<&mut DeviceRecord> {
        self.records.get_mut(serial)
    }

    /// Serial of the record currently bound to `address`
    pub fn serial_at(&self, address: BusAddress) -> Option<&Serial> {
        self.records
            .values()
            .find(|r| r.bus_address() == Some(address))
            .map(|r| &r.serial)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.records.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut DeviceRecord> {
        self.records.values_mut()
    }

    /// Find the record for `serial` or create it, and bind it to `address`
    ///
    /// A rebind to a different address drops the endpoint and the claim, which
    /// belonged to the old attachment, but keeps the staging buffer. Any other
    /// record still bound to `address` is closed and detached from it; its
    /// endpoint is queued for [`take_detached`](Self::take_detached).
    pub fn bind(
        &mut self,
        serial: Serial,
        device_type: DeviceType,
        address: BusAddress,
        timeouts: Timeouts,
    ) -> (Binding, &mut DeviceRecord) {
        for stale in self
            .records
            .values_mut()
            .filter(|r| r.serial != serial && r.bus_address() == Some(address))
        {
            debug!(
                "Detaching stale record {} from bus address {}",
                stale.serial, address
            );
            if let Some(endpoint) = stale.connection.take().and_then(|c| c.endpoint) {
                self.detached.push((address, endpoint));
            }
            stale.staging = None;
            stale.claimed = false;
        }

        let mut binding = Binding::Created;
        let record = self
            .records
            .entry(serial)
            .and_modify(|record| {
                let previous = record.bus_address();
                if previous == Some(address) {
                    binding = Binding::Unchanged;
                    return;
                }
                binding = Binding::Rebound { previous };
                record.connection = Some(Connection::new(address));
                record.claimed = false;
            })
            .or_insert_with_key(|serial| {
                DeviceRecord::new(device_type, serial.clone(), address, timeouts)
            });

        (binding, record)
    }

    /// Endpoints left open by records `bind` detached; the caller releases them
    pub fn take_detached(&mut self) -> Vec<(BusAddress, BulkEndpoint)> {
        std::mem::take(&mut self.detached)
    }
}
