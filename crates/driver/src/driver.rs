//! Driver facade
//!
//! Owns the transfer engine, the registry and the EDID decoder, and exposes
//! every operation by serial. Lifecycle is explicit: [`Driver::init`] before
//! first use, [`Driver::shutdown`] closes every record and hands the engine
//! back so its owner can tear it down last.

use crate::channel_select;
use crate::edid::{EdidDecoder, StandardModes};
use crate::identify;
use crate::record::DeviceRecord;
use crate::registry::Registry;
use crate::session;
use crate::settings::DriverSettings;
use crate::writer;
use common::TransferEngine;
use protocol::{BusAddress, DeviceSummary, DloError, Result, Serial};
use tracing::{debug, info, warn};

pub struct Driver<E: TransferEngine> {
    engine: E,
    registry: Registry,
    decoder: Box<dyn EdidDecoder + Send>,
    settings: DriverSettings,
}

impl<E: TransferEngine> Driver<E> {
    /// Create a driver using the built-in mode catalogue
    pub fn init(engine: E, settings: DriverSettings) -> Self {
        Self::with_decoder(engine, settings, Box::new(StandardModes))
    }

    pub fn with_decoder(
        engine: E,
        settings: DriverSettings,
        decoder: Box<dyn EdidDecoder + Send>,
    ) -> Self {
        debug!(
            "Driver initialised: staging {} bytes, chunk {} bytes",
            settings.staging_capacity, settings.chunk_size
        );
        Self {
            engine,
            registry: Registry::new(),
            decoder,
            settings,
        }
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record(&self, serial: &Serial) -> Option<&DeviceRecord> {
        self.registry.get(serial)
    }

    pub fn record_mut(&mut self, serial: &Serial) -> Option<&mut DeviceRecord> {
        self.registry.get_mut(serial)
    }

    /// Attached devices as reported by the engine
    pub fn list_devices(&mut self) -> Result<Vec<DeviceSummary>> {
        Ok(self.engine.list_devices()?)
    }

    /// Identify the device at `address`, returning its serial
    pub fn identify(&mut self, address: BusAddress) -> Result<Serial> {
        let timeouts = self.settings.timeouts;
        let record = identify::identify(&mut self.engine, &mut self.registry, address, timeouts)?;
        Ok(record.serial.clone())
    }

    pub fn open(&mut self, serial: &Serial) -> Result<()> {
        let capacity = self.settings.staging_capacity;
        let record = lookup(&mut self.registry, serial)?;
        session::open(&mut self.engine, record, self.decoder.as_mut(), capacity)
    }

    pub fn close(&mut self, serial: &Serial) -> Result<()> {
        let record = lookup(&mut self.registry, serial)?;
        session::close(&mut self.engine, record)
    }

    /// Flush the record's staging buffer
    pub fn write(&mut self, serial: &Serial) -> Result<()> {
        let chunk_size = self.settings.chunk_size;
        let record = lookup(&mut self.registry, serial)?;
        writer::write(&mut self.engine, record, chunk_size)
    }

    /// Write a caller-owned buffer, bypassing the staging buffer
    pub fn write_buf(&mut self, serial: &Serial, bytes: &[u8]) -> Result<()> {
        let chunk_size = self.settings.chunk_size;
        let record = lookup(&mut self.registry, serial)?;
        writer::write_buf(&mut self.engine, record, bytes, chunk_size)
    }

    /// Append to the record's staging buffer
    pub fn stage(&mut self, serial: &Serial, bytes: &[u8]) -> Result<()> {
        lookup(&mut self.registry, serial)?.stage(bytes)
    }

    /// Send `payload`, or the standard channel payload when `None`
    pub fn select_channel(&mut self, serial: &Serial, payload: Option<&[u8]>) -> Result<()> {
        let record = lookup(&mut self.registry, serial)?;
        channel_select::select_channel(&mut self.engine, record, payload)
    }

    pub fn select_std_channel(&mut self, serial: &Serial) -> Result<()> {
        let record = lookup(&mut self.registry, serial)?;
        channel_select::select_std_channel(&mut self.engine, record)
    }

    /// Bring up a newly attached device: identify, open, select the channel
    pub fn on_mount(&mut self, address: BusAddress) -> Result<Serial> {
        let serial = self.identify(address)?;
        self.open(&serial)?;

        let record = lookup(&mut self.registry, &serial)?;
        let payload = self.settings.channel_payload();
        channel_select::select_channel(&mut self.engine, record, Some(payload))?;

        Ok(serial)
    }

    /// Handle removal of the device at `address`
    ///
    /// Closes its record and drops the connection; the record itself stays so
    /// that a later identification of the same serial finds it again.
    pub fn on_unmount(&mut self, address: BusAddress) -> Option<Serial> {
        let serial = self.registry.serial_at(address)?.clone();
        let record = self.registry.get_mut(&serial)?;

        if let Err(e) = session::close(&mut self.engine, record) {
            warn!("Closing {} on removal failed: {}", serial, e);
        }
        record.connection = None;

        info!("Adapter {} removed from {}", serial, address);
        Some(serial)
    }

    /// Close every record and return the engine
    pub fn shutdown(mut self) -> E {
        for record in self.registry.iter_mut() {
            if let Err(e) = session::close(&mut self.engine, record) {
                warn!("Closing {} during shutdown failed: {}", record.serial, e);
            }
        }
        info!("Driver shut down ({} records)", self.registry.len());
        self.engine
    }
}

fn lookup<'r>(registry: &'r mut Registry, serial: &Serial) -> Result<&'r mut DeviceRecord> {
    registry
        .get_mut(serial)
        .ok_or_else(|| DloError::UnknownDevice(serial.clone()))
}
