//! USB device manager
//!
//! Owns the rusb context, the open handles keyed by bus address, and the
//! hot-plug registration. Runs on the worker thread only.

use common::UsbEvent;
use protocol::{BusAddress, DeviceSummary, UsbError};
use rusb::{Context, Device, DeviceHandle, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

use super::transfers::map_rusb_error;

/// An opened device and the interfaces claimed on it
struct OpenDevice {
    handle: DeviceHandle<Context>,
    claimed: BTreeSet<u8>,
}

pub struct DeviceManager {
    context: Context,
    open: HashMap<BusAddress, OpenDevice>,
    /// Addresses reported gone by the hot-plug callback, not yet cleaned up
    departed: Arc<Mutex<Vec<BusAddress>>>,
    _hotplug_registration: Option<Registration<Context>>,
    event_sender: async_channel::Sender<UsbEvent>,
}

impl DeviceManager {
    pub fn new(context: Context, event_sender: async_channel::Sender<UsbEvent>) -> Self {
        Self {
            context,
            open: HashMap::new(),
            departed: Arc::new(Mutex::new(Vec::new())),
            _hotplug_registration: None,
            event_sender,
        }
    }

    /// Register hot-plug callbacks, when the platform supports them
    pub fn initialize(&mut self) -> Result<(), rusb::Error> {
        if !rusb::has_hotplug() {
            warn!("Hot-plug not supported on this platform; only initial enumeration is seen");
            return Ok(());
        }

        let callback = HotplugCallback {
            event_sender: self.event_sender.clone(),
            departed: self.departed.clone(),
        };

        let registration = HotplugBuilder::new()
            .enumerate(false)
            .register(&self.context, Box::new(callback))?;

        self._hotplug_registration = Some(registration);
        info!("Hot-plug callbacks registered");
        Ok(())
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// All attached devices with readable descriptors
    pub fn list_devices(&self) -> Vec<DeviceSummary> {
        let devices = match self.context.devices() {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Failed to enumerate devices: {}", e);
                return Vec::new();
            }
        };

        devices.iter().filter_map(|d| summarize(&d)).collect()
    }

    fn find_device(&self, address: BusAddress) -> Result<Device<Context>, UsbError> {
        let devices = self.context.devices().map_err(map_rusb_error)?;
        devices
            .iter()
            .find(|d| d.bus_number() == address.bus && d.address() == address.address)
            .ok_or(UsbError::NoDevice)
    }

    pub fn vendor_product(&self, address: BusAddress) -> Result<(u16, u16), UsbError> {
        let desc = self
            .find_device(address)?
            .device_descriptor()
            .map_err(map_rusb_error)?;
        Ok((desc.vendor_id(), desc.product_id()))
    }

    /// Serial number string index from the device descriptor
    pub fn serial_index(&self, address: BusAddress) -> Result<u8, UsbError> {
        self.find_device(address)?
            .device_descriptor()
            .map_err(map_rusb_error)?
            .serial_number_string_index()
            .ok_or(UsbError::NotFound)
    }

    /// Handle for `address`, opening the device on first use
    pub fn handle(&mut self, address: BusAddress) -> Result<&DeviceHandle<Context>, UsbError> {
        if !self.open.contains_key(&address) {
            let handle = self.find_device(address)?.open().map_err(|e| {
                warn!("Failed to open device {}: {}", address, e);
                map_rusb_error(e)
            })?;
            debug!("Opened device {}", address);
            self.open.insert(
                address,
                OpenDevice {
                    handle,
                    claimed: BTreeSet::new(),
                },
            );
        }

        self.open
            .get(&address)
            .map(|d| &d.handle)
            .ok_or(UsbError::NoDevice)
    }

    /// Claim `interface`, detaching any kernel driver bound to it
    pub fn claim_interface(&mut self, address: BusAddress, interface: u8) -> Result<(), UsbError> {
        self.handle(address)?;
        let device = self.open.get_mut(&address).ok_or(UsbError::NoDevice)?;
        if device.claimed.contains(&interface) {
            return Ok(());
        }

        match device.handle.kernel_driver_active(interface) {
            Ok(true) => {
                debug!("Detaching kernel driver from interface {} on {}", interface, address);
                if let Err(e) = device.handle.detach_kernel_driver(interface) {
                    warn!("Failed to detach kernel driver from interface {}: {}", interface, e);
                }
            }
            Ok(false) => {}
            Err(e) => debug!("Could not check kernel driver for interface {}: {}", interface, e),
        }

        device.handle.claim_interface(interface).map_err(|e| {
            warn!("Failed to claim interface {} on {}: {}", interface, address, e);
            map_rusb_error(e)
        })?;
        device.claimed.insert(interface);
        debug!("Claimed interface {} on {}", interface, address);
        Ok(())
    }

    /// Release `interface` and give it back to the kernel
    pub fn release_interface(&mut self, address: BusAddress, interface: u8) {
        let Some(device) = self.open.get_mut(&address) else {
            return;
        };
        if !device.claimed.remove(&interface) {
            return;
        }

        if let Err(e) = device.handle.release_interface(interface) {
            warn!("Failed to release interface {} on {}: {}", interface, address, e);
        }
        if let Err(e) = device.handle.attach_kernel_driver(interface) {
            debug!("Could not reattach kernel driver to interface {}: {}", interface, e);
        }
        debug!("Released interface {} on {}", interface, address);
    }

    /// Drop handles of devices the hot-plug callback saw leave
    pub fn process_departures(&mut self) {
        let departed = match self.departed.lock() {
            Ok(mut departed) => std::mem::take(&mut *departed),
            Err(e) => {
                error!("Departure list poisoned: {}", e);
                return;
            }
        };

        for address in departed {
            if self.open.remove(&address).is_some() {
                debug!("Dropped handle for departed device {}", address);
            }
        }
    }

    /// Close every open handle
    pub fn close_all(&mut self) {
        let addresses: Vec<BusAddress> = self.open.keys().copied().collect();
        for address in addresses {
            let interfaces: Vec<u8> = self
                .open
                .get(&address)
                .map(|d| d.claimed.iter().copied().collect())
                .unwrap_or_default();
            for interface in interfaces {
                self.release_interface(address, interface);
            }
            self.open.remove(&address);
        }
    }
}

fn summarize<T: UsbContext>(device: &Device<T>) -> Option<DeviceSummary> {
    let desc = device.device_descriptor().ok()?;
    Some(DeviceSummary {
        address: BusAddress::new(device.bus_number(), device.address()),
        vendor_id: desc.vendor_id(),
        product_id: desc.product_id(),
    })
}

/// Forwards hot-plug notifications to the driver side
struct HotplugCallback {
    event_sender: async_channel::Sender<UsbEvent>,
    departed: Arc<Mutex<Vec<BusAddress>>>,
}

impl<T: UsbContext> Hotplug<T> for HotplugCallback {
    fn device_arrived(&mut self, device: Device<T>) {
        let Some(summary) = summarize(&device) else {
            warn!(
                "Hot-plug: unreadable device at bus={}, addr={}",
                device.bus_number(),
                device.address()
            );
            return;
        };
        debug!("Hot-plug: device arrived at {}", summary.address);

        if let Err(e) = self
            .event_sender
            .try_send(UsbEvent::DeviceArrived { device: summary })
        {
            error!("Failed to send DeviceArrived event: {}", e);
        }
    }

    fn device_left(&mut self, device: Device<T>) {
        let address = BusAddress::new(device.bus_number(), device.address());
        debug!("Hot-plug: device left {}", address);

        if let Ok(mut departed) = self.departed.lock() {
            departed.push(address);
        }
        if let Err(e) = self.event_sender.try_send(UsbEvent::DeviceLeft { address }) {
            error!("Failed to send DeviceLeft event: {}", e);
        }
    }
}
