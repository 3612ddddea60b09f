//! USB worker thread
//!
//! Dedicated thread owning the rusb context. Runs libusb's event loop and
//! executes [`UsbCommand`]s from the driver side, answering each through its
//! oneshot.

use crate::usb::host::WakeWorker;
use crate::usb::manager::DeviceManager;
use crate::usb::transfers;
use anyhow::Context as _;
use common::{UsbCommand, UsbWorker};
use rusb::{Context, UsbContext};
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub struct UsbWorkerThread {
    manager: DeviceManager,
    worker: UsbWorker,
    /// Upper bound on one libusb event-loop tick
    event_poll: Duration,
}

impl UsbWorkerThread {
    pub fn new(
        context: Context,
        worker: UsbWorker,
        event_poll: Duration,
    ) -> Result<Self, rusb::Error> {
        let mut manager = DeviceManager::new(context, worker.event_tx.clone());
        manager.initialize()?;

        Ok(Self {
            manager,
            worker,
            event_poll,
        })
    }

    /// Run until a Shutdown command arrives or the driver side goes away
    ///
    /// Each iteration drains pending commands, then lets libusb process events
    /// for at most `event_poll`. An [`EventWaker`] cuts the tick short when a
    /// new command is queued.
    pub fn run(mut self) -> Result<(), rusb::Error> {
        info!("USB worker thread started");

        'outer: loop {
            while let Some(cmd) = self.worker.try_recv_command() {
                if let UsbCommand::Shutdown = cmd {
                    info!("USB worker shutting down");
                    break 'outer;
                }
                self.handle_command(cmd);
            }

            if self.worker.is_closed() {
                info!("Driver side closed, USB worker exiting");
                break;
            }

            match self
                .manager
                .context()
                .handle_events(Some(self.event_poll))
            {
                Ok(()) => {}
                Err(rusb::Error::Interrupted) => {
                    debug!("USB event handling interrupted");
                }
                Err(e) => {
                    warn!("Error handling USB events: {}", e);
                    std::thread::sleep(self.event_poll);
                }
            }

            self.manager.process_departures();
        }

        self.manager.close_all();
        info!("USB worker thread stopped");
        Ok(())
    }

    /// Handle a command, containing any panic to this command
    fn handle_command(&mut self, cmd: UsbCommand) {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.handle_command_inner(cmd)
        }));

        if let Err(e) = result {
            error!("Panic in USB command handler: {:?}", e);
        }
    }

    fn handle_command_inner(&mut self, cmd: UsbCommand) {
        let manager = &mut self.manager;
        match cmd {
            UsbCommand::ListDevices { response } => {
                let devices = manager.list_devices();
                debug!("Listing {} devices", devices.len());
                let _ = response.send(devices);
            }

            UsbCommand::VendorProduct { address, response } => {
                let _ = response.send(manager.vendor_product(address));
            }

            UsbCommand::ControlIn {
                address,
                setup,
                timeout,
                response,
            } => {
                let result = manager
                    .handle(address)
                    .and_then(|h| transfers::control_in(h, setup, timeout));
                let _ = response.send(result);
            }

            UsbCommand::ControlOut {
                address,
                setup,
                data,
                timeout,
                response,
            } => {
                let result = manager
                    .handle(address)
                    .and_then(|h| transfers::control_out(h, setup, &data, timeout));
                let _ = response.send(result);
            }

            UsbCommand::SerialString {
                address,
                lang_id,
                timeout,
                response,
            } => {
                let result = manager.serial_index(address).and_then(|index| {
                    manager
                        .handle(address)
                        .and_then(|h| transfers::string_descriptor(h, index, lang_id, timeout))
                });
                let _ = response.send(result);
            }

            UsbCommand::ConfigDescriptor {
                address,
                timeout,
                response,
            } => {
                let result = manager
                    .handle(address)
                    .and_then(|h| transfers::config_descriptor(h, timeout));
                let _ = response.send(result);
            }

            UsbCommand::OpenEndpoint {
                address,
                endpoint,
                response,
            } => {
                debug!(
                    "Opening endpoint {:#04x} (interface {}) on {}",
                    endpoint.address, endpoint.interface, address
                );
                let _ = response.send(manager.claim_interface(address, endpoint.interface));
            }

            UsbCommand::BulkOut {
                address,
                endpoint,
                data,
                timeout,
                response,
            } => {
                let result = manager
                    .handle(address)
                    .and_then(|h| transfers::bulk_out(h, endpoint, &data, timeout));
                let _ = response.send(result);
            }

            UsbCommand::ReleaseEndpoint { address, endpoint } => {
                manager.release_interface(address, endpoint.interface);
            }

            // Intercepted by the run loop
            UsbCommand::Shutdown => {}
        }
    }
}

/// Interrupts the worker's event tick so a queued command runs immediately
#[derive(Clone)]
pub struct EventWaker {
    context: Context,
}

impl WakeWorker for EventWaker {
    fn wake(&self) {
        self.context.interrupt_handle_events();
    }
}

/// Spawn the USB worker thread
///
/// The USB context is created on the calling thread so a missing libusb is
/// reported here. The thread runs until a Shutdown command is received or the
/// driver side is dropped.
pub fn spawn_usb_worker(
    worker: UsbWorker,
    event_poll: Duration,
) -> anyhow::Result<(
    std::thread::JoinHandle<Result<(), rusb::Error>>,
    EventWaker,
)> {
    let context = Context::new().context("Failed to create USB context")?;
    let waker = EventWaker {
        context: context.clone(),
    };

    let handle = std::thread::Builder::new()
        .name("usb-worker".to_string())
        .spawn(move || {
            let worker_thread = UsbWorkerThread::new(context, worker, event_poll)?;
            worker_thread.run()
        })
        .context("Failed to spawn USB worker thread")?;

    Ok((handle, waker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::create_usb_bridge;

    #[test]
    fn test_usb_worker_creation() {
        let (_bridge, worker) = create_usb_bridge();

        // May fail without USB access; only the attempt is checked
        let context = match Context::new() {
            Ok(context) => context,
            Err(e) => {
                eprintln!("USB context creation failed (expected without libusb): {}", e);
                return;
            }
        };
        match UsbWorkerThread::new(context, worker, Duration::from_millis(10)) {
            Ok(_) => {}
            Err(e) => eprintln!("USB worker creation failed (expected without permissions): {}", e),
        }
    }

    #[test]
    fn test_waker_interrupts_event_tick() {
        let context = match Context::new() {
            Ok(context) => context,
            Err(e) => {
                eprintln!("USB context creation failed (expected without libusb): {}", e);
                return;
            }
        };
        let waker = EventWaker {
            context: context.clone(),
        };

        // A wake issued before the tick makes it return well before its bound
        waker.wake();
        let start = std::time::Instant::now();
        let _ = context.handle_events(Some(Duration::from_secs(2)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
