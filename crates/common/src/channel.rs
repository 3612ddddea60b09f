//! Channel bridge between the driver and the USB worker thread
//!
//! The worker thread owns the USB context and every open device handle. The
//! driver side talks to it with [`UsbCommand`]s, each carrying a oneshot for
//! its completion, and receives hot-plug [`UsbEvent`]s back.

use async_channel::{Receiver, Sender, bounded};
use protocol::{BulkEndpoint, BusAddress, DeviceSummary, SetupPacket, UsbError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

/// Completion of a command executed on the worker thread
pub type Completion<T> = oneshot::Sender<Result<T, UsbError>>;

/// Commands from the driver to the USB thread
#[derive(Debug)]
pub enum UsbCommand {
    /// List all attached USB devices
    ListDevices {
        /// Channel to send response back
        response: oneshot::Sender<Vec<DeviceSummary>>,
    },

    /// Read vendor and product id
    VendorProduct {
        address: BusAddress,
        response: Completion<(u16, u16)>,
    },

    /// Control transfer, device-to-host
    ControlIn {
        address: BusAddress,
        setup: SetupPacket,
        timeout: Duration,
        /// Received bytes, at most `setup.length`
        response: Completion<Vec<u8>>,
    },

    /// Control transfer, host-to-device
    ControlOut {
        address: BusAddress,
        setup: SetupPacket,
        data: Vec<u8>,
        timeout: Duration,
        response: Completion<()>,
    },

    /// Fetch the raw serial number string descriptor
    SerialString {
        address: BusAddress,
        lang_id: u16,
        timeout: Duration,
        response: Completion<Vec<u8>>,
    },

    /// Fetch the raw configuration descriptor
    ConfigDescriptor {
        address: BusAddress,
        timeout: Duration,
        response: Completion<Vec<u8>>,
    },

    /// Claim the interface owning a bulk endpoint
    OpenEndpoint {
        address: BusAddress,
        endpoint: BulkEndpoint,
        response: Completion<()>,
    },

    /// Bulk OUT transfer; the response fires on completion
    BulkOut {
        address: BusAddress,
        endpoint: u8,
        data: Vec<u8>,
        timeout: Duration,
        response: Completion<()>,
    },

    /// Release the interface owning a bulk endpoint
    ReleaseEndpoint {
        address: BusAddress,
        endpoint: BulkEndpoint,
    },

    /// Shutdown the USB thread gracefully
    Shutdown,
}

/// Hot-plug events from the USB thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsbEvent {
    /// Device connected
    DeviceArrived {
        /// Address and ids of the new device
        device: DeviceSummary,
    },

    /// Device removed
    DeviceLeft {
        /// Address the device was reachable at
        address: BusAddress,
    },
}

/// Driver-side handle
#[derive(Clone)]
pub struct UsbBridge {
    cmd_tx: Sender<UsbCommand>,
    event_rx: Receiver<UsbEvent>,
}

impl UsbBridge {
    /// Send a command to the USB thread
    pub async fn send_command(&self, cmd: UsbCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Send a command to the USB thread from a blocking context
    pub fn send_command_blocking(&self, cmd: UsbCommand) -> crate::Result<()> {
        self.cmd_tx
            .send_blocking(cmd)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive an event from the USB thread
    pub async fn recv_event(&self) -> crate::Result<UsbEvent> {
        self.event_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Send a command built around a fresh oneshot and wait for its result
    ///
    /// Blocks the calling thread. Must not be called from inside an async
    /// runtime worker; use `spawn_blocking` there.
    pub fn request<T>(
        &self,
        build: impl FnOnce(Completion<T>) -> UsbCommand,
    ) -> crate::Result<Result<T, UsbError>> {
        let (tx, rx) = oneshot::channel();
        self.send_command_blocking(build(tx))?;
        rx.blocking_recv().map_err(|e| {
            debug!("USB worker dropped a completion: {}", e);
            crate::Error::Channel(e.to_string())
        })
    }
}

/// Handle for USB thread (blocking)
pub struct UsbWorker {
    pub(crate) cmd_rx: Receiver<UsbCommand>,
    /// Event sender (public for USB worker thread to access)
    pub event_tx: Sender<UsbEvent>,
}

impl UsbWorker {
    /// Receive a command (blocking)
    pub fn recv_command(&self) -> crate::Result<UsbCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive a command without blocking
    pub fn try_recv_command(&self) -> Option<UsbCommand> {
        self.cmd_rx.try_recv().ok()
    }

    /// True once every driver-side handle has been dropped
    pub fn is_closed(&self) -> bool {
        self.cmd_rx.is_closed()
    }

    /// Send an event to the driver side (blocking)
    pub fn send_event(&self, event: UsbEvent) -> crate::Result<()> {
        self.event_tx
            .send_blocking(event)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Create the channel bridge between the driver and USB thread
///
/// Returns (UsbBridge for the driver, UsbWorker for USB thread)
pub fn create_usb_bridge() -> (UsbBridge, UsbWorker) {
    let (cmd_tx, cmd_rx) = bounded(256);
    let (event_tx, event_rx) = bounded(256);

    (
        UsbBridge { cmd_tx, event_rx },
        UsbWorker { cmd_rx, event_tx },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_bridge() {
        let (bridge, worker) = create_usb_bridge();

        // Spawn a thread to simulate USB worker
        let handle = std::thread::spawn(move || {
            let cmd = worker.recv_command().unwrap();
            matches!(cmd, UsbCommand::ListDevices { .. })
        });

        let (tx, _rx) = oneshot::channel();
        bridge
            .send_command(UsbCommand::ListDevices { response: tx })
            .await
            .unwrap();

        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_blocking_request_round_trip() {
        let (bridge, worker) = create_usb_bridge();
        let address = BusAddress::new(1, 4);

        let handle = std::thread::spawn(move || {
            if let Ok(UsbCommand::VendorProduct { address, response }) = worker.recv_command() {
                assert_eq!(address, BusAddress::new(1, 4));
                let _ = response.send(Ok((0x17E9, 0x0141)));
            }
        });

        let ids = bridge
            .request(|response| UsbCommand::VendorProduct { address, response })
            .unwrap();
        assert_eq!(ids, Ok((0x17E9, 0x0141)));

        handle.join().unwrap();
    }

    #[test]
    fn test_request_fails_when_worker_drops_completion() {
        let (bridge, worker) = create_usb_bridge();

        let handle = std::thread::spawn(move || {
            let _ = worker.recv_command();
        });

        let result = bridge.request(|response| UsbCommand::VendorProduct {
            address: BusAddress::new(1, 1),
            response,
        });
        assert!(matches!(result, Err(crate::Error::Channel(_))));

        handle.join().unwrap();
    }
}
