//! rusb-backed transfer engine
//!
//! [`UsbHost`] implements [`TransferEngine`] by forwarding every primitive to
//! the USB worker thread over the [`UsbBridge`]. Control transfers block on
//! their completion. Bulk OUT transfers are queued and their completion is
//! polled through `endpoint_busy`; `pump` parks the caller until one arrives.

use common::{Completion, EngineResult, TransferEngine, UsbBridge, UsbCommand};
use protocol::{BulkEndpoint, BusAddress, DeviceSummary, SetupPacket, UsbError};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tracing::{debug, warn};

type BulkKey = (BusAddress, u8);

/// Cuts the worker's event-loop tick short once a command is queued
pub trait WakeWorker: Send {
    fn wake(&self);
}

pub struct UsbHost {
    bridge: UsbBridge,
    waker: Option<Box<dyn WakeWorker>>,
    /// Pending bulk completions keyed by (device, endpoint address)
    in_flight: HashMap<BulkKey, oneshot::Receiver<Result<(), UsbError>>>,
    /// Completions `pump` received that `endpoint_busy` has not reported yet
    completed: HashMap<BulkKey, Result<(), UsbError>>,
}

impl UsbHost {
    /// Host whose commands wait for the worker's next event tick
    pub fn new(bridge: UsbBridge) -> Self {
        Self {
            bridge,
            waker: None,
            in_flight: HashMap::new(),
            completed: HashMap::new(),
        }
    }

    /// Host that wakes the worker after every command it sends
    pub fn with_waker(bridge: UsbBridge, waker: Box<dyn WakeWorker>) -> Self {
        Self {
            waker: Some(waker),
            ..Self::new(bridge)
        }
    }

    pub fn bridge(&self) -> &UsbBridge {
        &self.bridge
    }

    /// Ask the worker thread to stop
    pub fn shutdown(self) {
        if !self.in_flight.is_empty() {
            debug!(
                "Shutting down with {} bulk transfers in flight",
                self.in_flight.len()
            );
        }
        if let Err(e) = self.send(UsbCommand::Shutdown) {
            warn!("Failed to send shutdown to USB worker: {}", e);
        }
    }

    fn send(&self, cmd: UsbCommand) -> common::Result<()> {
        self.bridge.send_command_blocking(cmd)?;
        if let Some(waker) = &self.waker {
            waker.wake();
        }
        Ok(())
    }

    fn call<T>(&self, build: impl FnOnce(Completion<T>) -> UsbCommand) -> EngineResult<T> {
        let (tx, rx) = oneshot::channel();
        self.send(build(tx)).map_err(bridge_error)?;
        rx.blocking_recv()
            .map_err(|e| bridge_error(common::Error::Channel(e.to_string())))?
    }
}

fn bridge_error(err: common::Error) -> UsbError {
    UsbError::Other {
        message: format!("USB worker unavailable: {}", err),
    }
}

fn dropped_completion() -> UsbError {
    UsbError::Other {
        message: "bulk completion dropped by USB worker".to_string(),
    }
}

/// Copy a worker-side buffer into the caller's, returning the copied length
fn copy_into(data: &[u8], buf: &mut [u8]) -> usize {
    let len = data.len().min(buf.len());
    buf[..len].copy_from_slice(&data[..len]);
    len
}

impl TransferEngine for UsbHost {
    fn list_devices(&mut self) -> EngineResult<Vec<DeviceSummary>> {
        let (tx, rx) = oneshot::channel();
        self.send(UsbCommand::ListDevices { response: tx })
            .map_err(bridge_error)?;
        rx.blocking_recv()
            .map_err(|e| bridge_error(common::Error::Channel(e.to_string())))
    }

    fn vendor_product(&mut self, address: BusAddress) -> EngineResult<(u16, u16)> {
        self.call(|response| UsbCommand::VendorProduct { address, response })
    }

    fn control_in(
        &mut self,
        address: BusAddress,
        setup: SetupPacket,
        buf: &mut [u8],
        timeout: Duration,
    ) -> EngineResult<usize> {
        let data = self.call(|response| UsbCommand::ControlIn {
            address,
            setup,
            timeout,
            response,
        })?;
        Ok(copy_into(&data, buf))
    }

    fn control_out(
        &mut self,
        address: BusAddress,
        setup: SetupPacket,
        data: &[u8],
        timeout: Duration,
    ) -> EngineResult<()> {
        let data = data.to_vec();
        self.call(|response| UsbCommand::ControlOut {
            address,
            setup,
            data,
            timeout,
            response,
        })
    }

    fn serial_string_descriptor(
        &mut self,
        address: BusAddress,
        lang_id: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> EngineResult<usize> {
        let data = self.call(|response| UsbCommand::SerialString {
            address,
            lang_id,
            timeout,
            response,
        })?;
        Ok(copy_into(&data, buf))
    }

    fn config_descriptor(
        &mut self,
        address: BusAddress,
        buf: &mut [u8],
        timeout: Duration,
    ) -> EngineResult<usize> {
        let data = self.call(|response| UsbCommand::ConfigDescriptor {
            address,
            timeout,
            response,
        })?;
        Ok(copy_into(&data, buf))
    }

    fn open_endpoint(&mut self, address: BusAddress, endpoint: BulkEndpoint) -> EngineResult<()> {
        self.call(|response| UsbCommand::OpenEndpoint {
            address,
            endpoint,
            response,
        })
    }

    fn submit_bulk(
        &mut self,
        address: BusAddress,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> EngineResult<()> {
        let (tx, rx) = oneshot::channel();
        self.send(UsbCommand::BulkOut {
            address,
            endpoint,
            data: data.to_vec(),
            timeout,
            response: tx,
        })
        .map_err(bridge_error)?;

        let key = (address, endpoint);
        self.completed.remove(&key);
        if self.in_flight.insert(key, rx).is_some() {
            warn!(
                "Bulk transfer on {} endpoint {:#04x} replaced an unobserved one",
                address, endpoint
            );
        }
        Ok(())
    }

    fn endpoint_busy(&mut self, address: BusAddress, endpoint: u8) -> EngineResult<bool> {
        let key = (address, endpoint);
        if let Some(result) = self.completed.remove(&key) {
            return result.map(|()| false);
        }
        let Some(rx) = self.in_flight.get_mut(&key) else {
            return Ok(false);
        };

        match rx.try_recv() {
            Err(TryRecvError::Empty) => Ok(true),
            Ok(result) => {
                self.in_flight.remove(&key);
                result.map(|()| false)
            }
            Err(TryRecvError::Closed) => {
                self.in_flight.remove(&key);
                Err(dropped_completion())
            }
        }
    }

    fn pump(&mut self) {
        // Bulk transfers carry their own timeout, so the worker always answers
        let Some(key) = self.in_flight.keys().next().copied() else {
            return;
        };
        let Some(rx) = self.in_flight.remove(&key) else {
            return;
        };
        let result = rx.blocking_recv().unwrap_or_else(|_| Err(dropped_completion()));
        self.completed.insert(key, result);
    }

    fn release_endpoint(&mut self, address: BusAddress, endpoint: BulkEndpoint) {
        let key = (address, endpoint.address);
        self.in_flight.remove(&key);
        self.completed.remove(&key);
        if let Err(e) = self.send(UsbCommand::ReleaseEndpoint { address, endpoint }) {
            warn!("Failed to release endpoint on {}: {}", address, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::create_usb_bridge;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingWaker(Arc<AtomicUsize>);

    impl WakeWorker for CountingWaker {
        fn wake(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_copy_into_truncates() {
        let mut buf = [0u8; 2];
        assert_eq!(copy_into(&[1, 2, 3], &mut buf), 2);
        assert_eq!(buf, [1, 2]);
    }

    #[test]
    fn test_bulk_completion_is_polled() {
        let (bridge, worker) = create_usb_bridge();
        let mut host = UsbHost::new(bridge);
        let address = BusAddress::new(2, 7);

        host.submit_bulk(address, 0x01, &[0xAA; 4], Duration::from_millis(50))
            .unwrap();

        let cmd = worker.try_recv_command().unwrap();
        let UsbCommand::BulkOut { data, response, .. } = cmd else {
            panic!("expected BulkOut");
        };
        assert_eq!(data, vec![0xAA; 4]);
        assert!(host.endpoint_busy(address, 0x01).unwrap());

        response.send(Err(UsbError::Pipe)).unwrap();
        assert_eq!(host.endpoint_busy(address, 0x01), Err(UsbError::Pipe));
        // Reported once
        assert_eq!(host.endpoint_busy(address, 0x01), Ok(false));
    }

    #[test]
    fn test_dropped_worker_reports_error() {
        let (bridge, worker) = create_usb_bridge();
        let mut host = UsbHost::new(bridge);
        drop(worker);

        assert!(matches!(
            host.vendor_product(BusAddress::new(1, 1)),
            Err(UsbError::Other { .. })
        ));
    }

    #[test]
    fn test_pump_waits_for_completion() {
        let (bridge, worker) = create_usb_bridge();
        let mut host = UsbHost::new(bridge);
        let address = BusAddress::new(2, 7);

        host.submit_bulk(address, 0x01, &[0x55; 8], Duration::from_millis(500))
            .unwrap();

        let responder = std::thread::spawn(move || {
            let Ok(UsbCommand::BulkOut { response, .. }) = worker.recv_command() else {
                panic!("expected BulkOut");
            };
            std::thread::sleep(Duration::from_millis(50));
            response.send(Ok(())).unwrap();
            worker
        });

        let mut pumps = 0;
        while host.endpoint_busy(address, 0x01).unwrap() {
            pumps += 1;
            host.pump();
        }
        assert!(pumps <= 1, "polled {} times for one chunk", pumps);
        assert_eq!(host.endpoint_busy(address, 0x01), Ok(false));
        responder.join().unwrap();
    }

    #[test]
    fn test_pump_reports_dropped_completion_once() {
        let (bridge, worker) = create_usb_bridge();
        let mut host = UsbHost::new(bridge);
        let address = BusAddress::new(1, 3);

        host.submit_bulk(address, 0x02, &[0x01], Duration::from_millis(50))
            .unwrap();
        drop(worker.try_recv_command());

        host.pump();
        assert!(matches!(
            host.endpoint_busy(address, 0x02),
            Err(UsbError::Other { .. })
        ));
        assert_eq!(host.endpoint_busy(address, 0x02), Ok(false));
    }

    #[test]
    fn test_every_command_wakes_worker() {
        let (bridge, worker) = create_usb_bridge();
        let wakes = Arc::new(AtomicUsize::new(0));
        let mut host = UsbHost::with_waker(bridge, Box::new(CountingWaker(wakes.clone())));
        let address = BusAddress::new(4, 9);

        let responder = std::thread::spawn(move || {
            let Ok(UsbCommand::VendorProduct { response, .. }) = worker.recv_command() else {
                panic!("expected VendorProduct");
            };
            response.send(Ok((0x17e9, 0x0198))).unwrap();
            worker
        });
        assert_eq!(host.vendor_product(address), Ok((0x17e9, 0x0198)));
        assert_eq!(wakes.load(Ordering::SeqCst), 1);
        let worker = responder.join().unwrap();

        host.submit_bulk(address, 0x01, &[0xAA], Duration::from_millis(50))
            .unwrap();
        host.release_endpoint(
            address,
            BulkEndpoint {
                interface: 0,
                address: 0x01,
                max_packet_size: 512,
            },
        );
        assert_eq!(wakes.load(Ordering::SeqCst), 3);

        host.shutdown();
        assert_eq!(wakes.load(Ordering::SeqCst), 4);
        drop(worker);
    }
}
