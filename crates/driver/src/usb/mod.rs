//! rusb backend: worker thread, device manager and the engine that talks to it

pub mod host;
pub mod manager;
pub mod transfers;
pub mod worker;

pub use host::{UsbHost, WakeWorker};
pub use worker::{EventWaker, UsbWorkerThread, spawn_usb_worker};
