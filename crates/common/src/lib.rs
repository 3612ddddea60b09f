//! Common plumbing for the display adapter driver
//!
//! This crate sits between the pure protocol definitions and the driver: the
//! [`TransferEngine`] seam, the async channel bridge used to reach the USB
//! worker thread, logging setup and shared error handling.

pub mod channel;
pub mod engine;
pub mod error;
pub mod logging;
pub mod test_utils;

pub use channel::{Completion, UsbBridge, UsbCommand, UsbEvent, UsbWorker, create_usb_bridge};
pub use engine::{EngineResult, TransferEngine};
pub use error::{Error, Result};
pub use logging::{LogFormat, setup_logging};
