//! DisplayLink adapter driver core
//!
//! Discovers adapters on the bus, identifies them by type and serial, opens
//! their bulk endpoint, reads the attached monitor's EDID and streams staged
//! command bytes to the device in chunks.
//!
//! The core is generic over [`common::TransferEngine`]; [`usb::UsbHost`]
//! provides the rusb-backed implementation.

pub mod channel_select;
pub mod config;
pub mod driver;
pub mod edid;
pub mod identify;
pub mod record;
pub mod registry;
pub mod session;
pub mod settings;
pub mod usb;
pub mod writer;

pub use config::DriverConfig;
pub use driver::Driver;
pub use edid::{DisplayMode, EdidDecoder, StandardModes};
pub use record::{Connection, DeviceRecord, StagingBuffer};
pub use registry::{Binding, Registry};
pub use settings::{DriverSettings, Timeouts};
