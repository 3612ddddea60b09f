//! Protocol library for the display adapter driver
//!
//! This crate holds everything about the adapter's USB protocol that can be
//! expressed without performing I/O: wire constants, setup packets, device
//! family classification, configuration descriptor parsing and serial string
//! decoding, plus the error taxonomy every driver operation returns.
//!
//! # Example
//!
//! ```
//! use protocol::{DeviceType, decode_string_descriptor};
//!
//! // "A1" as a string descriptor
//! let desc = [6, 0x03, b'A', 0, b'1', 0];
//! assert_eq!(decode_string_descriptor(&desc).as_bytes(), b"A1");
//!
//! assert_eq!(DeviceType::from_type_byte(0xB3), DeviceType::Base);
//! ```

pub mod constants;
pub mod descriptor;
pub mod error;
pub mod serial;
pub mod types;

pub use constants::{EDID_BLOCK_SIZE, LANG_ID_ENGLISH, STD_CHANNEL, VENDOR_ID};
pub use descriptor::{ConfigDescriptor, find_bulk_out};
pub use error::{DescriptorFault, DloError, Result};
pub use serial::{decode_string_descriptor, utf16le_to_utf8, utf8_len};
pub use types::{
    BulkEndpoint, BusAddress, DeviceSummary, DeviceType, Direction, EdidBlock, Serial,
    SetupPacket, UsbError,
};
