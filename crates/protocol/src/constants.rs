//! Wire constants for the display adapter's vendor protocol
//!
//! Request codes, the vendor identifier and fixed payloads used on the
//! control pipe, plus the standard USB descriptor codes the parser needs.

/// USB vendor identifier carried by every supported adapter
pub const VENDOR_ID: u16 = 0x17E9;

/// Vendor request: device type / status query (control IN)
pub const REQUEST_STATUS: u8 = 0x06;

/// Vendor request: channel selection (control OUT)
pub const REQUEST_CHANNEL: u8 = 0x12;

/// Vendor request: I2C sub-address read (control IN)
pub const REQUEST_I2C_SUB_IO: u8 = 0x02;

/// Length of the status query response
pub const STATUS_RESPONSE_LEN: usize = 6;

/// Byte of the status response that carries the device family
pub const STATUS_TYPE_BYTE: usize = 3;

/// Payload that authorizes the default data channel
pub const STD_CHANNEL: [u8; 16] = [
    0x57, 0xCD, 0xDC, 0xA7, 0x1C, 0x88, 0x5E, 0x15, 0x60, 0xFE, 0xC6, 0x97, 0x16, 0x3D, 0x47, 0xF2,
];

/// I2C sub-address of the monitor's EDID EEPROM (read address)
pub const EDID_I2C_ADDRESS: u16 = 0xA1;

/// Size of a base EDID block
pub const EDID_BLOCK_SIZE: usize = 128;

/// Each I2C sub-read returns (status, data)
pub const I2C_RESPONSE_LEN: usize = 2;

/// String descriptor language id (English, United States)
pub const LANG_ID_ENGLISH: u16 = 0x0409;

/// Size of the buffer a serial string descriptor is fetched into
pub const STRING_DESCRIPTOR_CAPACITY: usize = 255;

/// Size of the buffer a configuration descriptor is fetched into
pub const CONFIG_DESCRIPTOR_CAPACITY: usize = 256;

// Standard descriptor types [USB 2.0 §9.4, table 9-5] and IAD [ECN]
pub const DESC_CONFIGURATION: u8 = 0x02;
pub const DESC_STRING: u8 = 0x03;
pub const DESC_INTERFACE: u8 = 0x04;
pub const DESC_ENDPOINT: u8 = 0x05;
pub const DESC_INTERFACE_ASSOCIATION: u8 = 0x0B;

/// Standard request GET_DESCRIPTOR
pub const REQUEST_GET_DESCRIPTOR: u8 = 0x06;

/// Interface class code for vendor-specific interfaces
pub const CLASS_VENDOR_SPECIFIC: u8 = 0xFF;

/// Minimum valid interface descriptor length
pub const INTERFACE_DESC_LEN: usize = 9;

/// Minimum valid endpoint descriptor length
pub const ENDPOINT_DESC_LEN: usize = 7;

/// Minimum valid interface association descriptor length
pub const IAD_DESC_LEN: usize = 8;
