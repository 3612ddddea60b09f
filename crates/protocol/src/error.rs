//! Driver error types

use crate::types::{Serial, UsbError};
use thiserror::Error;

/// Why the descriptor parser could not produce an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorFault {
    /// No interface with the vendor-specific class
    NoVendorInterface,
    /// The vendor interface has no bulk OUT endpoint
    NoBulkOut,
    /// A descriptor would extend past the declared total length
    Truncated,
    /// An interface descriptor was expected but something else was found
    UnexpectedDescriptor,
}

impl std::fmt::Display for DescriptorFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            DescriptorFault::NoVendorInterface => "no vendor-specific interface",
            DescriptorFault::NoBulkOut => "no bulk OUT endpoint",
            DescriptorFault::Truncated => "descriptor runs past total length",
            DescriptorFault::UnexpectedDescriptor => "unexpected descriptor type",
        };
        f.write_str(reason)
    }
}

/// Errors returned by every driver operation
///
/// None of these are fatal to the process; each is handed back to the caller,
/// which owns retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DloError {
    /// The vendor id is not the adapter vendor's
    #[error("Unsupported device: vendor id {vendor_id:#06x}")]
    UnsupportedDevice { vendor_id: u16 },

    /// A control or bulk transfer failed or timed out
    #[error("Transfer error: {0}")]
    Transfer(#[from] UsbError),

    /// The configuration descriptor has no consistent bulk OUT endpoint
    #[error("Corrupt descriptor: {0}")]
    CorruptDescriptor(DescriptorFault),

    /// The device reported an I2C failure during an EDID read
    #[error("I2C operation failed at offset {offset} (status {status:#04x})")]
    I2cOperation { offset: u8, status: u8 },

    /// The device has not been opened and claimed
    #[error("Device not claimed")]
    NotClaimed,

    /// A buffer could not be allocated
    #[error("Allocation of {requested} bytes failed")]
    AllocationFailure { requested: usize },

    /// The record has no live connection to the bus
    #[error("Device disconnected")]
    Disconnected,

    /// Appending to the staging buffer would exceed its capacity
    #[error("Staging buffer overflow: needed {needed}, available {available}")]
    StagingOverflow { needed: usize, available: usize },

    /// The EDID decoder rejected the block
    #[error("Invalid EDID: {0}")]
    InvalidEdid(String),

    /// No record exists for the serial
    #[error("No device record for serial {0}")]
    UnknownDevice(Serial),
}

impl From<DescriptorFault> for DloError {
    fn from(fault: DescriptorFault) -> Self {
        DloError::CorruptDescriptor(fault)
    }
}

/// Type alias for driver results
pub type Result<T> = std::result::Result<T, DloError>;
