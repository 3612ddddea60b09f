//! EDID retrieval and the mode catalogue seam
//!
//! The monitor's EDID block is read through the adapter's I2C bridge one byte
//! per control request (128 round trips), then handed to an [`EdidDecoder`].
//! Decoding and mode computation belong to the decoder; [`StandardModes`] is a
//! minimal built-in one.

use crate::record::DeviceRecord;
use common::TransferEngine;
use protocol::constants::{EDID_I2C_ADDRESS, I2C_RESPONSE_LEN, REQUEST_I2C_SUB_IO};
use protocol::{DloError, EDID_BLOCK_SIZE, EdidBlock, Result, SetupPacket, UsbError};
use std::fmt;
use tracing::debug;

/// A display timing the adapter can drive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayMode {
    pub width: u16,
    pub height: u16,
    /// Vertical refresh in Hz
    pub refresh: u8,
}

impl DisplayMode {
    pub const fn new(width: u16, height: u16, refresh: u8) -> Self {
        Self {
            width,
            height,
            refresh,
        }
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{}", self.width, self.height, self.refresh)
    }
}

/// Collaborator that turns an EDID block into supported modes
pub trait EdidDecoder {
    /// Modes assumed before (or without) an EDID
    fn default_modes(&self) -> Vec<DisplayMode>;

    /// Refine `modes` from a complete EDID block
    fn parse_edid(&mut self, edid: EdidBlock, modes: &mut Vec<DisplayMode>) -> Result<()>;
}

/// Read the EDID block of the monitor attached to `record` and pass it to
/// `decoder`, returning the decoder's result
///
/// A non-zero I2C status aborts the read; the partial block is dropped and the
/// decoder is not called.
pub fn read_edid<E: TransferEngine, D: EdidDecoder + ?Sized>(
    engine: &mut E,
    record: &mut DeviceRecord,
    decoder: &mut D,
) -> Result<()> {
    let address = record.connection()?.bus_address;
    let mut block = [0u8; EDID_BLOCK_SIZE];

    for (offset, byte) in (0u8..).zip(block.iter_mut()) {
        let setup = SetupPacket::vendor_in(
            REQUEST_I2C_SUB_IO,
            (offset as u16) << 8,
            EDID_I2C_ADDRESS,
            I2C_RESPONSE_LEN as u16,
        );
        let mut response = [0u8; I2C_RESPONSE_LEN];
        let received = engine.control_in(address, setup, &mut response, record.timeouts.control)?;
        if received < I2C_RESPONSE_LEN {
            return Err(UsbError::Other {
                message: format!("short I2C response at offset {}", offset),
            }
            .into());
        }

        let [status, data] = response;
        if status != 0 {
            return Err(DloError::I2cOperation { offset, status });
        }
        *byte = data;
    }

    debug!("Read EDID from {}", record.serial);
    decoder.parse_edid(EdidBlock(block), &mut record.modes)
}

/// Built-in mode catalogue
///
/// Offers a fixed list of common VESA timings and, given an EDID, keeps the
/// ones that fit inside the monitor's preferred timing.
#[derive(Debug, Clone, Default)]
pub struct StandardModes;

impl StandardModes {
    const HEADER: [u8; 8] = [0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00];
    /// First detailed timing descriptor
    const DTD_OFFSET: usize = 54;

    pub const MODES: [DisplayMode; 6] = [
        DisplayMode::new(1920, 1080, 60),
        DisplayMode::new(1280, 1024, 60),
        DisplayMode::new(1280, 720, 60),
        DisplayMode::new(1024, 768, 60),
        DisplayMode::new(800, 600, 60),
        DisplayMode::new(640, 480, 60),
    ];

    /// Check the fixed header and the block checksum
    pub fn validate(edid: &EdidBlock) -> Result<()> {
        let bytes = edid.as_bytes();
        if bytes[..8] != Self::HEADER {
            return Err(DloError::InvalidEdid("bad header".to_string()));
        }
        let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        if sum != 0 {
            return Err(DloError::InvalidEdid(format!("checksum off by {:#04x}", sum)));
        }
        Ok(())
    }

    /// Preferred timing from the first detailed timing descriptor
    pub fn preferred_mode(edid: &EdidBlock) -> Option<DisplayMode> {
        let d = &edid.as_bytes()[Self::DTD_OFFSET..Self::DTD_OFFSET + 18];

        // Pixel clock in 10 kHz units; zero marks a display descriptor
        let clock = u16::from_le_bytes([d[0], d[1]]) as u64 * 10_000;
        if clock == 0 {
            return None;
        }

        let h_active = d[2] as u64 | ((d[4] as u64 & 0xF0) << 4);
        let h_blank = d[3] as u64 | ((d[4] as u64 & 0x0F) << 8);
        let v_active = d[5] as u64 | ((d[7] as u64 & 0xF0) << 4);
        let v_blank = d[6] as u64 | ((d[7] as u64 & 0x0F) << 8);

        let total = (h_active + h_blank) * (v_active + v_blank);
        if total == 0 {
            return None;
        }
        let refresh = (clock + total / 2) / total;

        Some(DisplayMode::new(
            h_active as u16,
            v_active as u16,
            refresh.min(u8::MAX as u64) as u8,
        ))
    }
}

impl EdidDecoder for StandardModes {
    fn default_modes(&self) -> Vec<DisplayMode> {
        Self::MODES.to_vec()
    }

    fn parse_edid(&mut self, edid: EdidBlock, modes: &mut Vec<DisplayMode>) -> Result<()> {
        Self::validate(&edid)?;

        let Some(preferred) = Self::preferred_mode(&edid) else {
            debug!("EDID has no preferred timing, keeping {} modes", modes.len());
            return Ok(());
        };

        modes.retain(|m| m.width <= preferred.width && m.height <= preferred.height);
        if !modes.contains(&preferred) {
            modes.insert(0, preferred);
        }
        debug!("Preferred mode {}, {} modes usable", preferred, modes.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::sample_edid;

    #[test]
    fn test_sample_edid_is_valid() {
        assert!(StandardModes::validate(&EdidBlock(sample_edid())).is_ok());
    }

    #[test]
    fn test_bad_checksum_rejected() {
        let mut bytes = sample_edid();
        bytes[20] ^= 0x01;
        let err = StandardModes::validate(&EdidBlock(bytes)).unwrap_err();
        assert!(matches!(err, DloError::InvalidEdid(_)));
    }

    #[test]
    fn test_bad_header_rejected() {
        let err = StandardModes::validate(&EdidBlock::default()).unwrap_err();
        assert_eq!(err, DloError::InvalidEdid("bad header".to_string()));
    }

    #[test]
    fn test_preferred_mode_from_detailed_timing() {
        let mode = StandardModes::preferred_mode(&EdidBlock(sample_edid()));
        assert_eq!(mode, Some(DisplayMode::new(1024, 768, 60)));
    }

    #[test]
    fn test_parse_keeps_modes_that_fit() {
        let mut decoder = StandardModes;
        let mut modes = decoder.default_modes();

        decoder
            .parse_edid(EdidBlock(sample_edid()), &mut modes)
            .unwrap();

        assert_eq!(
            modes,
            vec![
                DisplayMode::new(1024, 768, 60),
                DisplayMode::new(800, 600, 60),
                DisplayMode::new(640, 480, 60),
            ]
        );
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(DisplayMode::new(800, 600, 60).to_string(), "800x600@60");
    }
}
