//! Serial string descriptor decoding
//!
//! USB string descriptors carry UTF-16LE text after a two byte header. The
//! serial number is transcoded to UTF-8 in two passes: the exact output
//! length is computed first, then the units are written into a buffer of
//! exactly that size.
//!
//! Each 16-bit unit is mapped on its own. Surrogate pairs are NOT reassembled:
//! a code point outside the BMP comes out as two independent 3-byte sequences.
//! The result is deterministic but not valid UTF-8 for such input, which is
//! why [`Serial`] holds bytes rather than a `String`.

use crate::types::Serial;
use byteorder::{ByteOrder, LittleEndian};

/// Bytes one UTF-16 unit occupies once transcoded
pub fn utf8_width(unit: u16) -> usize {
    if unit < 0x80 {
        1
    } else if unit < 0x800 {
        2
    } else {
        3
    }
}

/// First pass: exact transcoded length of `units`
pub fn utf8_len(units: impl IntoIterator<Item = u16>) -> usize {
    units.into_iter().map(utf8_width).sum()
}

/// Append the transcoding of one unit to `out`
fn push_unit(out: &mut Vec<u8>, unit: u16) {
    match utf8_width(unit) {
        1 => out.push(unit as u8),
        2 => {
            out.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
            out.push(0x80 | (unit & 0x3F) as u8);
        }
        _ => {
            out.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
            out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
            out.push(0x80 | (unit & 0x3F) as u8);
        }
    }
}

fn units(utf16le: &[u8]) -> impl Iterator<Item = u16> + '_ {
    utf16le.chunks_exact(2).map(LittleEndian::read_u16)
}

/// Transcode UTF-16LE bytes; a trailing odd byte is ignored
pub fn utf16le_to_utf8(utf16le: &[u8]) -> Vec<u8> {
    let len = utf8_len(units(utf16le));
    let mut out = Vec::with_capacity(len);
    for unit in units(utf16le) {
        push_unit(&mut out, unit);
    }
    debug_assert_eq!(out.len(), len);
    out
}

/// Decode a raw string descriptor (bLength, bDescriptorType, UTF-16LE...)
///
/// bLength is clamped to the bytes actually fetched. A zero or header-only
/// descriptor decodes to an empty serial.
pub fn decode_string_descriptor(desc: &[u8]) -> Serial {
    let declared = match desc.first() {
        Some(&len) => len as usize,
        None => return Serial::default(),
    };
    let end = declared.min(desc.len());
    if end <= 2 {
        return Serial::default();
    }
    Serial::new(utf16le_to_utf8(&desc[2..end]))
}
