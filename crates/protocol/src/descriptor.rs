//! Configuration descriptor parsing
//!
//! Walks a raw configuration descriptor to find the bulk OUT endpoint of the
//! first vendor-specific interface. The walk is bounded by the descriptor's
//! declared total length (clamped to the bytes actually fetched) and every
//! sub-descriptor is checked to end inside that bound before it is read, so
//! malformed input yields a [`DescriptorFault`] instead of an out-of-range read.
//!
//! Layout handled, in order:
//!
//! ```text
//! configuration
//!   [interface association]      -> groups bInterfaceCount interfaces
//!   interface (alt 0)
//!     [class-specific ...]
//!     [endpoint ...]
//!     [interface (alt n > 0) ...] -> same span as alt 0
//!   interface (alt 0)             -> next span
//! ```

use crate::constants::{
    CLASS_VENDOR_SPECIFIC, DESC_ENDPOINT, DESC_INTERFACE, DESC_INTERFACE_ASSOCIATION,
    ENDPOINT_DESC_LEN, IAD_DESC_LEN, INTERFACE_DESC_LEN,
};
use crate::error::DescriptorFault;
use crate::types::BulkEndpoint;
use byteorder::{ByteOrder, LittleEndian};

type ParseResult<T> = std::result::Result<T, DescriptorFault>;

/// A configuration descriptor bounded by its declared total length
#[derive(Debug, Clone, Copy)]
pub struct ConfigDescriptor<'a> {
    bytes: &'a [u8],
}

impl<'a> ConfigDescriptor<'a> {
    /// Bound `raw` by its wTotalLength
    ///
    /// A declared length larger than `raw` is clamped to `raw`; bytes past the
    /// declared length are never looked at.
    pub fn new(raw: &'a [u8]) -> ParseResult<Self> {
        if raw.len() < 4 {
            return Err(DescriptorFault::Truncated);
        }
        let declared = LittleEndian::read_u16(&raw[2..4]) as usize;
        let total = declared.min(raw.len());
        Ok(Self {
            bytes: &raw[..total],
        })
    }

    /// Number of bytes the parser may read
    pub fn total_len(&self) -> usize {
        self.bytes.len()
    }

    /// Locate the first bulk OUT endpoint of the first vendor-specific interface
    pub fn find_bulk_out(&self) -> ParseResult<BulkEndpoint> {
        let bytes = self.bytes;
        let end = bytes.len();

        let (config_len, _) = header(bytes, 0)?;
        let mut pos = config_len;

        while pos < end {
            let mut assoc_count = 1u8;

            let (len, kind) = header(bytes, pos)?;
            if kind == DESC_INTERFACE_ASSOCIATION {
                if len < IAD_DESC_LEN {
                    return Err(DescriptorFault::Truncated);
                }
                assoc_count = bytes[pos + 3];
                pos += len;
            }

            let (len, kind) = header(bytes, pos)?;
            if kind != DESC_INTERFACE {
                return Err(DescriptorFault::UnexpectedDescriptor);
            }
            if len < INTERFACE_DESC_LEN {
                return Err(DescriptorFault::Truncated);
            }

            let span = interface_span(bytes, pos, assoc_count)?;
            if span < INTERFACE_DESC_LEN {
                return Err(DescriptorFault::Truncated);
            }

            if bytes[pos + 5] == CLASS_VENDOR_SPECIFIC {
                return bulk_out_in_span(&bytes[pos..pos + span]);
            }

            pos += span;
        }

        Err(DescriptorFault::NoVendorInterface)
    }
}

/// Parse `raw` and locate the vendor bulk OUT endpoint
pub fn find_bulk_out(raw: &[u8]) -> ParseResult<BulkEndpoint> {
    ConfigDescriptor::new(raw)?.find_bulk_out()
}

/// Read (bLength, bDescriptorType) at `pos`, checking the whole descriptor
/// ends inside `bytes`
fn header(bytes: &[u8], pos: usize) -> ParseResult<(usize, u8)> {
    let (len, kind) = match bytes.get(pos..pos + 2) {
        Some(h) => (h[0] as usize, h[1]),
        None => return Err(DescriptorFault::Truncated),
    };
    if len < 2 || pos + len > bytes.len() {
        return Err(DescriptorFault::Truncated);
    }
    Ok((len, kind))
}

/// Length of `count` interfaces starting at `start`, including their
/// alternate settings, class-specific descriptors and endpoints
///
/// Stops at the next interface association, at the next alt-0 interface once
/// `count` interfaces are consumed, or at the end of the buffer.
fn interface_span(bytes: &[u8], start: usize, count: u8) -> ParseResult<usize> {
    let max = bytes.len() - start;
    let mut len = 0;

    for _ in 0..count {
        if len >= max {
            break;
        }
        let (first, _) = header(bytes, start + len)?;
        len += first;

        while len < max {
            let pos = start + len;
            let (desc_len, kind) = header(bytes, pos)?;

            if kind == DESC_INTERFACE_ASSOCIATION {
                return Ok(len);
            }
            if kind == DESC_INTERFACE {
                if desc_len < INTERFACE_DESC_LEN {
                    return Err(DescriptorFault::Truncated);
                }
                if bytes[pos + 3] == 0 {
                    break;
                }
            }
            len += desc_len;
        }
    }

    Ok(len)
}

fn bulk_out_in_span(span: &[u8]) -> ParseResult<BulkEndpoint> {
    let interface = span[2];
    let mut pos = 0;

    while pos < span.len() {
        let (len, kind) = header(span, pos)?;
        if kind == DESC_ENDPOINT {
            if len < ENDPOINT_DESC_LEN {
                return Err(DescriptorFault::Truncated);
            }
            let address = span[pos + 2];
            let attributes = span[pos + 3];
            let is_out = address & 0x80 == 0;
            let is_bulk = attributes & 0x03 == 0x02;
            if is_out && is_bulk {
                return Ok(BulkEndpoint {
                    interface,
                    address,
                    max_packet_size: LittleEndian::read_u16(&span[pos + 4..pos + 6]),
                });
            }
        }
        pos += len;
    }

    Err(DescriptorFault::NoBulkOut)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(body: &[u8]) -> Vec<u8> {
        let total = (9 + body.len()) as u16;
        let mut out = vec![9, 0x02, total as u8, (total >> 8) as u8, 1, 1, 0, 0x80, 50];
        out.extend_from_slice(body);
        out
    }

    fn interface(number: u8, alt: u8, endpoints: u8, class: u8) -> [u8; 9] {
        [9, 0x04, number, alt, endpoints, class, 0, 0, 0]
    }

    fn endpoint(address: u8, attributes: u8) -> [u8; 7] {
        [7, 0x05, address, attributes, 0x00, 0x02, 0]
    }

    #[test]
    fn test_header_rejects_zero_length() {
        assert_eq!(header(&[0, 4, 0, 0], 0), Err(DescriptorFault::Truncated));
    }

    #[test]
    fn test_span_stops_at_next_interface() {
        let mut body = Vec::new();
        body.extend_from_slice(&interface(0, 0, 1, 0x03));
        body.extend_from_slice(&endpoint(0x81, 0x03));
        body.extend_from_slice(&interface(1, 0, 1, 0xFF));
        let raw = config(&body);

        let span = interface_span(&raw, 9, 1).unwrap();
        assert_eq!(span, 16);
    }

    #[test]
    fn test_span_includes_alternate_settings() {
        let mut body = Vec::new();
        body.extend_from_slice(&interface(0, 0, 0, 0xFF));
        body.extend_from_slice(&interface(0, 1, 1, 0xFF));
        body.extend_from_slice(&endpoint(0x01, 0x02));
        let raw = config(&body);

        let span = interface_span(&raw, 9, 1).unwrap();
        assert_eq!(span, 25);
    }

    #[test]
    fn test_declared_length_is_clamped() {
        let raw = [9, 0x02, 0xFF, 0x00, 1, 1, 0, 0x80, 50];
        let desc = ConfigDescriptor::new(&raw).unwrap();
        assert_eq!(desc.total_len(), 9);
        assert_eq!(desc.find_bulk_out(), Err(DescriptorFault::NoVendorInterface));
    }

    #[test]
    fn test_too_short_for_header() {
        assert_eq!(
            ConfigDescriptor::new(&[9, 0x02]).unwrap_err(),
            DescriptorFault::Truncated
        );
    }
}
