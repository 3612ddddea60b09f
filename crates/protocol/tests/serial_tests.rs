//! Property tests for serial string decoding

use proptest::prelude::*;
use protocol::{decode_string_descriptor, utf8_len, utf16le_to_utf8};

fn to_le(units: &[u16]) -> Vec<u8> {
    units.iter().flat_map(|u| u.to_le_bytes()).collect()
}

proptest! {
    #[test]
    fn ascii_decodes_byte_identical(text in "[\\x00-\\x7F]{0,126}") {
        let units: Vec<u16> = text.encode_utf16().collect();
        prop_assert_eq!(utf16le_to_utf8(&to_le(&units)), text.as_bytes().to_vec());
    }

    #[test]
    fn precomputed_length_matches_output(units in proptest::collection::vec(any::<u16>(), 0..126)) {
        let expected = utf8_len(units.iter().copied());
        prop_assert_eq!(utf16le_to_utf8(&to_le(&units)).len(), expected);
    }

    #[test]
    fn bmp_text_matches_std(text in "[\\u{0}-\\u{D7FF}\\u{E000}-\\u{FFFF}]{0,60}") {
        let units: Vec<u16> = text.encode_utf16().collect();
        prop_assert_eq!(utf16le_to_utf8(&to_le(&units)), text.as_bytes().to_vec());
    }

    #[test]
    fn descriptor_header_is_skipped(text in "[A-Z0-9]{1,40}") {
        let units: Vec<u16> = text.encode_utf16().collect();
        let mut desc = vec![(2 + units.len() * 2) as u8, 0x03];
        desc.extend(to_le(&units));
        let decoded = decode_string_descriptor(&desc);
        prop_assert_eq!(decoded.as_bytes(), text.as_bytes());
    }
}
