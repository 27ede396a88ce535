//! Lowercase hex codec for request/response bodies

use thiserror::Error;

/// Errors produced when decoding a hex string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HexError {
    #[error("hex string length must be even, got {0}")]
    OddLength(usize),

    #[error("invalid hex character {ch:?} at position {index}")]
    InvalidCharacter { ch: char, index: usize },
}

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Encode bytes as lowercase hex, two digits per byte
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX_DIGITS[(byte >> 4) as usize] as char);
        out.push(HEX_DIGITS[(byte & 0x0f) as usize] as char);
    }
    out
}

/// Decode a hex string produced by [`to_hex`]
///
/// Upper-case digits are accepted; anything else that is not a hex digit
/// is rejected rather than silently skipped.
pub fn from_hex(hex: &str) -> Result<Vec<u8>, HexError> {
    if let Some((index, ch)) = hex.char_indices().find(|(_, c)| !c.is_ascii_hexdigit()) {
        return Err(HexError::InvalidCharacter { ch, index });
    }
    if hex.len() % 2 != 0 {
        return Err(HexError::OddLength(hex.len()));
    }

    Ok(hex
        .as_bytes()
        .chunks_exact(2)
        .map(|pair| (nibble(pair[0]) << 4) | nibble(pair[1]))
        .collect())
}

// Input is already known to be an ASCII hex digit.
fn nibble(byte: u8) -> u8 {
    match byte {
        b'0'..=b'9' => byte - b'0',
        b'a'..=b'f' => byte - b'a' + 10,
        _ => byte - b'A' + 10,
    }
}

/// Serde adapter carrying an optional body as an optional hex string
///
/// `None` is skipped on the wire (see `skip_serializing_if`), which keeps
/// "no body" distinct from an empty body (`""`).
pub mod hex_body {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(data: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match data {
            Some(bytes) => serializer.serialize_some(&super::to_hex(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(hex) => super::from_hex(&hex).map(Some).map_err(D::Error::custom),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_hex_is_lowercase_and_padded() {
        assert_eq!(to_hex(&[0x00, 0x0f, 0xa0, 0xff]), "000fa0ff");
        assert_eq!(to_hex(b"pong"), "706f6e67");
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(to_hex(&[]), "");
        assert_eq!(from_hex("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_round_trip_all_byte_values() {
        let bytes: Vec<u8> = (0..=255u8).collect();
        let encoded = to_hex(&bytes);

        assert_eq!(encoded.len(), 512);
        assert!(encoded.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert_eq!(from_hex(&encoded).unwrap(), bytes);
    }

    #[test]
    fn test_uppercase_is_accepted() {
        assert_eq!(from_hex("DEADbeef").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn test_odd_length_rejected() {
        assert_eq!(from_hex("abc"), Err(HexError::OddLength(3)));
    }

    #[test]
    fn test_invalid_character_rejected() {
        assert_eq!(
            from_hex("0g"),
            Err(HexError::InvalidCharacter { ch: 'g', index: 1 })
        );
        assert!(from_hex("zz").is_err());
        assert!(from_hex(" 1").is_err());
    }
}
