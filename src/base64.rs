//! MEGA-style URL-safe base64 encoding/decoding.
//!
//! Key material in session records is stored in this form:
//! - `+` becomes `-`
//! - `/` becomes `_`
//! - padding `=` is dropped

use base64::{engine::general_purpose, Engine};

/// Encode bytes to URL-safe base64 (no padding).
///
/// # Example
/// ```
/// use megashell::base64::base64url_encode;
/// let encoded = base64url_encode(b"hello");
/// assert!(!encoded.contains('='));
/// assert!(!encoded.contains('+'));
/// assert!(!encoded.contains('/'));
/// ```
pub fn base64url_encode(data: &[u8]) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(data)
}

/// Decode URL-safe base64 to bytes.
///
/// Accepts padded input and the standard alphabet as well, since older
/// records were written by tools that did not strip them.
///
/// # Example
/// ```
/// use megashell::base64::{base64url_encode, base64url_decode};
/// let original = b"hello world";
/// let encoded = base64url_encode(original);
/// let decoded = base64url_decode(&encoded).unwrap();
/// assert_eq!(decoded, original);
/// ```
pub fn base64url_decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let normalized = s.trim_end_matches('=').replace('+', "-").replace('/', "_");
    general_purpose::URL_SAFE_NO_PAD.decode(normalized)
}

/// Serde adapter for a fixed 16-byte key.
pub(crate) mod key16 {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(key: &[u8; 16], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::base64url_encode(key))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 16], D::Error> {
        let encoded = String::deserialize(d)?;
        let bytes = super::base64url_decode(&encoded).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|v: Vec<u8>| D::Error::custom(format!("expected 16 key bytes, got {}", v.len())))
    }
}

/// Serde adapter for an optional 16-byte key.
pub(crate) mod key16_opt {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct Wrapped(#[serde(with = "super::key16")] [u8; 16]);

    pub fn serialize<S: Serializer>(key: &Option<[u8; 16]>, s: S) -> Result<S::Ok, S::Error> {
        key.map(Wrapped).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<[u8; 16]>, D::Error> {
        Ok(Option::<Wrapped>::deserialize(d)?.map(|w| w.0))
    }
}

/// Serde adapter for variable-length key bytes.
pub(crate) mod bytes {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::base64url_encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        super::base64url_decode(&encoded).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let original = b"Hello, MEGA!";
        let encoded = base64url_encode(original);
        let decoded = base64url_decode(&encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_url_safe_chars() {
        let data: Vec<u8> = (0..255).collect();
        let encoded = base64url_encode(&data);
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        assert!(!encoded.contains('='));
    }

    #[test]
    fn test_decode_accepts_padding_and_standard_alphabet() {
        let data: Vec<u8> = (0..64).map(|i| i * 4).collect();
        let standard = general_purpose::STANDARD.encode(&data);
        assert_eq!(base64url_decode(&standard).unwrap(), data);
    }

    #[test]
    fn test_key16_rejects_wrong_length() {
        #[derive(serde::Deserialize)]
        struct Holder {
            #[serde(with = "key16")]
            #[allow(dead_code)]
            key: [u8; 16],
        }
        let json = format!(r#"{{"key":"{}"}}"#, base64url_encode(&[1u8; 8]));
        assert!(serde_json::from_str::<Holder>(&json).is_err());
    }
}
