use aes_gcm::{Aes256Gcm, KeyInit, aead::OsRng};
use anyhow::{Result, bail};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

pub const KEY_LEN: usize = 32;

/// Fresh random content key.
pub fn generate_key() -> [u8; KEY_LEN] {
    Aes256Gcm::generate_key(OsRng).into()
}

pub fn key_to_base64(key: &[u8; KEY_LEN]) -> String {
    BASE64.encode(key)
}

/// Parse a key from configuration. Surrounding whitespace is ignored.
pub fn key_from_base64(encoded: &str) -> Result<[u8; KEY_LEN]> {
    let bytes = BASE64.decode(encoded.trim())?;
    match <[u8; KEY_LEN]>::try_from(bytes.as_slice()) {
        Ok(key) => Ok(key),
        Err(_) => bail!("key must be {} bytes, got {}", KEY_LEN, bytes.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_key_roundtrip() {
        let key = generate_key();
        let encoded = format!("  {}\n", key_to_base64(&key));
        assert_eq!(key_from_base64(&encoded).unwrap(), key);
        assert_ne!(generate_key(), key);
    }

    #[test]
    fn short_key_rejected() {
        let err = key_from_base64("c2hvcnQ=").unwrap_err();
        assert_eq!(err.to_string(), "key must be 32 bytes, got 5");
        assert!(key_from_base64("not base64!").is_err());
    }
}
