use std::fmt;

use aes_gcm::{
    AeadCore, Aes256Gcm, KeyInit, Nonce,
    aead::{Aead, OsRng},
};
use anyhow::{Result, anyhow};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

use crate::keys::KEY_LEN;

/// Version prefix of the stored text envelope: `v1:` + base64(nonce || ciphertext).
const ENVELOPE_PREFIX: &str = "v1:";

const NONCE_LEN: usize = 12;

/// Reversible transform applied to message content before it is stored.
///
/// Every `seal` uses a fresh nonce, so sealing the same text twice yields
/// different envelopes.
#[derive(Clone)]
pub struct Codec {
    cipher: Aes256Gcm,
}

impl Codec {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self {
            cipher: Aes256Gcm::new(&key.into()),
        }
    }

    pub fn seal(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        let mut packed = nonce.to_vec();
        packed.extend_from_slice(&ciphertext);

        Ok(format!("{}{}", ENVELOPE_PREFIX, BASE64.encode(packed)))
    }

    pub fn open(&self, envelope: &str) -> Result<String> {
        let encoded = envelope
            .strip_prefix(ENVELOPE_PREFIX)
            .ok_or_else(|| anyhow!("Unknown envelope format"))?;
        let packed = BASE64.decode(encoded)?;
        if packed.len() < NONCE_LEN {
            return Err(anyhow!("Envelope too short: {} bytes", packed.len()));
        }

        let (nonce, ciphertext) = packed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| anyhow!("Decryption failed: {}", e))?;

        Ok(String::from_utf8(plaintext)?)
    }
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codec").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_key;

    #[test]
    fn seal_open_roundtrip_preserves_text() {
        let codec = Codec::new(generate_key());
        for text in ["", "hello", "ünïcödé ✓", "你好世界 🦙", "line\nbreak\ttab"] {
            let sealed = codec.seal(text).unwrap();
            assert!(sealed.starts_with(ENVELOPE_PREFIX));
            assert_eq!(codec.open(&sealed).unwrap(), text);
        }
    }

    #[test]
    fn sealing_twice_differs() {
        let codec = Codec::new(generate_key());
        let a = codec.seal("same").unwrap();
        let b = codec.seal("same").unwrap();
        assert_ne!(a, b);
        assert!(!a.contains("same"));
    }

    #[test]
    fn open_rejects_foreign_and_tampered_input() {
        let codec = Codec::new(generate_key());
        assert!(codec.open("plain text").is_err());
        assert!(codec.open("v1:AAAA").is_err());

        let other = Codec::new(generate_key());
        let sealed = other.seal("not yours").unwrap();
        assert!(codec.open(&sealed).is_err());

        let mut flipped = BASE64.decode(&codec.seal("intact").unwrap()[3..]).unwrap();
        let last = flipped.len() - 1;
        flipped[last] ^= 1;
        let tampered = format!("{}{}", ENVELOPE_PREFIX, BASE64.encode(flipped));
        assert!(codec.open(&tampered).is_err());
    }

    #[test]
    fn debug_hides_key() {
        let codec = Codec::new([7u8; 32]);
        assert_eq!(format!("{:?}", codec), "Codec { .. }");
    }
}
