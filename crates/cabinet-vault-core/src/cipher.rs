//! Cipher codec for backup artifacts
//!
//! AES-256-GCM with a fresh 96-bit nonce per seal. The artifact stores the
//! nonce, ciphertext and tag as separate hex strings inside a small JSON
//! object, so the file stays text-safe:
//!
//! ```text
//! { "iv": "<24 hex>", "encryptedData": "<hex>", "authTag": "<32 hex>" }
//! ```
//!
//! The key is supplied out of band and never written to the artifact.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("encryption key must be 64 hex characters (32 bytes)")]
    InvalidKey,
    #[error("{0}")]
    MalformedEnvelope(String),
    #[error("authentication tag mismatch")]
    Authentication,
    #[error("{0}")]
    Encryption(String),
}

/// 256-bit key, zeroed when dropped
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    key: [u8; KEY_LEN],
}

impl EncryptionKey {
    /// Generate a new random key
    #[must_use]
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { key: bytes }
    }

    /// Parse a 64-character hex key. Surrounding whitespace is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::InvalidKey`] for anything that does not decode
    /// to exactly 32 bytes.
    pub fn from_hex(encoded: &str) -> Result<Self, CipherError> {
        let mut decoded = hex::decode(encoded.trim()).map_err(|_| CipherError::InvalidKey)?;
        let result = <[u8; KEY_LEN]>::try_from(decoded.as_slice())
            .map(Self::from_bytes)
            .map_err(|_| CipherError::InvalidKey);
        decoded.zeroize();
        result
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    /// Hex form, for printing a freshly generated key. Treat the result as
    /// secret.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.key)
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Encrypted-at-rest form of one snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_LEN],
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ArtifactEnvelope {
    iv: String,
    #[serde(rename = "encryptedData")]
    encrypted_data: String,
    #[serde(rename = "authTag")]
    auth_tag: String,
}

impl Envelope {
    /// Encode as the artifact's JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::Encryption`] if JSON encoding fails.
    pub fn to_artifact_bytes(&self) -> Result<Vec<u8>, CipherError> {
        let artifact = ArtifactEnvelope {
            iv: hex::encode(self.nonce),
            encrypted_data: hex::encode(&self.ciphertext),
            auth_tag: hex::encode(self.tag),
        };
        serde_json::to_vec_pretty(&artifact).map_err(|e| CipherError::Encryption(e.to_string()))
    }

    /// Decode the artifact's JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::MalformedEnvelope`] when the text is not the
    /// expected JSON object, a field is not hex, or the nonce or tag has the
    /// wrong length.
    pub fn from_artifact_bytes(bytes: &[u8]) -> Result<Self, CipherError> {
        let artifact: ArtifactEnvelope = serde_json::from_slice(bytes)
            .map_err(|e| CipherError::MalformedEnvelope(format!("invalid envelope: {e}")))?;

        let nonce = decode_fixed::<NONCE_LEN>("iv", &artifact.iv)?;
        let tag = decode_fixed::<TAG_LEN>("authTag", &artifact.auth_tag)?;
        let ciphertext = hex::decode(&artifact.encrypted_data).map_err(|e| {
            CipherError::MalformedEnvelope(format!("encryptedData is not valid hex: {e}"))
        })?;

        Ok(Self {
            nonce,
            ciphertext,
            tag,
        })
    }
}

fn decode_fixed<const N: usize>(field: &str, encoded: &str) -> Result<[u8; N], CipherError> {
    let bytes = hex::decode(encoded)
        .map_err(|e| CipherError::MalformedEnvelope(format!("{field} is not valid hex: {e}")))?;
    <[u8; N]>::try_from(bytes.as_slice()).map_err(|_| {
        CipherError::MalformedEnvelope(format!(
            "{field} must be {} bytes, got {}",
            N,
            bytes.len()
        ))
    })
}

/// Encrypt `plaintext` under `key` with a fresh random nonce.
///
/// # Errors
///
/// Returns [`CipherError::Encryption`] if the AEAD backend fails.
pub fn seal(plaintext: &[u8], key: &EncryptionKey) -> Result<Envelope, CipherError> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CipherError::Encryption(e.to_string()))?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let mut sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| CipherError::Encryption(e.to_string()))?;

    // aes-gcm appends the tag to the ciphertext
    let split = sealed
        .len()
        .checked_sub(TAG_LEN)
        .ok_or_else(|| CipherError::Encryption("ciphertext shorter than tag".into()))?;
    let tag = <[u8; TAG_LEN]>::try_from(&sealed[split..])
        .map_err(|_| CipherError::Encryption("unexpected tag length".into()))?;
    sealed.truncate(split);

    Ok(Envelope {
        nonce,
        ciphertext: sealed,
        tag,
    })
}

/// Verify and decrypt an envelope.
///
/// # Errors
///
/// Returns [`CipherError::Authentication`] when the tag does not verify,
/// whether the data was altered or the key is wrong. No plaintext is
/// returned in that case.
pub fn open(envelope: &Envelope, key: &EncryptionKey) -> Result<Vec<u8>, CipherError> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CipherError::Encryption(e.to_string()))?;

    let mut sealed = Vec::with_capacity(envelope.ciphertext.len() + TAG_LEN);
    sealed.extend_from_slice(&envelope.ciphertext);
    sealed.extend_from_slice(&envelope.tag);

    cipher
        .decrypt(Nonce::from_slice(&envelope.nonce), sealed.as_slice())
        .map_err(|_| CipherError::Authentication)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let key = EncryptionKey::generate();
        let plaintext = b"{\"timestamp\":\"2024-03-01T23:00:00.000Z\"}";

        let envelope = seal(plaintext, &key).unwrap();
        assert_ne!(envelope.ciphertext.as_slice(), plaintext.as_slice());

        let opened = open(&envelope, &key).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn property_roundtrip_random_payloads() {
        let key = EncryptionKey::generate();
        let mut rng = rand::thread_rng();

        for size in [0usize, 1, 15, 16, 17, 255, 4096] {
            let mut plaintext = vec![0u8; size];
            rng.fill_bytes(&mut plaintext);
            let envelope = seal(&plaintext, &key).expect("seal should succeed");
            let artifact = envelope.to_artifact_bytes().expect("encode should succeed");
            let decoded = Envelope::from_artifact_bytes(&artifact).expect("decode should succeed");
            assert_eq!(open(&decoded, &key).expect("open should succeed"), plaintext);
        }
    }

    #[test]
    fn test_every_ciphertext_bit_flip_detected() {
        let key = EncryptionKey::generate();
        let envelope = seal(b"patients: 3, paiement 65,00", &key).unwrap();

        for byte in 0..envelope.ciphertext.len() {
            for bit in 0..8 {
                let mut tampered = envelope.clone();
                tampered.ciphertext[byte] ^= 1 << bit;
                assert!(
                    matches!(open(&tampered, &key), Err(CipherError::Authentication)),
                    "flip at byte {byte} bit {bit} was not detected"
                );
            }
        }
    }

    #[test]
    fn test_every_tag_bit_flip_detected() {
        let key = EncryptionKey::generate();
        let envelope = seal(b"snapshot", &key).unwrap();

        for byte in 0..TAG_LEN {
            for bit in 0..8 {
                let mut tampered = envelope.clone();
                tampered.tag[byte] ^= 1 << bit;
                assert!(matches!(
                    open(&tampered, &key),
                    Err(CipherError::Authentication)
                ));
            }
        }
    }

    #[test]
    fn property_wrong_key_rejected() {
        let key_a = EncryptionKey::from_bytes([0x11u8; KEY_LEN]);
        let key_b = EncryptionKey::from_bytes([0x22u8; KEY_LEN]);
        let mut rng = rand::thread_rng();

        for _ in 0..32 {
            let mut plaintext = vec![0u8; (rng.next_u32() as usize % 1024) + 1];
            rng.fill_bytes(&mut plaintext);
            let envelope = seal(&plaintext, &key_a).unwrap();
            assert!(matches!(
                open(&envelope, &key_b),
                Err(CipherError::Authentication)
            ));
        }
    }

    #[test]
    fn test_nonce_is_fresh_per_seal() {
        let key = EncryptionKey::generate();
        let first = seal(b"same", &key).unwrap();
        let second = seal(b"same", &key).unwrap();
        assert_ne!(first.nonce, second.nonce);
        assert_ne!(first.ciphertext, second.ciphertext);
    }

    #[test]
    fn test_key_from_hex() {
        let key = EncryptionKey::generate();
        let parsed = EncryptionKey::from_hex(&format!("  {}\n", key.to_hex())).unwrap();
        assert_eq!(parsed.as_bytes(), key.as_bytes());

        assert!(matches!(
            EncryptionKey::from_hex("abcd"),
            Err(CipherError::InvalidKey)
        ));
        assert!(matches!(
            EncryptionKey::from_hex(&"zz".repeat(KEY_LEN)),
            Err(CipherError::InvalidKey)
        ));
        assert!(matches!(
            EncryptionKey::from_hex(&"ab".repeat(KEY_LEN + 1)),
            Err(CipherError::InvalidKey)
        ));
    }

    #[test]
    fn test_key_debug_redacted() {
        let key = EncryptionKey::from_bytes([0xABu8; KEY_LEN]);
        let debug = format!("{key:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("abab"));
    }

    #[test]
    fn test_artifact_field_lengths() {
        let key = EncryptionKey::generate();
        let artifact = seal(b"x", &key).unwrap().to_artifact_bytes().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&artifact).unwrap();

        assert_eq!(json["iv"].as_str().unwrap().len(), NONCE_LEN * 2);
        assert_eq!(json["authTag"].as_str().unwrap().len(), TAG_LEN * 2);
        assert!(json["encryptedData"].is_string());
    }

    #[test]
    fn test_malformed_envelopes() {
        let cases: [&[u8]; 5] = [
            b"not json",
            br#"{"iv":"00","encryptedData":"00"}"#,
            br#"{"iv":"zz","encryptedData":"00","authTag":"00000000000000000000000000000000"}"#,
            // 16-byte iv
            br#"{"iv":"00000000000000000000000000000000","encryptedData":"00","authTag":"00000000000000000000000000000000"}"#,
            br#"{"iv":"000000000000000000000000","encryptedData":"00","authTag":"0000"}"#,
        ];
        for case in cases {
            assert!(matches!(
                Envelope::from_artifact_bytes(case),
                Err(CipherError::MalformedEnvelope(_))
            ));
        }
    }
}
