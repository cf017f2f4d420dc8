//! AES-256-GCM encryption with context-tagged AAD
//!
//! Wire format: `IV(12B) || ciphertext || tag(16B)`. The AAD is the name of
//! the field the value belongs to ("value", "refresh_token",
//! "service_token", …); decrypting under a different AAD fails, which
//! defeats ciphertext-swap attacks between columns. Raw-byte and
//! base64-wrapped variants exist; callers pick one per table.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::error::CryptoError;

/// Nonce length in bytes (96-bit IV).
const NONCE_LEN: usize = 12;
/// GCM tag length in bytes; trailing part of the ciphertext.
const TAG_LEN: usize = 16;

/// A parsed 32-byte AES-256 key.
#[derive(Clone)]
pub struct EncryptionKey {
    bytes: [u8; 32],
}

impl EncryptionKey {
    /// Parse a key from its 64-hex-char representation.
    ///
    /// The all-zero key is rejected unless `allow_zero` is set (CI runs).
    pub fn from_hex(hex_key: &str, allow_zero: bool) -> Result<Self, CryptoError> {
        let decoded = hex::decode(hex_key.trim()).map_err(|_| CryptoError::InvalidKeyFormat)?;
        let bytes: [u8; 32] = decoded
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyFormat)?;
        if bytes.iter().all(|b| *b == 0) {
            if allow_zero {
                tracing::warn!("encryption key is all zeros; acceptable only in CI");
            } else {
                return Err(CryptoError::AllZeroKey);
            }
        }
        Ok(Self { bytes })
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Raw key bytes, needed for HMAC export signing.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(&self.bytes))
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material never reaches logs
        f.write_str("EncryptionKey(..)")
    }
}

/// Encrypt `plaintext` with the field name as AAD.
pub fn encrypt(key: &EncryptionKey, plaintext: &str, aad: &str) -> Result<Vec<u8>, CryptoError> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = key
        .cipher()
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext.as_bytes(),
                aad: aad.as_bytes(),
            },
        )
        .map_err(|_| CryptoError::EncryptionFailed {
            context: aad.to_string(),
        })?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a blob produced by [`encrypt`] under the same AAD.
pub fn decrypt(key: &EncryptionKey, blob: &[u8], aad: &str) -> Result<String, CryptoError> {
    if blob.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::CiphertextTooShort { len: blob.len() });
    }
    let nonce = Nonce::from_slice(&blob[..NONCE_LEN]);
    let plaintext = key
        .cipher()
        .decrypt(
            nonce,
            Payload {
                msg: &blob[NONCE_LEN..],
                aad: aad.as_bytes(),
            },
        )
        .map_err(|_| CryptoError::DecryptionFailed {
            context: aad.to_string(),
        })?;

    String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptionFailed {
        context: aad.to_string(),
    })
}

/// Base64-wrapped variant of [`encrypt`], for text columns.
pub fn encrypt_b64(key: &EncryptionKey, plaintext: &str, aad: &str) -> Result<String, CryptoError> {
    Ok(BASE64.encode(encrypt(key, plaintext, aad)?))
}

/// Base64-wrapped variant of [`decrypt`].
pub fn decrypt_b64(key: &EncryptionKey, encoded: &str, aad: &str) -> Result<String, CryptoError> {
    let blob = BASE64.decode(encoded)?;
    decrypt(key, &blob, aad)
}

/// Decrypt under `old_key` and re-encrypt under `new_key`, preserving the
/// AAD. Used by the key-rotation walk; a decrypt failure aborts the row.
pub fn reencrypt(
    old_key: &EncryptionKey,
    new_key: &EncryptionKey,
    blob: &[u8],
    aad: &str,
) -> Result<Vec<u8>, CryptoError> {
    let plaintext = decrypt(old_key, blob, aad)?;
    encrypt(new_key, &plaintext, aad)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> EncryptionKey {
        EncryptionKey::from_bytes([7u8; 32])
    }

    #[test]
    fn round_trip() {
        let k = key();
        let blob = encrypt(&k, "secret-value", "value").unwrap();
        assert_eq!(decrypt(&k, &blob, "value").unwrap(), "secret-value");
    }

    #[test]
    fn round_trip_b64() {
        let k = key();
        let encoded = encrypt_b64(&k, "svc-token", "service_token").unwrap();
        assert_eq!(
            decrypt_b64(&k, &encoded, "service_token").unwrap(),
            "svc-token"
        );
    }

    #[test]
    fn aad_swap_is_rejected() {
        let k = key();
        let ct1 = encrypt(&k, "secret-1", "service_token").unwrap();
        let ct2 = encrypt(&k, "secret-2", "api_token").unwrap();

        assert!(decrypt(&k, &ct1, "api_token").is_err());
        assert!(decrypt(&k, &ct2, "service_token").is_err());
        assert_eq!(decrypt(&k, &ct1, "service_token").unwrap(), "secret-1");
    }

    #[test]
    fn wrong_key_is_rejected() {
        let blob = encrypt(&key(), "x", "value").unwrap();
        let other = EncryptionKey::from_bytes([9u8; 32]);
        assert!(decrypt(&other, &blob, "value").is_err());
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let k = key();
        let mut blob = encrypt(&k, "x", "value").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        assert!(decrypt(&k, &blob, "value").is_err());
    }

    #[test]
    fn short_blob_is_rejected() {
        assert!(matches!(
            decrypt(&key(), &[0u8; 8], "value"),
            Err(CryptoError::CiphertextTooShort { .. })
        ));
    }

    #[test]
    fn reencrypt_preserves_plaintext_and_aad() {
        let old = key();
        let new = EncryptionKey::from_bytes([3u8; 32]);
        let blob = encrypt(&old, "rotate-me", "refresh_token").unwrap();

        let rotated = reencrypt(&old, &new, &blob, "refresh_token").unwrap();
        assert_eq!(decrypt(&new, &rotated, "refresh_token").unwrap(), "rotate-me");
        // Old key no longer decrypts
        assert!(decrypt(&old, &rotated, "refresh_token").is_err());
        // AAD binding survives rotation
        assert!(decrypt(&new, &rotated, "value").is_err());
    }

    #[test]
    fn key_parsing() {
        let hex_key = "11".repeat(32);
        assert!(EncryptionKey::from_hex(&hex_key, false).is_ok());
        assert!(EncryptionKey::from_hex("abcd", false).is_err());
        assert!(EncryptionKey::from_hex(&"zz".repeat(32), false).is_err());

        let zeros = "00".repeat(32);
        assert!(matches!(
            EncryptionKey::from_hex(&zeros, false),
            Err(CryptoError::AllZeroKey)
        ));
        assert!(EncryptionKey::from_hex(&zeros, true).is_ok());
    }
}
