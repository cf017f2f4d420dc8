//! Crypto error types

use thiserror::Error;

/// Errors from the MCPbox crypto layer.
///
/// Decryption failures deliberately carry no detail beyond the field
/// context: AEAD failure modes (wrong key, wrong AAD, tampered ciphertext)
/// are indistinguishable by design.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption key must be 64 hex characters (32 bytes)")]
    InvalidKeyFormat,

    #[error("encryption key must not be all zeros")]
    AllZeroKey,

    #[error("encryption failed for '{context}'")]
    EncryptionFailed { context: String },

    #[error("decryption failed for '{context}'")]
    DecryptionFailed { context: String },

    #[error("ciphertext too short: {len} bytes")]
    CiphertextTooShort { len: usize },

    #[error("invalid base64 ciphertext: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("password hashing failed: {0}")]
    PasswordHash(String),

    #[error("export signature is missing or invalid")]
    InvalidSignature,
}
