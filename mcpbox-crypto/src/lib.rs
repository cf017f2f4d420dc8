//! Cryptographic primitives for MCPbox
//!
//! Three concerns live here:
//!
//! - [`aead`]: AES-256-GCM encryption with a *context-tagged AAD*. Every
//!   stored secret is bound to the name of the field it belongs to, so a
//!   ciphertext lifted from one column cannot be replayed into another.
//! - [`signature`]: HMAC-SHA256 signatures over canonical JSON, used by the
//!   export/import format.
//! - [`password`]: Argon2id hashing for the admin password.

pub mod aead;
pub mod error;
pub mod password;
pub mod signature;

pub use aead::{decrypt, decrypt_b64, encrypt, encrypt_b64, reencrypt, EncryptionKey};
pub use error::CryptoError;
pub use password::{dummy_verify, hash_password, verify_password};
pub use signature::{canonical_json, sign_export, verify_export_signature};
