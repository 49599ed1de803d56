//! Cryptographic primitives for TokMesh
//!
//! - `AeadCipher`: authenticated encryption over AES-GCM and
//!   ChaCha20-Poly1305, selected by a runtime CPU feature probe
//! - `kdf`: Argon2id passphrase derivation and HKDF-SHA-256 subkey expansion
//! - `token`: bearer token minting, hashing, and constant-time verification
//!
//! Every fallible path returns an error; CSPRNG failure is an error, not a
//! panic. Key material is zeroized on drop wherever this crate owns it.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod aead;
pub mod kdf;
pub mod token;

pub use aead::{AeadAlgorithm, AeadCipher, KEY_SIZES_AES, KEY_SIZE_CHACHA, NONCE_SIZE, TAG_SIZE};

use thiserror::Error;

/// Crypto-layer errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Key length unsupported by the selected algorithm
    #[error("invalid key size: {actual} bytes not supported by {algorithm}")]
    InvalidKeySize {
        /// Offered key length
        actual: usize,
        /// Algorithm that rejected it
        algorithm: &'static str,
    },

    /// Sealing failed
    #[error("encryption failed")]
    EncryptFailed,

    /// Opening failed: authentication error or corrupted ciphertext
    #[error("decryption failed: authentication error or corrupted data")]
    DecryptFailed,

    /// Ciphertext shorter than a nonce + tag
    #[error("ciphertext truncated: {0} bytes")]
    CiphertextTruncated(usize),

    /// Key derivation failed
    #[error("key derivation failed: {0}")]
    KdfFailed(String),

    /// OS CSPRNG failure
    #[error("csprng failure: {0}")]
    RngFailed(String),
}

/// Result type alias for crypto operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
