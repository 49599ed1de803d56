//! Adaptive authenticated encryption.
//!
//! One uniform interface over AES-GCM and ChaCha20-Poly1305. The ciphertext
//! layout is `nonce(12) ‖ sealed`, where `sealed` carries the 16-byte tag,
//! so a ciphertext is self-contained given the key and AAD.
//!
//! Algorithm choice: AES-GCM wherever the CPU accelerates AES (x86-64
//! AES-NI, aarch64 crypto extensions) and for 16/24-byte keys that ChaCha20
//! cannot take; ChaCha20-Poly1305 on everything else. Both are always
//! compiled in.

use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm};
use chacha20poly1305::ChaCha20Poly1305;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::{CryptoError, Result};

/// AES-192-GCM, not predefined by the cipher crate.
type Aes192Gcm = AesGcm<aes_gcm::aes::Aes192, U12>;

/// Nonce length in bytes for both algorithms.
pub const NONCE_SIZE: usize = 12;

/// Authentication tag length in bytes for both algorithms.
pub const TAG_SIZE: usize = 16;

/// Key lengths AES-GCM accepts.
pub const KEY_SIZES_AES: [usize; 3] = [16, 24, 32];

/// The only key length ChaCha20-Poly1305 accepts.
pub const KEY_SIZE_CHACHA: usize = 32;

/// Selected AEAD algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AeadAlgorithm {
    /// AES-GCM (128/192/256 by key length)
    AesGcm,
    /// ChaCha20-Poly1305
    Chacha20Poly1305,
}

impl AeadAlgorithm {
    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            AeadAlgorithm::AesGcm => "aes-gcm",
            AeadAlgorithm::Chacha20Poly1305 => "chacha20-poly1305",
        }
    }
}

/// Whether this CPU is known to accelerate AES.
fn aes_accelerated() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        std::arch::is_x86_feature_detected!("aes")
    }
    #[cfg(target_arch = "aarch64")]
    {
        std::arch::is_aarch64_feature_detected!("aes")
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        false
    }
}

enum Inner {
    Aes128(Box<Aes128Gcm>),
    Aes192(Box<Aes192Gcm>),
    Aes256(Box<Aes256Gcm>),
    ChaCha(Box<ChaCha20Poly1305>),
}

/// Uniform AEAD interface over the supported algorithms.
pub struct AeadCipher {
    inner: Inner,
    algorithm: AeadAlgorithm,
}

impl AeadCipher {
    /// Build a cipher, probing the CPU to pick the algorithm.
    ///
    /// 16- and 24-byte keys always select AES-GCM (ChaCha20 cannot take
    /// them); 32-byte keys select AES-GCM on AES-accelerated CPUs and
    /// ChaCha20-Poly1305 otherwise.
    pub fn new(key: &[u8]) -> Result<Self> {
        let algorithm = if key.len() != KEY_SIZE_CHACHA || aes_accelerated() {
            AeadAlgorithm::AesGcm
        } else {
            AeadAlgorithm::Chacha20Poly1305
        };
        Self::new_with_algorithm(key, algorithm)
    }

    /// Build a cipher with a forced algorithm.
    pub fn new_with_algorithm(key: &[u8], algorithm: AeadAlgorithm) -> Result<Self> {
        let inner = match algorithm {
            AeadAlgorithm::AesGcm => match key.len() {
                16 => Inner::Aes128(Box::new(
                    Aes128Gcm::new_from_slice(key).map_err(|_| CryptoError::EncryptFailed)?,
                )),
                24 => Inner::Aes192(Box::new(
                    Aes192Gcm::new_from_slice(key).map_err(|_| CryptoError::EncryptFailed)?,
                )),
                32 => Inner::Aes256(Box::new(
                    Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::EncryptFailed)?,
                )),
                other => {
                    return Err(CryptoError::InvalidKeySize {
                        actual: other,
                        algorithm: "aes-gcm",
                    })
                }
            },
            AeadAlgorithm::Chacha20Poly1305 => {
                if key.len() != KEY_SIZE_CHACHA {
                    return Err(CryptoError::InvalidKeySize {
                        actual: key.len(),
                        algorithm: "chacha20-poly1305",
                    });
                }
                Inner::ChaCha(Box::new(
                    ChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::EncryptFailed)?,
                ))
            }
        };
        Ok(AeadCipher { inner, algorithm })
    }

    /// The algorithm this cipher runs.
    pub fn algorithm(&self) -> AeadAlgorithm {
        self.algorithm
    }

    /// Seal `plaintext` under a freshly generated random nonce, returning
    /// `nonce ‖ ciphertext ‖ tag`.
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|e| CryptoError::RngFailed(e.to_string()))?;

        let payload = Payload { msg: plaintext, aad };
        let sealed = match &self.inner {
            Inner::Aes128(c) => c.encrypt((&nonce).into(), payload),
            Inner::Aes192(c) => c.encrypt((&nonce).into(), payload),
            Inner::Aes256(c) => c.encrypt((&nonce).into(), payload),
            Inner::ChaCha(c) => c.encrypt((&nonce).into(), payload),
        }
        .map_err(|_| CryptoError::EncryptFailed)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Open a ciphertext produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::CiphertextTruncated(ciphertext.len()));
        }
        let (nonce, sealed) = ciphertext.split_at(NONCE_SIZE);
        let nonce: [u8; NONCE_SIZE] = nonce.try_into().expect("split length");

        let payload = Payload { msg: sealed, aad };
        match &self.inner {
            Inner::Aes128(c) => c.decrypt((&nonce).into(), payload),
            Inner::Aes192(c) => c.decrypt((&nonce).into(), payload),
            Inner::Aes256(c) => c.decrypt((&nonce).into(), payload),
            Inner::ChaCha(c) => c.decrypt((&nonce).into(), payload),
        }
        .map_err(|_| CryptoError::DecryptFailed)
    }
}

/// Generate a random key of `len` bytes, zeroized on drop.
pub fn generate_key(len: usize) -> Result<Zeroizing<Vec<u8>>> {
    let mut key = Zeroizing::new(vec![0u8; len]);
    OsRng
        .try_fill_bytes(&mut key)
        .map_err(|e| CryptoError::RngFailed(e.to_string()))?;
    Ok(key)
}
