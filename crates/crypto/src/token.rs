//! Bearer token codec.
//!
//! Tokens are minted once, handed to the client, and never stored; the
//! system keeps only the hex SHA-256 digest. Verification recomputes the
//! digest and compares in constant time.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::{CryptoError, Result};

/// Prefix carried by every bearer token.
pub const TOKEN_PREFIX: &str = "tmtk_";

/// Raw entropy per token in bytes.
pub const TOKEN_ENTROPY: usize = 32;

/// Mint a fresh bearer token: `tmtk_` + base64url (unpadded) of 32 CSPRNG
/// bytes.
pub fn generate() -> Result<String> {
    let mut raw = [0u8; TOKEN_ENTROPY];
    OsRng
        .try_fill_bytes(&mut raw)
        .map_err(|e| CryptoError::RngFailed(e.to_string()))?;
    Ok(format!("{TOKEN_PREFIX}{}", URL_SAFE_NO_PAD.encode(raw)))
}

/// Lowercase-hex SHA-256 digest of a token.
pub fn hash(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Recompute the digest of `token` and compare against `expected_hash` in
/// constant time. Returns `false` for malformed expectations rather than
/// erroring: an attacker learns nothing from the failure mode.
pub fn verify(token: &str, expected_hash: &str) -> bool {
    let computed = hash(token);
    if computed.len() != expected_hash.len() {
        return false;
    }
    computed
        .as_bytes()
        .ct_eq(expected_hash.as_bytes())
        .into()
}
