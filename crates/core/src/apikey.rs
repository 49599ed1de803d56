//! API key metadata.
//!
//! The core only stores key metadata and secret hashes; minting and
//! verification live in the service layer, and request authentication is an
//! external collaborator's concern.

use serde::{Deserialize, Serialize};

/// Prefix carried by every public key ID.
pub const API_KEY_ID_PREFIX: &str = "tmak_";

/// Role attached to an API key, ordered by privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyRole {
    /// Read-only access to the metrics surface
    Metrics,
    /// Token validation only
    Validator,
    /// Session and token issuance
    Issuer,
    /// Full administrative access
    Admin,
}

impl ApiKeyRole {
    /// Whether a key holding `self` may act as `required`.
    pub fn allows(&self, required: ApiKeyRole) -> bool {
        *self >= required
    }
}

/// Administrative credential record. The secret value itself is never
/// persisted, only its hex SHA-256 hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    /// Public identifier, `tmak_` prefixed
    pub key_id: String,
    /// Hex SHA-256 of the secret
    pub secret_hash: String,
    /// Human-readable label
    pub name: String,
    /// Privilege level
    pub role: ApiKeyRole,
    /// Disabled keys fail verification without being deleted
    pub enabled: bool,
    /// Creation time, ms since epoch
    pub created_at: i64,
    /// Last successful verification, ms since epoch (0 = never)
    #[serde(default)]
    pub last_used_at: i64,
}
