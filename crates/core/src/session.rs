//! Session entity and identifier.
//!
//! A `SessionId` is opaque to callers but internally structured so that IDs
//! sort lexicographically in creation order: `tmss-` followed by a 48-bit
//! big-endian millisecond timestamp and 10 random bytes, all lowercase hex.
//! The random suffix comes from the OS CSPRNG so IDs are not guessable.

use rand::rngs::OsRng;
use rand::RngCore;
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{Error, Result};
use crate::time::now_millis;

/// Prefix carried by every session ID.
pub const SESSION_ID_PREFIX: &str = "tmss-";

/// Hex length of the encoded ID body (6 timestamp bytes + 10 random bytes).
const ID_BODY_LEN: usize = 32;

/// Opaque, lexicographically sortable session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Mint a fresh ID ordered after every ID minted at an earlier
    /// millisecond.
    ///
    /// # Errors
    /// Returns `Error::Crypto` if the OS CSPRNG fails.
    pub fn generate() -> Result<Self> {
        let now = now_millis().max(0) as u64;
        let mut random = [0u8; 10];
        OsRng
            .try_fill_bytes(&mut random)
            .map_err(|e| Error::Crypto(format!("csprng failure: {e}")))?;

        let mut body = String::with_capacity(ID_BODY_LEN);
        // 48-bit timestamp, big-endian, so the hex sorts chronologically
        for byte in &now.to_be_bytes()[2..8] {
            body.push_str(&format!("{byte:02x}"));
        }
        for byte in &random {
            body.push_str(&format!("{byte:02x}"));
        }
        Ok(SessionId(format!("{SESSION_ID_PREFIX}{body}")))
    }

    /// Parse an ID from its string form, rejecting anything that does not
    /// look like one of ours.
    pub fn parse(s: &str) -> Result<Self> {
        let body = s
            .strip_prefix(SESSION_ID_PREFIX)
            .ok_or_else(|| Error::InvalidArgument(format!("malformed session id: {s}")))?;
        if body.len() != ID_BODY_LEN || !body.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::InvalidArgument(format!("malformed session id: {s}")));
        }
        Ok(SessionId(s.to_string()))
    }

    /// The string form of this ID.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stable shard assignment for this ID within `shard_count` shards.
    ///
    /// `shard_count` must be a power of two.
    pub fn shard_id(&self, shard_count: u32) -> u32 {
        let mut hasher = FxHasher::default();
        self.0.hash(&mut hasher);
        (hasher.finish() as u32) & (shard_count - 1)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> String {
        id.0
    }
}

/// Values carrying a monotonic version counter, the basis for optimistic
/// concurrency throughout the system.
pub trait Versioned {
    /// Current version of the value.
    fn version(&self) -> u64;
    /// Overwrite the version counter.
    fn set_version(&mut self, version: u64);
}

/// The authoritative record of a user's authenticated presence.
///
/// Sessions are owned exclusively by the in-memory store; everything handed
/// to callers is a clone. `version` increases by exactly one on every
/// accepted mutation and is the basis for optimistic concurrency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque sortable identifier, `tmss-` prefixed
    pub id: SessionId,
    /// Owning user
    pub user_id: String,
    /// Hex SHA-256 of the most recently issued token; empty when no token
    /// is outstanding
    #[serde(default)]
    pub token_hash: String,
    /// Client IP at creation
    #[serde(default)]
    pub ip_address: String,
    /// Client user agent at creation
    #[serde(default)]
    pub user_agent: String,
    /// Device identifier, when the client supplied one
    #[serde(default)]
    pub device_id: String,
    /// Principal that created the session (API key name or system)
    #[serde(default)]
    pub created_by: String,
    /// Creation time, ms since epoch
    pub created_at: i64,
    /// Expiry time, ms since epoch
    pub expires_at: i64,
    /// Last activity time, ms since epoch
    pub last_active: i64,
    /// IP observed on the most recent access
    #[serde(default)]
    pub last_access_ip: String,
    /// User agent observed on the most recent access
    #[serde(default)]
    pub last_access_ua: String,
    /// Small application-defined string mapping
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    /// Monotonic mutation counter, starts at 0
    pub version: u64,
    /// Shard assignment derived from the ID
    pub shard_id: u32,
    /// Requested lifetime in seconds
    pub ttl: i64,
    /// Tombstone bit set on revocation records
    #[serde(default)]
    pub is_deleted: bool,
}

impl Versioned for Session {
    fn version(&self) -> u64 {
        self.version
    }
    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

impl Session {
    /// Whether this session is live at `now` (ms since epoch).
    pub fn is_live(&self, now: i64) -> bool {
        !self.is_deleted && self.expires_at > now
    }

    /// Remaining lifetime in milliseconds at `now`, zero when expired.
    pub fn remaining_millis(&self, now: i64) -> i64 {
        (self.expires_at - now).max(0)
    }

    /// Record an access without touching the version counter.
    pub fn touch(&mut self, now: i64, ip: &str, user_agent: &str) {
        self.last_active = now;
        if !ip.is_empty() {
            self.last_access_ip = ip.to_string();
        }
        if !user_agent.is_empty() {
            self.last_access_ua = user_agent.to_string();
        }
    }

    /// Validate structural invariants before the session enters the store.
    pub fn validate(&self) -> Result<()> {
        if self.user_id.is_empty() {
            return Err(Error::InvalidArgument("user_id must not be empty".into()));
        }
        if self.expires_at < self.created_at {
            return Err(Error::InvalidArgument(
                "expires_at must not precede created_at".into(),
            ));
        }
        if !self.token_hash.is_empty()
            && (self.token_hash.len() != 64
                || !self.token_hash.bytes().all(|b| b.is_ascii_hexdigit()))
        {
            return Err(Error::InvalidArgument(
                "token_hash must be hex sha-256".into(),
            ));
        }
        Ok(())
    }
}
