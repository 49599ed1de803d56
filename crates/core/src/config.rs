//! Configuration for the storage engine and its collaborators.
//!
//! All options are optional in the serialized form; defaults match the
//! documented operational defaults. `Config::validate` is the fatal-startup
//! gate: an invalid configuration is an `InvalidArgument` error, never a
//! panic.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// WAL sync policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Rely on the OS page cache; fastest, weakest durability
    None,
    /// fsync on a timer and on segment rotation
    #[default]
    Batch,
    /// fsync after every append
    Sync,
}

/// AEAD algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CryptoAlgorithm {
    /// AES-GCM (hardware-accelerated where available)
    AesGcm,
    /// ChaCha20-Poly1305 (fast everywhere)
    Chacha20Poly1305,
}

/// Storage and snapshot options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory holding `wal/` and `snapshots/`
    pub data_dir: PathBuf,
    /// Per-user live session quota
    pub max_sessions_per_user: usize,
    /// Primary map shard count, must be a power of two
    pub shard_count: u32,
    /// Seconds between scheduled snapshots
    pub snapshot_interval_secs: u64,
    /// Total WAL bytes that trigger an early snapshot
    pub snapshot_wal_threshold: u64,
    /// Keep at least this many snapshots
    pub snapshot_retention_count: usize,
    /// Keep snapshots newer than this many days
    pub snapshot_retention_days: u32,
    /// Seconds between expiry sweeps
    pub gc_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            data_dir: PathBuf::from("./tokmesh-data"),
            max_sessions_per_user: 50,
            shard_count: 16,
            snapshot_interval_secs: 600,
            snapshot_wal_threshold: 256 * 1024 * 1024,
            snapshot_retention_count: 5,
            snapshot_retention_days: 7,
            gc_interval_secs: 60,
        }
    }
}

/// Write-ahead log options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalConfig {
    /// Segment rotation threshold in bytes
    pub max_file_size: u64,
    /// Sync policy
    pub sync_mode: SyncMode,
    /// Milliseconds between batch-mode fsyncs
    pub batch_sync_interval_ms: u64,
    /// Floor of newest segment files compaction always preserves
    pub retain_count: usize,
}

impl Default for WalConfig {
    fn default() -> Self {
        WalConfig {
            max_file_size: 64 * 1024 * 1024,
            sync_mode: SyncMode::Batch,
            batch_sync_interval_ms: 200,
            retain_count: 3,
        }
    }
}

/// Encryption-at-rest options. Encryption is off unless key material is
/// supplied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Forced algorithm; `None` probes the CPU and picks
    pub algorithm: Option<CryptoAlgorithm>,
    /// Hex-encoded key (16, 24, or 32 bytes decoded)
    pub key: Option<String>,
    /// Passphrase for Argon2id derivation, alternative to `key`
    pub passphrase: Option<String>,
    /// Hex-encoded 16-byte salt for passphrase derivation
    pub salt: Option<String>,
}

impl CryptoConfig {
    /// Whether any key material is configured.
    pub fn enabled(&self) -> bool {
        self.key.is_some() || self.passphrase.is_some()
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage and snapshot options
    pub storage: StorageConfig,
    /// Write-ahead log options
    pub wal: WalConfig,
    /// Encryption-at-rest options
    pub crypto: CryptoConfig,
}

impl Config {
    /// Snapshot interval as a `Duration`.
    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.storage.snapshot_interval_secs)
    }

    /// Batch sync interval as a `Duration`.
    pub fn batch_sync_interval(&self) -> Duration {
        Duration::from_millis(self.wal.batch_sync_interval_ms)
    }

    /// Validate every option, returning `InvalidArgument` on the first
    /// violation.
    pub fn validate(&self) -> Result<()> {
        if !self.storage.shard_count.is_power_of_two() {
            return Err(Error::InvalidArgument(format!(
                "shard_count must be a power of two, got {}",
                self.storage.shard_count
            )));
        }
        if self.storage.max_sessions_per_user == 0 {
            return Err(Error::InvalidArgument(
                "max_sessions_per_user must be positive".into(),
            ));
        }
        if self.wal.max_file_size < 4096 {
            return Err(Error::InvalidArgument(
                "wal max_file_size must be at least 4096 bytes".into(),
            ));
        }
        if self.storage.snapshot_retention_count == 0 {
            return Err(Error::InvalidArgument(
                "snapshot_retention_count must be positive".into(),
            ));
        }
        if self.crypto.key.is_some() && self.crypto.passphrase.is_some() {
            return Err(Error::InvalidArgument(
                "configure either crypto key or passphrase, not both".into(),
            ));
        }
        if let Some(key) = &self.crypto.key {
            let decoded = decode_hex(key)
                .ok_or_else(|| Error::InvalidArgument("crypto key must be hex".into()))?;
            if ![16, 24, 32].contains(&decoded.len()) {
                return Err(Error::InvalidArgument(format!(
                    "crypto key must decode to 16, 24, or 32 bytes, got {}",
                    decoded.len()
                )));
            }
        }
        if let Some(salt) = &self.crypto.salt {
            let decoded = decode_hex(salt)
                .ok_or_else(|| Error::InvalidArgument("crypto salt must be hex".into()))?;
            if decoded.len() != 16 {
                return Err(Error::InvalidArgument(format!(
                    "crypto salt must decode to 16 bytes, got {}",
                    decoded.len()
                )));
            }
        }
        if self.crypto.salt.is_some() && self.crypto.passphrase.is_none() {
            return Err(Error::InvalidArgument(
                "crypto salt is only meaningful with a passphrase".into(),
            ));
        }
        Ok(())
    }

    /// Decoded key bytes, when a raw key is configured.
    pub fn key_bytes(&self) -> Result<Option<Vec<u8>>> {
        match &self.crypto.key {
            None => Ok(None),
            Some(key) => decode_hex(key)
                .map(Some)
                .ok_or_else(|| Error::InvalidArgument("crypto key must be hex".into())),
        }
    }

    /// Decoded salt bytes, when configured.
    pub fn salt_bytes(&self) -> Result<Option<[u8; 16]>> {
        match &self.crypto.salt {
            None => Ok(None),
            Some(salt) => {
                let decoded = decode_hex(salt)
                    .ok_or_else(|| Error::InvalidArgument("crypto salt must be hex".into()))?;
                let arr: [u8; 16] = decoded
                    .try_into()
                    .map_err(|_| Error::InvalidArgument("crypto salt must be 16 bytes".into()))?;
                Ok(Some(arr))
            }
        }
    }
}

/// Decode a lowercase/uppercase hex string.
pub fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(hex.len() / 2);
    for chunk in hex.as_bytes().chunks(2) {
        let s = std::str::from_utf8(chunk).ok()?;
        out.push(u8::from_str_radix(s, 16).ok()?);
    }
    Some(out)
}

/// Encode bytes as lowercase hex.
pub fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_non_power_of_two_shards() {
        let mut config = Config::default();
        config.storage.shard_count = 12;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_key_lengths() {
        let mut config = Config::default();
        config.crypto.key = Some("abcd".into()); // 2 bytes
        assert!(config.validate().is_err());

        config.crypto.key = Some("00".repeat(32));
        assert!(config.validate().is_ok());
        config.crypto.key = Some("00".repeat(24));
        assert!(config.validate().is_ok());
        config.crypto.key = Some("not hex!".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_key_and_passphrase_together() {
        let mut config = Config::default();
        config.crypto.key = Some("00".repeat(16));
        config.crypto.passphrase = Some("secret".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_orphan_salt() {
        let mut config = Config::default();
        config.crypto.salt = Some("00".repeat(16));
        assert!(config.validate().is_err());
        config.crypto.passphrase = Some("secret".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn hex_roundtrip() {
        let bytes = vec![0u8, 1, 0xab, 0xff];
        assert_eq!(decode_hex(&encode_hex(&bytes)).unwrap(), bytes);
        assert!(decode_hex("0").is_none());
        assert!(decode_hex("zz").is_none());
    }

    #[test]
    fn config_deserializes_from_partial_json() {
        let config: Config = serde_json::from_str(
            r#"{"storage": {"max_sessions_per_user": 1}, "wal": {"sync_mode": "sync"}}"#,
        )
        .unwrap();
        assert_eq!(config.storage.max_sessions_per_user, 1);
        assert_eq!(config.wal.sync_mode, SyncMode::Sync);
        assert_eq!(config.wal.max_file_size, 64 * 1024 * 1024);
    }
}
