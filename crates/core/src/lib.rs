//! Core types for TokMesh
//!
//! This crate defines the foundational vocabulary shared by every layer:
//! - Session: the authoritative record of an authenticated presence
//! - SessionId: opaque, lexicographically sortable identifier
//! - ApiKey: administrative credential metadata (secrets never stored)
//! - Error: the unified domain error taxonomy
//! - Config: storage, WAL, and crypto configuration
//!
//! Higher layers (storage, durability, engine, service) depend on this crate
//! and nothing here depends on them.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod apikey;
pub mod cancel;
pub mod config;
pub mod error;
pub mod filter;
pub mod limits;
pub mod session;
pub mod time;

pub use apikey::{ApiKey, ApiKeyRole};
pub use cancel::CancelToken;
pub use config::{Config, CryptoAlgorithm, CryptoConfig, StorageConfig, SyncMode, WalConfig};
pub use error::{Error, Result};
pub use filter::{Page, SessionFilter, SessionPage, SessionStatus, SortKey, SortOrder};
pub use session::{Session, SessionId, Versioned};
pub use time::now_millis;
