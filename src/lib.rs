//! # TokMesh
//!
//! A durable in-memory session and token cache: clients create sessions
//! keyed by opaque IDs, receive single-use bearer tokens, and later validate
//! or mutate those sessions. Acknowledged writes survive crashes through a
//! write-ahead log and checksum-verified snapshots.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokmesh::{Config, CreateSessionRequest, SessionService, StorageEngine};
//!
//! fn main() -> tokmesh::Result<()> {
//!     let mut config = Config::default();
//!     config.storage.data_dir = "./tokmesh-data".into();
//!
//!     let engine = Arc::new(StorageEngine::open(config)?);
//!     let service = SessionService::new(Arc::clone(&engine));
//!
//!     let created = service.create_session(CreateSessionRequest {
//!         user_id: "alice".into(),
//!         ttl_seconds: Some(3600),
//!         ..Default::default()
//!     })?;
//!     // `created.token` is shown exactly once; only its hash is stored
//!
//!     let verdict = service.validate_token(&created.token, true, "", "")?;
//!     assert!(verdict.valid);
//!
//!     engine.close()?;
//!     Ok(())
//! }
//! ```
//!
//! # Layers
//!
//! | Crate | Responsibility |
//! |-------|----------------|
//! | `tokmesh-core` | Domain types, errors, configuration |
//! | `tokmesh-concurrency` | Sharded concurrent map |
//! | `tokmesh-crypto` | AEAD ciphers, key derivation, token codec |
//! | `tokmesh-durability` | WAL segments, snapshots, compaction |
//! | `tokmesh-storage` | Multi-index in-memory session store |
//! | `tokmesh-engine` | Recovery, durable-then-apply, background work |
//! | `tokmesh-service` | Session/token operations, API keys, envelope |
//!
//! The HTTP listener, CLI, metrics exposition, and cluster membership are
//! external collaborators that call into [`SessionService`] and
//! [`StorageEngine`]; only the surface re-exported here is stable.

pub use tokmesh_core::{
    now_millis, ApiKey, ApiKeyRole, CancelToken, Config, CryptoAlgorithm, CryptoConfig, Error,
    Page, Result, Session, SessionFilter, SessionId, SessionPage, SessionStatus, SortKey,
    SortOrder, StorageConfig, SyncMode, WalConfig,
};

pub use tokmesh_concurrency::{CasOutcome, ShardedMap, Versioned};
pub use tokmesh_crypto::{token, AeadAlgorithm, AeadCipher};
pub use tokmesh_durability::{CompositeOffset, SnapshotManager};
pub use tokmesh_engine::{EngineStats, StorageEngine};
pub use tokmesh_service::{
    ApiKeyStore, CreateSessionRequest, CreateSessionResponse, CreatedApiKey, Envelope,
    MemoryApiKeyStore, SessionService, TokenValidation,
};
pub use tokmesh_storage::{SessionStore, StoreStats};
