//! Storage engine for TokMesh
//!
//! This crate wires the durability layer and the in-memory store behind a
//! single interface the service layer calls:
//!
//! - mutations follow a durable-then-apply sequence: WAL append first, then
//!   the in-memory store
//! - startup recovery loads the newest intact snapshot and replays the WAL
//!   tail from its recorded offset
//! - background workers handle periodic snapshots, WAL compaction and
//!   retention, batch fsync, and expiry sweeps
//!
//! The engine is the only component that coordinates across layers; neither
//! the store nor the WAL knows the other exists.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod engine;
mod wal_worker;
mod workers;

pub use engine::{EngineStats, StorageEngine};
pub use wal_worker::WalHandle;
pub use workers::Shutdown;
