//! Sharded concurrent map for TokMesh
//!
//! Replaces a single RwLock + HashMap with DashMap's sharded storage:
//! lock-free reads, per-shard write locks, O(1) lookups.
//!
//! # Design
//!
//! - `dashmap::DashMap` underneath: power-of-two shard count (16 default),
//!   per-instance `RandomState` hash seeding
//! - Clone-out reads so callers never hold a shard lock across their own
//!   work
//! - `range` visits shards one at a time: shard-consistent, not globally
//!   atomic
//! - `compare_and_swap`/`compare_and_delete` run under the owning shard's
//!   write lock via the `Versioned` trait

#![warn(missing_docs)]
#![warn(clippy::all)]

mod sharded;

pub use sharded::{CasOutcome, ShardedMap, DEFAULT_SHARD_COUNT};
pub use tokmesh_core::Versioned;
