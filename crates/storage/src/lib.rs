//! In-memory session store for TokMesh
//!
//! Four coordinated indexes over one session set:
//!
//! - primary: session ID → session (sharded map)
//! - token: token hash → session ID (sharded map)
//! - user: user ID → set of session IDs
//! - device: device ID → set of session IDs
//!
//! A store-level write lock makes cross-index mutations atomic; the hot
//! `get` paths take only shard locks. Sessions are owned exclusively by the
//! store — callers always receive clones.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod listing;
mod store;

pub use store::{SessionStore, StoreStats};
