//! Durability layer for TokMesh
//!
//! Two on-disk structures keep acknowledged writes across crashes:
//!
//! - **Write-ahead log** (`wal`): append-only segments of checksum-framed
//!   records. Every mutation lands here before the in-memory store sees it.
//! - **Snapshots** (`snapshot`): checksum-trailed point-in-time dumps of all
//!   sessions plus the WAL offset they cover, so recovery replays only the
//!   WAL tail.
//!
//! A `CompositeOffset` (segment ID in the high 32 bits, in-segment byte
//! offset in the low 32) totally orders all durable records and links the
//! two structures together.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod offset;
pub mod snapshot;
pub mod wal;

pub use offset::CompositeOffset;
pub use snapshot::{SnapshotHeader, SnapshotInfo, SnapshotManager};
pub use wal::{
    compact_segments, ReplaySummary, SegmentReader, SegmentWriter, SyncPolicy, TailTruncation,
    WalOp, WalRecord,
};
