//! Write-ahead log.
//!
//! # Segment layout
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ Magic "TOKMWAL\x01" (8 bytes)│
//! ├──────────────────────────────┤
//! │ Record 1                     │
//! ├──────────────────────────────┤
//! │ ...                          │
//! ├──────────────────────────────┤
//! │ SHA-256 trailer (32 bytes,   │
//! │ sealed segments only)        │
//! └──────────────────────────────┘
//! ```
//!
//! # Record layout
//!
//! ```text
//! ┌──────────────┬──────────────┬──────────┬──────────────────┐
//! │ length u32-be│ crc32 u32-be │ type u8  │ JSON payload     │
//! └──────────────┴──────────────┴──────────┴──────────────────┘
//! ```
//!
//! `length` counts the CRC field, the type byte, and the payload. The CRC32
//! (IEEE) covers `type ‖ payload`. Segments are named `wal-<id>.wal` with a
//! zero-padded decimal ID so lexicographic order equals numeric order.

mod compact;
mod reader;
mod record;
mod segment;
mod writer;

pub use compact::compact_segments;
pub use reader::{ReplaySummary, SegmentReader, TailTruncation};
pub use record::{FrameError, WalOp, WalRecord, MAX_RECORD_SIZE};
pub use segment::{list_segment_ids, segment_path, SEGMENT_MAGIC, TRAILER_SIZE};
pub use writer::{verify_sealed, SegmentWriter, SyncPolicy};
