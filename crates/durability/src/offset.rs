//! Composite WAL offsets.
//!
//! A single `u64` packs the segment ID (high 32 bits) and the byte offset
//! within that segment (low 32 bits). Because segment IDs increase and the
//! in-segment offset grows monotonically, composite offsets are strictly
//! monotonic across a node's lifetime and define the canonical recovery
//! order.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Packed (segment, byte offset) position in the WAL.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CompositeOffset(u64);

impl CompositeOffset {
    /// The zero offset, before any durable record.
    pub const ZERO: CompositeOffset = CompositeOffset(0);

    /// Pack a segment ID and in-segment byte offset.
    pub fn new(segment_id: u32, offset: u32) -> Self {
        CompositeOffset(((segment_id as u64) << 32) | offset as u64)
    }

    /// Rebuild from the raw packed form.
    pub fn from_raw(raw: u64) -> Self {
        CompositeOffset(raw)
    }

    /// The raw packed form.
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Segment ID (high 32 bits).
    pub fn segment_id(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Byte offset within the segment (low 32 bits).
    pub fn offset(&self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Display for CompositeOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.segment_id(), self.offset())
    }
}
