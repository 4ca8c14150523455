//! Out-of-band messages consumed by the sync engine.
//!
//! Encoding these on the wire is the transport's job; the engine only sees
//! the decoded values.

use crate::ids::DiscoveryKey;
use crate::namespace::Namespace;
use serde::{Deserialize, Serialize};

/// A peer's "have" bitfield for a core, sent before the core is replicated.
///
/// `words[k]` covers blocks `start + 32k .. start + 32k + 32`, least
/// significant bit first. `start` must be a multiple of 32.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreHaveMessage {
    /// Core the bitfield describes.
    pub discovery_key: DiscoveryKey,
    /// Namespace the core belongs to.
    pub namespace: Namespace,
    /// First block index covered by `words`.
    pub start: u64,
    /// Bitfield words.
    pub words: Vec<u32>,
}

/// A contiguous range of blocks `[start, start + length)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRange {
    /// First block in the range.
    pub start: u64,
    /// Number of blocks in the range.
    pub length: u64,
}

impl BlockRange {
    /// Create a new range.
    pub fn new(start: u64, length: u64) -> Self {
        Self { start, length }
    }

    /// One past the last block in the range.
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.length)
    }

    /// Whether the range covers no blocks.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}
