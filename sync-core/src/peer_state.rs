//! What one peer has and wants of one core.

use crate::bitfield::Bitfield;
use offgrid_sync_types::BlockRange;

/// Have/want knowledge about a single peer for a single core.
///
/// A peer's blocks are known from two sources: an optimistic "pre-have"
/// bitfield received out of band before the core is replicated, and the live
/// bitfield once the peer is connected. A block counts as had if either
/// source says so.
///
/// Until told otherwise a peer wants every block. The first want range (or
/// want bitfield) narrows it to exactly the declared set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerState {
    pre_haves: Option<Bitfield>,
    haves: Option<Bitfield>,
    wants: Option<Bitfield>,
    connected: bool,
}

impl PeerState {
    /// Create a disconnected peer with no known blocks that wants everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the pre-have bitfield.
    pub fn set_pre_haves_bitfield(&mut self, bitfield: Bitfield) {
        self.pre_haves = Some(bitfield);
    }

    /// Replace the live have bitfield.
    pub fn set_haves_bitfield(&mut self, bitfield: Bitfield) {
        self.haves = Some(bitfield);
    }

    /// Replace the want bitfield. The peer now wants exactly these blocks.
    pub fn set_wants_bitfield(&mut self, bitfield: Bitfield) {
        self.wants = Some(bitfield);
    }

    /// Add a range of wanted blocks.
    pub fn set_want_range(&mut self, range: BlockRange) {
        self.wants
            .get_or_insert_with(Bitfield::new)
            .set_range(range.start, range.length, true);
    }

    /// Mark a range of blocks in the live have bitfield.
    pub fn set_have_range(&mut self, range: BlockRange, value: bool) {
        self.haves
            .get_or_insert_with(Bitfield::new)
            .set_range(range.start, range.length, value);
    }

    /// Mark one block in the live have bitfield. Returns whether it changed.
    pub fn set_have(&mut self, index: u64, value: bool) -> bool {
        self.haves
            .get_or_insert_with(Bitfield::new)
            .set(index, value)
    }

    /// Whether the peer has block `index`, by either source.
    pub fn have(&self, index: u64) -> bool {
        self.haves.as_ref().is_some_and(|b| b.get(index))
            || self.pre_haves.as_ref().is_some_and(|b| b.get(index))
    }

    /// Whether the peer wants block `index`.
    pub fn want(&self, index: u64) -> bool {
        self.wants.as_ref().map_or(true, |b| b.get(index))
    }

    /// The 32 have bits of word `word`, both sources combined.
    pub fn have_word(&self, word: u64) -> u32 {
        let live = self.haves.as_ref().map_or(0, |b| b.get_word(word));
        let pre = self.pre_haves.as_ref().map_or(0, |b| b.get_word(word));
        live | pre
    }

    /// The 32 want bits of word `word`.
    pub fn want_word(&self, word: u64) -> u32 {
        self.wants.as_ref().map_or(u32::MAX, |b| b.get_word(word))
    }

    /// Number of wanted blocks in `[start, start + length)`.
    pub fn count_wants(&self, start: u64, length: u64) -> u64 {
        match &self.wants {
            Some(wants) => wants.count_ones(start, length),
            None => length,
        }
    }

    /// Whether the peer wants everything (no want set declared).
    pub fn wants_everything(&self) -> bool {
        self.wants.is_none()
    }

    /// The bitfields that contribute to [`PeerState::have`].
    pub(crate) fn have_sources(&self) -> impl Iterator<Item = &Bitfield> {
        self.haves.iter().chain(self.pre_haves.iter())
    }

    /// Whether the peer is currently replicating the core.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Set the connection flag. Returns whether it changed.
    pub fn set_connected(&mut self, connected: bool) -> bool {
        let changed = self.connected != connected;
        self.connected = connected;
        changed
    }
}
