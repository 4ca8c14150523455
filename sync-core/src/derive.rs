//! Per-peer have/want/wanted/missing counts for one core.
//!
//! For every block in `[0, length)`, with the local peer counted as a peer
//! like any other:
//!
//! - a peer **wants** a block if it wants it, lacks it, and someone has it
//! - a peer is **missing** a block if it wants it, lacks it, and nobody has it
//! - a peer's block is **wanted** if some peer wants it and this peer has it
//!
//! A block that nobody has and nobody wants counts towards nothing. Connection
//! state plays no part: a remote known only from pre-haves or wants still
//! counts, and is reported with `connected: false`.
//!
//! Derivation works on 32-block words and skips runs in which no peer has
//! any block, so its cost follows the populated part of the core rather than
//! its length.

use crate::bitfield::{Bitfield, BITS_PER_WORD};
use crate::peer_state::PeerState;
use offgrid_sync_types::PeerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::iter;

/// Block counts for one peer of one core (or summed over several cores).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PeerSimpleState {
    /// Blocks the peer has.
    pub have: u64,
    /// Blocks the peer wants and at least one peer has.
    pub want: u64,
    /// Blocks the peer has and at least one peer wants.
    pub wanted: u64,
    /// Blocks the peer wants and no peer has.
    pub missing: u64,
}

impl PeerSimpleState {
    /// Field-wise sum.
    pub fn add(&mut self, other: &PeerSimpleState) {
        self.have += other.have;
        self.want += other.want;
        self.wanted += other.wanted;
        self.missing += other.missing;
    }
}

/// Counts for a remote peer, plus whether it is replicating the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RemotePeerSimpleState {
    /// Block counts.
    #[serde(flatten)]
    pub state: PeerSimpleState,
    /// Whether the peer is currently connected for this core.
    pub connected: bool,
}

/// Derived replication state of one core.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedState {
    /// Known length of the core (0 before a core is attached).
    pub core_length: u64,
    /// Counts for the local peer.
    pub local_state: PeerSimpleState,
    /// Counts for every known remote peer.
    pub remote_states: BTreeMap<PeerId, RemotePeerSimpleState>,
}

/// Derive counts for the local peer and every remote over `[0, length)`.
pub fn derive_state(
    length: u64,
    local: &PeerState,
    remotes: &BTreeMap<PeerId, PeerState>,
) -> DerivedState {
    let peers: Vec<&PeerState> = iter::once(local).chain(remotes.values()).collect();
    let mut counts = vec![PeerSimpleState::default(); peers.len()];
    let mut cursors: Vec<NextHave<'_>> = peers
        .iter()
        .copied()
        .flat_map(PeerState::have_sources)
        .map(NextHave::new)
        .collect();
    let mut haves = vec![0u32; peers.len()];

    let mut position = 0;
    while position < length {
        let next_have = cursors
            .iter_mut()
            .filter_map(|cursor| cursor.at_or_after(position))
            .min();
        let gap_end = match next_have {
            Some(index) if index < length => index - index % BITS_PER_WORD,
            _ => length,
        };

        if gap_end > position {
            // Nobody has anything here: every want is missing.
            for (peer, count) in peers.iter().zip(counts.iter_mut()) {
                count.missing += peer.count_wants(position, gap_end - position);
            }
            position = gap_end;
            continue;
        }

        let word = position / BITS_PER_WORD;
        let span = (length - position).min(BITS_PER_WORD);
        let mask = if span == BITS_PER_WORD {
            u32::MAX
        } else {
            (1u32 << span) - 1
        };

        let mut someone_has = 0u32;
        for (peer, have) in peers.iter().zip(haves.iter_mut()) {
            *have = peer.have_word(word) & mask;
            someone_has |= *have;
        }

        let mut someone_wants = 0u32;
        for ((peer, &have), count) in peers.iter().zip(&haves).zip(counts.iter_mut()) {
            let would_like = peer.want_word(word) & !have & mask;
            let want = would_like & someone_has;
            someone_wants |= want;
            count.have += u64::from(have.count_ones());
            count.want += u64::from(want.count_ones());
            count.missing += u64::from((would_like & !someone_has).count_ones());
        }

        for (&have, count) in haves.iter().zip(counts.iter_mut()) {
            count.wanted += u64::from((someone_wants & have).count_ones());
        }

        position += span;
    }

    let mut counts = counts.into_iter();
    let local_state = counts.next().unwrap_or_default();
    let remote_states = remotes
        .iter()
        .zip(counts)
        .map(|((peer_id, peer), state)| {
            (
                *peer_id,
                RemotePeerSimpleState {
                    state,
                    connected: peer.is_connected(),
                },
            )
        })
        .collect();

    DerivedState {
        core_length: length,
        local_state,
        remote_states,
    }
}

/// Memoized "first set bit at or after" scan over one bitfield.
///
/// Positions passed to [`NextHave::at_or_after`] never decrease, so a cached answer
/// stays valid until the position moves past it.
struct NextHave<'a> {
    bitfield: &'a Bitfield,
    scanned: bool,
    next: Option<u64>,
}

impl<'a> NextHave<'a> {
    fn new(bitfield: &'a Bitfield) -> Self {
        Self {
            bitfield,
            scanned: false,
            next: None,
        }
    }

    fn at_or_after(&mut self, position: u64) -> Option<u64> {
        let stale = match self.next {
            _ if !self.scanned => true,
            Some(index) => index < position,
            None => false,
        };
        if stale {
            self.next = self.bitfield.first_set(position);
            self.scanned = true;
        }
        self.next
    }
}
