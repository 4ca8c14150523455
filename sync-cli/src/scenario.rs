//! Scenario files for the `derive` command.
//!
//! A scenario describes one core: its length, the local peer and any number
//! of named remote peers. Bitfields are written as `[start, length]` ranges.
//!
//! ```toml
//! length = 4
//!
//! [local]
//! have = [[0, 3]]
//!
//! [[peers]]
//! name = "tablet"
//! have = [[0, 2]]
//!
//! [[peers]]
//! name = "phone"
//! pre_have = [[0, 1]]
//! want = [[0, 4]]
//! connected = false
//! ```

use anyhow::{Context, Result};
use offgrid_sync_core::{Bitfield, PeerState};
use offgrid_sync_types::PeerId;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// A single-core scenario.
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    /// Core length.
    pub length: u64,
    /// The local peer.
    #[serde(default)]
    pub local: PeerSpec,
    /// Remote peers, in file order.
    #[serde(default)]
    pub peers: Vec<NamedPeerSpec>,
}

/// Bitfields of one peer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PeerSpec {
    /// Live have ranges.
    #[serde(default)]
    pub have: Vec<(u64, u64)>,
    /// Pre-have ranges.
    #[serde(default)]
    pub pre_have: Vec<(u64, u64)>,
    /// Want ranges; absent means the peer wants everything.
    #[serde(default)]
    pub want: Option<Vec<(u64, u64)>>,
}

/// A remote peer.
#[derive(Debug, Clone, Deserialize)]
pub struct NamedPeerSpec {
    /// Display name; also seeds the peer id.
    pub name: String,
    /// Whether the peer is replicating the core.
    #[serde(default = "default_connected")]
    pub connected: bool,
    /// The peer's bitfields.
    #[serde(flatten)]
    pub spec: PeerSpec,
}

// Default value functions
fn default_connected() -> bool {
    true
}

impl Scenario {
    /// Load a scenario from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("Invalid scenario {}", path.display()))
    }

    /// Parse a scenario from TOML.
    pub fn parse(contents: &str) -> Result<Self> {
        let scenario: Self = toml::from_str(contents)?;
        let mut seen = BTreeSet::new();
        for peer in &scenario.peers {
            if !seen.insert(peer.name.as_str()) {
                anyhow::bail!("duplicate peer name: {}", peer.name);
            }
        }
        Ok(scenario)
    }

    /// The local peer's state.
    pub fn local_state(&self) -> PeerState {
        self.local.to_state()
    }

    /// Remote peer states keyed by id, plus the id-to-name mapping.
    pub fn remote_states(&self) -> (BTreeMap<PeerId, PeerState>, BTreeMap<PeerId, String>) {
        let mut states = BTreeMap::new();
        let mut names = BTreeMap::new();
        for peer in &self.peers {
            let peer_id = peer_id_for(&peer.name);
            let mut state = peer.spec.to_state();
            state.set_connected(peer.connected);
            states.insert(peer_id, state);
            names.insert(peer_id, peer.name.clone());
        }
        (states, names)
    }
}

impl PeerSpec {
    fn to_state(&self) -> PeerState {
        let mut state = PeerState::new();
        if !self.have.is_empty() {
            state.set_haves_bitfield(bitfield(&self.have));
        }
        if !self.pre_have.is_empty() {
            state.set_pre_haves_bitfield(bitfield(&self.pre_have));
        }
        if let Some(want) = &self.want {
            state.set_wants_bitfield(bitfield(want));
        }
        state
    }
}

/// Stable peer id for a scenario peer name.
pub fn peer_id_for(name: &str) -> PeerId {
    PeerId::from_public_key(blake3::hash(name.as_bytes()).as_bytes())
}

fn bitfield(ranges: &[(u64, u64)]) -> Bitfield {
    let mut bitfield = Bitfield::new();
    for &(start, length) in ranges {
        bitfield.set_range(start, length, true);
    }
    bitfield
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"
length = 4

[local]
have = [[0, 3]]

[[peers]]
name = "tablet"
have = [[0, 2]]

[[peers]]
name = "phone"
pre_have = [[0, 1]]
want = [[0, 2]]
connected = false
"#;

    #[test]
    fn parses_peers_and_ranges() {
        let scenario = Scenario::parse(SCENARIO).unwrap();
        assert_eq!(scenario.length, 4);
        assert_eq!(scenario.local.have, vec![(0, 3)]);
        assert_eq!(scenario.peers.len(), 2);
        assert!(scenario.peers[0].connected);
        assert!(!scenario.peers[1].connected);
        assert_eq!(scenario.peers[1].spec.want, Some(vec![(0, 2)]));
    }

    #[test]
    fn builds_peer_states() {
        let scenario = Scenario::parse(SCENARIO).unwrap();
        let local = scenario.local_state();
        assert!(local.have(2));
        assert!(!local.have(3));
        assert!(local.wants_everything());

        let (remotes, names) = scenario.remote_states();
        let phone = &remotes[&peer_id_for("phone")];
        assert!(phone.have(0));
        assert!(!phone.want(3));
        assert!(!phone.is_connected());
        assert_eq!(names[&peer_id_for("tablet")], "tablet");
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = Scenario::parse(
            r#"
length = 1
[[peers]]
name = "a"
[[peers]]
name = "a"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Scenario::load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read scenario"));
    }
}
