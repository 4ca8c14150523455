//! Derive replication counts for a scenario.

use anyhow::Result;
use offgrid_sync_core::{derive_state, DerivedState, PeerSimpleState};
use offgrid_sync_types::PeerId;
use std::collections::BTreeMap;
use std::path::Path;

use crate::scenario::Scenario;

/// Run the derive command.
pub fn run(path: &Path, json: bool) -> Result<()> {
    let scenario = Scenario::load(path)?;
    let (derived, names) = derive(&scenario);
    tracing::debug!(
        "Derived {} peers over {} blocks",
        derived.remote_states.len() + 1,
        derived.core_length
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&derived)?);
    } else {
        print!("{}", render(&derived, &names));
    }
    Ok(())
}

fn derive(scenario: &Scenario) -> (DerivedState, BTreeMap<PeerId, String>) {
    let local = scenario.local_state();
    let (remotes, names) = scenario.remote_states();
    (derive_state(scenario.length, &local, &remotes), names)
}

/// Format the counts as a table, peers in name order.
fn render(derived: &DerivedState, names: &BTreeMap<PeerId, String>) -> String {
    let mut rows: Vec<(String, PeerSimpleState, Option<bool>)> = derived
        .remote_states
        .iter()
        .map(|(peer_id, remote)| {
            let name = names
                .get(peer_id)
                .cloned()
                .unwrap_or_else(|| peer_id.to_string());
            (name, remote.state, Some(remote.connected))
        })
        .collect();
    rows.sort_by(|a, b| a.0.cmp(&b.0));
    rows.insert(0, ("local".to_string(), derived.local_state, None));

    let width = rows.iter().map(|row| row.0.len()).max().unwrap_or(0).max(4);
    let mut out = format!("core length: {}\n\n", derived.core_length);
    out.push_str(&format!(
        "{:<width$}  {:>8}  {:>8}  {:>8}  {:>8}  connected\n",
        "peer", "have", "want", "wanted", "missing"
    ));
    for (name, state, connected) in rows {
        let connected = match connected {
            Some(true) => "yes",
            Some(false) => "no",
            None => "-",
        };
        out.push_str(&format!(
            "{:<width$}  {:>8}  {:>8}  {:>8}  {:>8}  {}\n",
            name, state.have, state.want, state.wanted, state.missing, connected
        ));
    }
    out
}
