//! Sync enablement values and the public sync-state snapshot.

use crate::ids::PeerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Which categories of data the local device is currently exchanging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncEnabledState {
    /// Nothing is synced.
    #[default]
    None,
    /// Only presync namespaces are synced.
    Presync,
    /// Every namespace is synced.
    All,
}

impl fmt::Display for SyncEnabledState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncEnabledState::None => "none",
            SyncEnabledState::Presync => "presync",
            SyncEnabledState::All => "all",
        })
    }
}

/// What "synced" is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncType {
    /// Presync namespaces only.
    Initial,
    /// Every namespace.
    Full,
}

/// Whether a peer may sync a namespace, as decided by its role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncCapability {
    /// The peer must not receive or send this namespace.
    Blocked,
    /// The peer may sync this namespace.
    Allowed,
}

/// Public snapshot emitted on every enablement re-evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    /// Sync of auth, config and other presync metadata.
    pub initial: GroupSyncState,
    /// Sync of bulk data (observations, attachments).
    pub data: GroupSyncState,
    /// Per-device breakdown, keyed by peer id.
    pub device_sync_state: BTreeMap<PeerId, DeviceSyncState>,
}

impl SyncState {
    /// Build a snapshot for an enabled state and a device breakdown.
    pub fn new(
        enabled: SyncEnabledState,
        device_sync_state: BTreeMap<PeerId, DeviceSyncState>,
    ) -> Self {
        let (initial, data) = match enabled {
            SyncEnabledState::None => (false, false),
            SyncEnabledState::Presync => (true, false),
            SyncEnabledState::All => (true, true),
        };
        Self {
            initial: GroupSyncState {
                is_sync_enabled: initial,
            },
            data: GroupSyncState {
                is_sync_enabled: data,
            },
            device_sync_state,
        }
    }
}

/// Whether a group of namespaces is enabled locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSyncState {
    /// Whether the local device is syncing this group.
    pub is_sync_enabled: bool,
}

/// Sync progress with one remote device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSyncState {
    /// Presync namespaces.
    pub initial: DeviceNamespaceGroupSyncState,
    /// Data namespaces.
    pub data: DeviceNamespaceGroupSyncState,
}

/// Sync progress with one remote device for one group of namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceNamespaceGroupSyncState {
    /// The peer participates in at least one namespace of the group.
    pub is_enabled: bool,
    /// Blocks the peer wants that someone has.
    pub want: u64,
    /// Blocks the peer has that someone wants.
    pub wanted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_flags_follow_enabled_state() {
        let none = SyncState::new(SyncEnabledState::None, BTreeMap::new());
        assert!(!none.initial.is_sync_enabled);
        assert!(!none.data.is_sync_enabled);

        let presync = SyncState::new(SyncEnabledState::Presync, BTreeMap::new());
        assert!(presync.initial.is_sync_enabled);
        assert!(!presync.data.is_sync_enabled);

        let all = SyncState::new(SyncEnabledState::All, BTreeMap::new());
        assert!(all.initial.is_sync_enabled);
        assert!(all.data.is_sync_enabled);
    }

    #[test]
    fn snapshot_json_shape() {
        let mut devices = BTreeMap::new();
        devices.insert(PeerId::from_public_key(&[0u8; 32]), DeviceSyncState::default());
        let state = SyncState::new(SyncEnabledState::Presync, devices);
        let json = serde_json::to_value(&state).unwrap();

        assert_eq!(json["initial"]["isSyncEnabled"], true);
        assert_eq!(json["data"]["isSyncEnabled"], false);
        let device = &json["deviceSyncState"][&"00".repeat(32)];
        assert_eq!(device["initial"]["isEnabled"], false);
        assert_eq!(device["data"]["want"], 0);
    }

    #[test]
    fn enabled_state_display() {
        assert_eq!(SyncEnabledState::Presync.to_string(), "presync");
        assert_eq!(SyncEnabledState::default(), SyncEnabledState::None);
    }
}
