//! # sync-types
//!
//! Shared types for the offgrid-sync replication coordinator.
//!
//! This crate provides the foundational types used across all offgrid-sync crates:
//! - [`PeerId`], [`DiscoveryKey`] - Identity types
//! - [`Namespace`], [`NamespaceConfig`] - Core categories and presync policy
//! - [`SyncEnabledState`], [`SyncType`], [`SyncCapability`] - Enablement values
//! - [`SyncState`] - Public snapshot emitted by the sync engine
//! - [`PreHaveMessage`], [`BlockRange`] - Out-of-band inputs
//! - [`SyncError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod messages;
mod namespace;
mod state;

pub use error::SyncError;
pub use ids::{DiscoveryKey, ParseIdError, PeerId};
pub use messages::{BlockRange, PreHaveMessage};
pub use namespace::{Namespace, NamespaceConfig};
pub use state::{
    DeviceNamespaceGroupSyncState, DeviceSyncState, GroupSyncState, SyncCapability,
    SyncEnabledState, SyncState, SyncType,
};
