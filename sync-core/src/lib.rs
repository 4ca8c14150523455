//! # sync-core
//!
//! Pure logic for offgrid-sync (no I/O, instant tests).
//!
//! This crate derives replication progress from peers' bitfields and decides
//! which namespaces are synced, without any network, disk or async runtime.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. Time is passed in as [`std::time::Instant`] values
//! rather than read from a clock, so timers can be tested without sleeping.
//!
//! The actual I/O (replicating cores, arming timers, emitting events) is
//! performed by `sync-client`, which feeds events in and acts on the results.
//!
//! ## Layers
//!
//! - [`Bitfield`] - sparse paged bitset over 64-bit block indices
//! - [`PeerState`] - one peer's haves and wants for one core
//! - [`CoreReplicationState`] - all peers of one core, with cached [`DerivedState`]
//! - [`NamespaceSyncState`] - all cores of one namespace
//! - [`is_synced`] / [`reduce_sync_state`] - readiness and per-device progress
//! - [`Enablement`] - the `none` / `presync` / `all` state machine
//! - [`Autostop`], [`Throttle`], [`ExpiringSet`] - timer bookkeeping

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod autostop;
pub mod bitfield;
pub mod core_state;
pub mod derive;
pub mod enabled;
pub mod expiry;
pub mod namespace_state;
pub mod peer_state;
pub mod progress;
pub mod throttle;

pub use autostop::{validate_autostop, Autostop, MAX_AUTOSTOP_MS};
pub use bitfield::{Bitfield, BITS_PER_PAGE};
pub use core_state::{CoreEvent, CorePeer, CoreReplicationState, CoreSnapshot};
pub use derive::{derive_state, DerivedState, PeerSimpleState, RemotePeerSimpleState};
pub use enabled::{AutostopAction, Enablement, SyncInputs, Transition};
pub use expiry::ExpiringSet;
pub use namespace_state::{
    NamespacePeerState, NamespaceState, NamespaceSyncState, PeerNamespaceStatus,
};
pub use peer_state::PeerState;
pub use progress::{is_allowed, is_synced, reduce_sync_state, CapabilityMap, NamespaceStates};
pub use throttle::Throttle;
