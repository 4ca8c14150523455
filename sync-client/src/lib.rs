//! # sync-client
//!
//! Sync orchestration for offgrid-sync.
//!
//! This is the library applications use to decide what to sync and when.
//!
//! ## Features
//!
//! - **Enablement**: `none` / `presync` / `all`, with full-stop hold
//! - **Per-peer control**: replicate only the namespaces a peer's role allows
//! - **Autostop**: stop data sync after a configurable idle period
//! - **Progress**: per-device `want` / `wanted` counts for the UI
//! - **Single-task engine**: all state owned by one tokio task, no locks
//!
//! ## Example
//!
//! ```ignore
//! use offgrid_sync_client::{StaticRoles, SyncApi, SyncConfig};
//! use offgrid_sync_types::{Namespace, SyncType};
//!
//! let (api, driver) = SyncApi::spawn(SyncConfig::default(), Arc::new(StaticRoles::allow_all()))?;
//!
//! driver.add_core(Namespace::Auth, auth_core).await?;
//! driver.add_peer(connection)?;
//!
//! api.start()?;
//! api.wait_for_sync(SyncType::Full).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod connection;
pub mod core;
mod engine;
pub mod mock;
pub mod peer;
pub mod roles;

pub use api::{SyncApi, SyncDriver};
pub use config::{ConfigError, SyncConfig};
pub use connection::{ConnectionId, PeerConnection};
pub use crate::core::{Core, CoreDirectory};
pub use mock::{MockConnection, MockCore, ReplicationCall};
pub use peer::PeerSyncController;
pub use roles::{RoleProvider, StaticRoles};
