//! Error types for offgrid-sync.

use crate::ids::DiscoveryKey;
use thiserror::Error;

/// Errors that can occur in offgrid-sync operations.
///
/// Most variants are programmer errors surfaced to the caller that triggered
/// them; none are recovered internally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Autostop timeout is zero, not a whole number of milliseconds, or
    /// longer than the largest timer delay.
    #[error(
        "auto-stop timeout must be a whole number of milliseconds between 1 and {max_ms}, got {nanos}ns"
    )]
    InvalidAutostopTimeout {
        /// Requested timeout in nanoseconds.
        nanos: u128,
        /// Largest accepted timeout in milliseconds.
        max_ms: u64,
    },

    /// A core was attached to replication state created for another core.
    #[error("discovery key does not match: expected {expected}, got {actual}")]
    DiscoveryKeyMismatch {
        /// Discovery key the state was created for.
        expected: DiscoveryKey,
        /// Discovery key of the core being attached.
        actual: DiscoveryKey,
    },

    /// Namespace configuration is inconsistent.
    #[error("invalid namespace configuration: {0}")]
    InvalidNamespaceConfig(String),

    /// Namespace name not recognised.
    #[error("unknown namespace: {0}")]
    UnknownNamespace(String),

    /// Namespace is not tracked by this sync instance.
    #[error("namespace not tracked: {0}")]
    UntrackedNamespace(crate::Namespace),

    /// The sync engine task has shut down.
    #[error("sync engine closed")]
    Closed,
}
