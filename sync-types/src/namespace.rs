//! Namespaces group cores that share a sync policy.

use crate::error::SyncError;
use crate::state::SyncType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A category of cores.
///
/// The set is fixed at compile time. Which of them are synced before bulk
/// data ("presync") is decided by [`NamespaceConfig`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Namespace {
    /// Membership and role records.
    Auth,
    /// Project configuration (presets, fields, settings).
    Config,
    /// Observations and tracks.
    Data,
    /// Index of attachment blobs.
    BlobIndex,
    /// Attachment blob contents.
    Blob,
}

impl Namespace {
    /// Every namespace, in canonical order.
    pub const ALL: [Namespace; 5] = [
        Namespace::Auth,
        Namespace::Config,
        Namespace::Data,
        Namespace::BlobIndex,
        Namespace::Blob,
    ];

    /// The canonical lowercase-camel name, as used on the wire and in config.
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Auth => "auth",
            Namespace::Config => "config",
            Namespace::Data => "data",
            Namespace::BlobIndex => "blobIndex",
            Namespace::Blob => "blob",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Namespace::ALL
            .into_iter()
            .find(|ns| ns.as_str() == s)
            .ok_or_else(|| SyncError::UnknownNamespace(s.to_string()))
    }
}

/// The namespaces a sync instance tracks, and which of them are presynced.
///
/// Injected at construction; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawNamespaceConfig", into = "RawNamespaceConfig")]
pub struct NamespaceConfig {
    all: Vec<Namespace>,
    presync: Vec<Namespace>,
}

#[derive(Serialize, Deserialize)]
struct RawNamespaceConfig {
    #[serde(default = "default_all")]
    all: Vec<Namespace>,
    #[serde(default = "default_presync")]
    presync: Vec<Namespace>,
}

fn default_all() -> Vec<Namespace> {
    Namespace::ALL.to_vec()
}

fn default_presync() -> Vec<Namespace> {
    vec![Namespace::Auth, Namespace::Config, Namespace::BlobIndex]
}

impl TryFrom<RawNamespaceConfig> for NamespaceConfig {
    type Error = SyncError;

    fn try_from(raw: RawNamespaceConfig) -> Result<Self, Self::Error> {
        NamespaceConfig::new(raw.all, raw.presync)
    }
}

impl From<NamespaceConfig> for RawNamespaceConfig {
    fn from(config: NamespaceConfig) -> Self {
        Self {
            all: config.all,
            presync: config.presync,
        }
    }
}

impl NamespaceConfig {
    /// Create a configuration, checking that `presync` is a subset of `all`
    /// and that neither list repeats a namespace.
    pub fn new(all: Vec<Namespace>, presync: Vec<Namespace>) -> Result<Self, SyncError> {
        if let Some(dup) = first_duplicate(&all) {
            return Err(SyncError::InvalidNamespaceConfig(format!(
                "namespace {} listed twice",
                dup
            )));
        }
        if let Some(dup) = first_duplicate(&presync) {
            return Err(SyncError::InvalidNamespaceConfig(format!(
                "presync namespace {} listed twice",
                dup
            )));
        }
        if let Some(stray) = presync.iter().find(|ns| !all.contains(ns)) {
            return Err(SyncError::InvalidNamespaceConfig(format!(
                "presync namespace {} is not a tracked namespace",
                stray
            )));
        }
        Ok(Self { all, presync })
    }

    /// All tracked namespaces.
    pub fn all(&self) -> &[Namespace] {
        &self.all
    }

    /// Namespaces synced before bulk data.
    pub fn presync(&self) -> &[Namespace] {
        &self.presync
    }

    /// Whether a namespace belongs to the presync subset.
    pub fn is_presync(&self, namespace: Namespace) -> bool {
        self.presync.contains(&namespace)
    }

    /// Whether a namespace is tracked at all.
    pub fn contains(&self, namespace: Namespace) -> bool {
        self.all.contains(&namespace)
    }

    /// The namespaces that must be synced for a sync type to be complete.
    pub fn for_sync_type(&self, sync_type: SyncType) -> &[Namespace] {
        match sync_type {
            SyncType::Initial => &self.presync,
            SyncType::Full => &self.all,
        }
    }
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            all: default_all(),
            presync: default_presync(),
        }
    }
}

fn first_duplicate(list: &[Namespace]) -> Option<Namespace> {
    list.iter()
        .enumerate()
        .find(|(i, ns)| list[..*i].contains(ns))
        .map(|(_, ns)| *ns)
}
