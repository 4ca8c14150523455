//! Identity types for offgrid-sync.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Context string for discovery key derivation. Changing it breaks discovery
/// between devices running different versions.
const DISCOVERY_KEY_CONTEXT: &str = "offgrid-sync 2024-01-01 core discovery key";

/// Error returned when parsing a hex-encoded identifier fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid identifier: expected 64 hex characters")]
pub struct ParseIdError;

fn parse_hex_32(s: &str) -> Result<[u8; 32], ParseIdError> {
    let bytes = hex::decode(s).map_err(|_| ParseIdError)?;
    bytes.as_slice().try_into().map_err(|_| ParseIdError)
}

/// Identifier of a remote device, derived from its public key.
///
/// Stable across reconnects: the same public key always yields the same id.
/// Displayed as lowercase hex, which is also its serialized form.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId([u8; 32]);

impl PeerId {
    /// Create a PeerId from a peer's 32-byte public key.
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        Self(*public_key)
    }

    /// Create a PeerId from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    /// Get the raw bytes of this PeerId.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", &self.to_string()[..8])
    }
}

impl FromStr for PeerId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex_32(s).map(Self)
    }
}

impl Serialize for PeerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Public identifier of a core, safe to announce to peers.
///
/// Derived from the core's public key so that peers who do not hold the key
/// cannot learn it from the announcement.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DiscoveryKey([u8; 32]);

impl DiscoveryKey {
    /// Derive the discovery key for a core from its public key.
    pub fn from_core_key(core_key: &[u8; 32]) -> Self {
        Self(blake3::derive_key(DISCOVERY_KEY_CONTEXT, core_key))
    }

    /// Create a DiscoveryKey from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    /// Wrap an already-derived 32-byte discovery key.
    pub fn from_array(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes of this DiscoveryKey.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for DiscoveryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for DiscoveryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DiscoveryKey({})", &self.to_string()[..8])
    }
}

impl FromStr for DiscoveryKey {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex_32(s).map(Self)
    }
}

impl Serialize for DiscoveryKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DiscoveryKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
