//! # Identity Types
//!
//! Addresses used on the signaling relay.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The robot's address on the signaling relay.
///
/// Generated once at startup and never changed for the lifetime of the
/// process, so every reconnect registers under the same address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceIdentity(Uuid);

impl DeviceIdentity {
    /// Generate a fresh random identity
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID (used by tests and tooling)
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of the remote controller currently paired with the robot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_identities_differ() {
        assert_ne!(DeviceIdentity::generate(), DeviceIdentity::generate());
    }

    #[test]
    fn test_identity_display_is_hyphenated_uuid() {
        let id = DeviceIdentity::from_uuid(Uuid::nil());
        assert_eq!(id.to_string(), "00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn test_peer_id_serializes_as_plain_string() {
        let peer = PeerId::new("controller-7");
        assert_eq!(serde_json::to_string(&peer).unwrap(), "\"controller-7\"");
    }
}
