//! Peer identity: who a device is on the network.
//!
//! A [`PeerIdentity`] is a value: renaming a device produces a brand-new
//! identity with a fresh [`PeerId`] instead of editing the display name in
//! place. Session tracking compares identities by id, so a renamed device is
//! a different peer as far as new sessions are concerned.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A unique identifier for a peer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    /// Generate a new random peer ID (UUID v4).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Create a PeerId from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Return the inner string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for log lines.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Longest display name, in UTF-8 bytes, a generated identity carries.
pub const MAX_DISPLAY_NAME_BYTES: usize = 63;

/// Cut `name` to [`MAX_DISPLAY_NAME_BYTES`] on a character boundary.
fn clamp_display_name(mut name: String) -> String {
    if name.len() > MAX_DISPLAY_NAME_BYTES {
        let mut end = MAX_DISPLAY_NAME_BYTES;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name.truncate(end);
    }
    name
}

/// The identity of a device: an opaque id plus a human-readable name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerIdentity {
    /// Unique peer identifier, fixed for the lifetime of this identity.
    pub id: PeerId,
    /// Name shown to other users.
    pub display_name: String,
}

impl PeerIdentity {
    /// Create a new identity with a fresh PeerId. Names longer than
    /// [`MAX_DISPLAY_NAME_BYTES`] are truncated.
    pub fn generate(display_name: impl Into<String>) -> Self {
        Self {
            id: PeerId::generate(),
            display_name: clamp_display_name(display_name.into()),
        }
    }

    /// Build an identity from known parts (e.g. received over the wire).
    pub fn new(id: PeerId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }

    /// Replace this identity with a new one under `display_name`.
    ///
    /// The result carries a fresh id; `self` is left untouched so anything
    /// already recorded against it keeps its original attribution.
    pub fn renamed(&self, display_name: impl Into<String>) -> Self {
        Self::generate(display_name)
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.id.short())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_generation() {
        let a = PeerId::generate();
        let b = PeerId::generate();
        assert_ne!(a, b);
        assert!(!a.as_str().is_empty());
    }

    #[test]
    fn test_peer_id_short() {
        let id = PeerId::from_string("0123456789abcdef");
        assert_eq!(id.short(), "01234567");
        assert_eq!(PeerId::from_string("abc").short(), "abc");
    }

    #[test]
    fn test_identity_generate() {
        let identity = PeerIdentity::generate("Alice");
        assert_eq!(identity.display_name, "Alice");
        assert!(!identity.id.as_str().is_empty());
    }

    #[test]
    fn test_rename_replaces_identity() {
        let alice = PeerIdentity::generate("Alice");
        let renamed = alice.renamed("Alicia");

        assert_eq!(renamed.display_name, "Alicia");
        assert_ne!(renamed.id, alice.id);
        assert_ne!(renamed, alice);
        // The original value is untouched.
        assert_eq!(alice.display_name, "Alice");
    }

    #[test]
    fn test_rename_to_same_name_is_still_new_identity() {
        let alice = PeerIdentity::generate("Alice");
        let again = alice.renamed("Alice");
        assert_ne!(again, alice);
    }

    #[test]
    fn test_long_display_name_is_truncated() {
        let long = PeerIdentity::generate("x".repeat(5000));
        assert_eq!(long.display_name, "x".repeat(MAX_DISPLAY_NAME_BYTES));

        let renamed = long.renamed("y".repeat(100));
        assert_eq!(renamed.display_name.len(), MAX_DISPLAY_NAME_BYTES);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        // 'é' is two bytes, so 63 bytes would split the 32nd one.
        let identity = PeerIdentity::generate("é".repeat(40));
        assert_eq!(identity.display_name, "é".repeat(31));
        assert_eq!(PeerIdentity::generate("Bob").display_name, "Bob");
    }

    #[test]
    fn test_identity_display() {
        let identity = PeerIdentity::new(PeerId::from_string("deadbeefcafe"), "Bob");
        assert_eq!(identity.to_string(), "Bob (deadbeef)");
    }
}
