//! Network error types.

use std::time::Duration;

/// Errors that can occur in the picto_network crate.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// A transport-level error (socket bind, WebSocket connect/send/receive).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Advertising or browsing could not be started.
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// JSON serialization / deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An outbound payload could not be encoded by the caller-facing helper.
    #[error("Failed to encode payload: {0}")]
    Encode(String),

    /// An inbound payload could not be interpreted.
    #[error("Failed to decode payload from {peer}: {reason}")]
    Decode { peer: String, reason: String },

    /// A payload is larger than the wire format allows.
    #[error("Payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },

    /// A stream- or resource-style transfer was offered by a peer.
    #[error("Unsupported {kind} transfer '{name}' from {peer}")]
    UnsupportedTransfer {
        kind: String,
        name: String,
        peer: String,
    },

    /// The requested peer has no live link.
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// The registry has no room with this id.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Two configured room ids map to the same room or discovery key.
    #[error("Duplicate room: {0}")]
    DuplicateRoom(String),

    /// A room id cannot be turned into a valid discovery key.
    #[error("Invalid service type '{value}': {reason}")]
    InvalidServiceType { value: String, reason: &'static str },

    /// An operation timed out.
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// The room worker has shut down.
    #[error("Room {0} is closed")]
    RoomClosed(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
