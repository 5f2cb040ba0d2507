//! Message history: the append-only log of a room.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::PeerIdentity;

/// Unique identifier of a message, shared by the sender and every receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub uuid::Uuid);

impl MessageId {
    /// Generate a new random message ID (UUID v4).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A recorded message. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message identifier.
    pub id: MessageId,
    /// Who sent it, as known at the time it was recorded.
    pub sender: PeerIdentity,
    /// Opaque content.
    pub payload: Vec<u8>,
    /// Position in the room history (receipt order, starting at 0).
    pub sequence: u64,
    /// When this device recorded the message.
    pub received_at: DateTime<Utc>,
}

/// Shared, read-only view of a history at one point in time.
pub type HistorySnapshot = Arc<Vec<Message>>;

/// Ordered log of every message sent or received in a room.
///
/// Entries are only ever appended. Snapshots share storage with the log and
/// are copied lazily on the next append while a reader still holds one.
#[derive(Debug, Default)]
pub struct MessageHistory {
    entries: HistorySnapshot,
}

impl MessageHistory {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message and return the stored entry.
    pub fn append(&mut self, id: MessageId, sender: PeerIdentity, payload: Vec<u8>) -> &Message {
        let entries = Arc::make_mut(&mut self.entries);
        let sequence = entries.len() as u64;
        entries.push(Message {
            id,
            sender,
            payload,
            sequence,
            received_at: Utc::now(),
        });
        &entries[entries.len() - 1]
    }

    /// Number of recorded messages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most recent entry.
    pub fn last(&self) -> Option<&Message> {
        self.entries.last()
    }

    /// Iterate over entries in receipt order.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter()
    }

    /// Cheap snapshot for publishing.
    pub fn snapshot(&self) -> HistorySnapshot {
        Arc::clone(&self.entries)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
