//! Session manager: per-peer connection state for one room.
//!
//! The manager is a plain state machine: it never performs I/O. The room
//! worker feeds it invites, handshakes, losses and timeouts, and acts on the
//! decisions it returns.
//!
//! ```text
//! NotConnected --invite sent/received--> Connecting --handshake--> Connected
//!      ^                                     |                        |
//!      +------ timeout / lost / disconnect --+------------------------+
//! ```

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::identity::{PeerId, PeerIdentity};

/// Connection state of one remote peer within one room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session and no pending invite.
    NotConnected,
    /// An invite is outstanding in either direction.
    Connecting,
    /// Handshake complete; the peer receives broadcasts.
    Connected,
    /// Reported by a transport when a link drops. The manager records this as
    /// `NotConnected`.
    Disconnected,
}

impl ConnectionState {
    /// Whether a new invite to a peer in this state would be redundant.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

/// Outcome of a completed transport handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    /// The peer moved from `Connecting` to `Connected`.
    Joined,
    /// The peer was already connected (duplicate link); nothing changed.
    AlreadyConnected,
    /// No invite was pending (it timed out or was lost); the link should be
    /// torn down.
    Stale,
}

#[derive(Debug, Clone)]
struct PeerSession {
    identity: PeerIdentity,
    state: ConnectionState,
    attempt: u64,
}

/// Authoritative connection tracking for one room.
#[derive(Debug)]
pub struct SessionManager {
    local: PeerIdentity,
    peers: HashMap<PeerId, PeerSession>,
    next_attempt: u64,
}

impl SessionManager {
    /// Create a manager for a room joined as `local`.
    pub fn new(local: PeerIdentity) -> Self {
        Self {
            local,
            peers: HashMap::new(),
            next_attempt: 1,
        }
    }

    /// The identity used as sender for new messages.
    pub fn local(&self) -> &PeerIdentity {
        &self.local
    }

    /// Replace the local identity. Existing sessions are left attached.
    pub fn set_local(&mut self, identity: PeerIdentity) {
        debug!("Local identity replaced: {} -> {}", self.local, identity);
        self.local = identity;
    }

    /// Current state of `peer` (unknown peers are `NotConnected`).
    pub fn state(&self, peer: &PeerId) -> ConnectionState {
        self.peers
            .get(peer)
            .map(|s| s.state)
            .unwrap_or(ConnectionState::NotConnected)
    }

    /// Start an outbound invite. Returns the attempt number to arm the
    /// timeout with, or `None` if the peer is already connecting/connected.
    pub fn begin_invite(&mut self, peer: PeerIdentity) -> Option<u64> {
        self.enter_connecting(peer)
    }

    /// Record an inbound invite. Returns a new attempt number when the peer
    /// moved to `Connecting`; `None` means a session was already under way.
    /// The invite is accepted in both cases.
    pub fn invite_received(&mut self, peer: PeerIdentity) -> Option<u64> {
        self.enter_connecting(peer)
    }

    fn enter_connecting(&mut self, peer: PeerIdentity) -> Option<u64> {
        if self.state(&peer.id).is_active() {
            debug!("Session with {peer} already {:?}", self.state(&peer.id));
            return None;
        }
        let attempt = self.next_attempt;
        self.next_attempt += 1;
        self.peers.insert(
            peer.id.clone(),
            PeerSession {
                identity: peer,
                state: ConnectionState::Connecting,
                attempt,
            },
        );
        Some(attempt)
    }

    /// The transport reports the handshake with `peer` as complete.
    pub fn handshake_completed(&mut self, peer: &PeerIdentity) -> Handshake {
        match self.peers.get_mut(&peer.id) {
            Some(session) if session.state == ConnectionState::Connecting => {
                session.state = ConnectionState::Connected;
                session.identity = peer.clone();
                Handshake::Joined
            }
            Some(session) if session.state == ConnectionState::Connected => {
                Handshake::AlreadyConnected
            }
            _ => Handshake::Stale,
        }
    }

    /// The invite armed with `attempt` ran out of time. Returns `true` when
    /// the peer was reverted to `NotConnected`.
    pub fn invite_expired(&mut self, peer: &PeerId, attempt: u64) -> bool {
        match self.peers.get_mut(peer) {
            Some(session)
                if session.state == ConnectionState::Connecting && session.attempt == attempt =>
            {
                session.state = ConnectionState::NotConnected;
                true
            }
            _ => false,
        }
    }

    /// The peer disconnected, was lost by discovery, or its link reported a
    /// non-connected state. Returns `true` when the connected set shrank.
    pub fn connection_lost(&mut self, peer: &PeerId) -> bool {
        match self.peers.get_mut(peer) {
            Some(session) => {
                let was_connected = session.state == ConnectionState::Connected;
                session.state = ConnectionState::NotConnected;
                was_connected
            }
            None => false,
        }
    }

    /// Snapshot of the connected-peer set, ordered by display name then id.
    pub fn connected_peers(&self) -> Vec<PeerIdentity> {
        let mut peers: Vec<PeerIdentity> = self
            .peers
            .values()
            .filter(|s| s.state == ConnectionState::Connected)
            .map(|s| s.identity.clone())
            .collect();
        peers.sort_by(|a, b| {
            a.display_name
                .cmp(&b.display_name)
                .then_with(|| a.id.cmp(&b.id))
        });
        peers
    }

    /// Number of connected peers.
    pub fn connected_count(&self) -> usize {
        self.peers
            .values()
            .filter(|s| s.state == ConnectionState::Connected)
            .count()
    }

    /// State of every peer the room has ever tracked.
    pub fn states(&self) -> BTreeMap<PeerId, ConnectionState> {
        self.peers
            .iter()
            .map(|(id, s)| (id.clone(), s.state))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
