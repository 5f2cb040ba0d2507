//! Events flowing from transports into a room.
//!
//! Transports never touch room state directly. They report what happened
//! through the [`DiscoveryObserver`] and [`SessionObserver`] traits, and the
//! room's [`EventSink`] turns each callback into a [`NetworkEvent`] on the
//! room's single ordered queue.

use std::fmt;

use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use crate::error::NetworkError;
use crate::history::Message;
use crate::identity::PeerIdentity;
use crate::session::ConnectionState;

/// Which half of discovery an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscoveryRole {
    /// Making the local peer visible.
    Advertising,
    /// Scanning for other peers.
    Browsing,
}

impl fmt::Display for DiscoveryRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Advertising => f.write_str("advertising"),
            Self::Browsing => f.write_str("browsing"),
        }
    }
}

/// Transfer styles a transport may offer besides plain data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferKind {
    /// A named byte stream.
    Stream,
    /// A named file-like resource.
    Resource,
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream => f.write_str("stream"),
            Self::Resource => f.write_str("resource"),
        }
    }
}

/// Something a transport observed on behalf of one room.
#[derive(Debug)]
pub enum NetworkEvent {
    /// An advertiser with the room's service type appeared.
    PeerFound(PeerIdentity),
    /// A previously found advertiser went away.
    PeerLost(PeerIdentity),
    /// A peer asked to join the room's session.
    InviteReceived(PeerIdentity),
    /// The transport-level link to a peer changed state.
    StateChanged {
        peer: PeerIdentity,
        state: ConnectionState,
    },
    /// Bytes arrived on the data channel.
    DataReceived { from: PeerIdentity, data: Vec<u8> },
    /// A peer offered a stream or resource transfer.
    TransferReceived {
        from: PeerIdentity,
        kind: TransferKind,
        name: String,
    },
    /// Advertising or browsing failed to start.
    DiscoveryFailed {
        role: DiscoveryRole,
        error: NetworkError,
    },
    /// A transmission that was already handed off failed.
    SendFailed {
        peer: PeerIdentity,
        error: NetworkError,
    },
}

/// Receives discovery callbacks.
pub trait DiscoveryObserver: Send + Sync {
    /// A peer is advertising under our service type.
    fn peer_found(&self, peer: PeerIdentity);
    /// A peer stopped advertising or went silent.
    fn peer_lost(&self, peer: PeerIdentity);
    /// Advertising or browsing could not be started.
    fn discovery_failed(&self, role: DiscoveryRole, error: NetworkError);
}

/// Receives session callbacks.
pub trait SessionObserver: Send + Sync {
    /// A peer invited us; answer through `RoomEndpoint::accept`.
    fn invite_received(&self, from: PeerIdentity);
    /// A link reached or left the connected state.
    fn state_changed(&self, peer: PeerIdentity, state: ConnectionState);
    /// Raw bytes arrived from a connected peer.
    fn data_received(&self, from: PeerIdentity, data: Vec<u8>);
    /// A peer offered a transfer kind other than plain data.
    fn transfer_received(&self, from: PeerIdentity, kind: TransferKind, name: String);
    /// A queued transmission to `peer` failed.
    fn send_failed(&self, peer: PeerIdentity, error: NetworkError);
}

// ---------------------------------------------------------------------------
// Room queue
// ---------------------------------------------------------------------------

/// Everything a room worker processes, in arrival order.
#[derive(Debug)]
pub(crate) enum RoomInput {
    Network(NetworkEvent),
    Send {
        payload: Vec<u8>,
        reply: oneshot::Sender<Message>,
    },
    Invite(PeerIdentity),
    Rename(PeerIdentity),
    InviteExpired {
        peer: PeerIdentity,
        attempt: u64,
    },
    StartDiscovery,
    StopDiscovery,
    Shutdown,
}

/// Observer handed to transports; forwards callbacks into a room's queue.
///
/// Holds a weak sender so a transport keeping its observer alive does not keep
/// the room worker alive.
#[derive(Clone)]
pub struct EventSink {
    room_id: String,
    tx: mpsc::WeakUnboundedSender<RoomInput>,
}

impl EventSink {
    pub(crate) fn new(room_id: impl Into<String>, tx: &mpsc::UnboundedSender<RoomInput>) -> Self {
        Self {
            room_id: room_id.into(),
            tx: tx.downgrade(),
        }
    }

    fn push(&self, event: NetworkEvent) {
        match self.tx.upgrade() {
            Some(tx) => {
                if tx.send(RoomInput::Network(event)).is_err() {
                    trace!("Room {} queue closed, dropping event", self.room_id);
                }
            }
            None => trace!("Room {} is gone, dropping event {event:?}", self.room_id),
        }
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("room_id", &self.room_id)
            .finish()
    }
}

impl DiscoveryObserver for EventSink {
    fn peer_found(&self, peer: PeerIdentity) {
        self.push(NetworkEvent::PeerFound(peer));
    }

    fn peer_lost(&self, peer: PeerIdentity) {
        self.push(NetworkEvent::PeerLost(peer));
    }

    fn discovery_failed(&self, role: DiscoveryRole, error: NetworkError) {
        self.push(NetworkEvent::DiscoveryFailed { role, error });
    }
}

impl SessionObserver for EventSink {
    fn invite_received(&self, from: PeerIdentity) {
        self.push(NetworkEvent::InviteReceived(from));
    }

    fn state_changed(&self, peer: PeerIdentity, state: ConnectionState) {
        self.push(NetworkEvent::StateChanged { peer, state });
    }

    fn data_received(&self, from: PeerIdentity, data: Vec<u8>) {
        self.push(NetworkEvent::DataReceived { from, data });
    }

    fn transfer_received(&self, from: PeerIdentity, kind: TransferKind, name: String) {
        self.push(NetworkEvent::TransferReceived { from, kind, name });
    }

    fn send_failed(&self, peer: PeerIdentity, error: NetworkError) {
        self.push(NetworkEvent::SendFailed { peer, error });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
