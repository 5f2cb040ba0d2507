//! Room: one named group of peers and its message history.
//!
//! A [`Room`] is a cheap handle onto a worker task. The worker owns the room's
//! endpoint, [`DiscoveryService`], [`SessionManager`], [`MessageBroadcaster`]
//! and [`MessageHistory`], and applies network events and consumer commands
//! one at a time from a single queue. Consumers read published snapshots
//! through `tokio::sync::watch` channels.
//!
//! The worker stops when [`Room::destroy`] is called or the last handle is
//! dropped; either way advertising and browsing stop and the endpoint closes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::broadcast::{BroadcastStats, MessageBroadcaster};
use crate::discovery::{DiscoveryService, DiscoveryStatus};
use crate::error::NetworkError;
use crate::event::{EventSink, NetworkEvent, RoomInput};
use crate::history::{HistorySnapshot, Message, MessageHistory};
use crate::identity::{PeerId, PeerIdentity};
use crate::service::ServiceType;
use crate::session::{ConnectionState, Handshake, SessionManager};
use crate::transport::{RoomEndpoint, Transport};

/// Published summary of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomStatus {
    /// Identity used as sender for new messages.
    pub local: PeerIdentity,
    pub discovery: DiscoveryStatus,
    /// Connection state of every peer the room has tracked.
    pub sessions: BTreeMap<PeerId, ConnectionState>,
    pub stats: BroadcastStats,
    /// Invites that expired without a handshake.
    pub invite_timeouts: u64,
}

/// Handle to a running room.
#[derive(Debug)]
pub struct Room {
    room_id: String,
    service_type: ServiceType,
    tx: mpsc::UnboundedSender<RoomInput>,
    peers: watch::Receiver<Vec<PeerIdentity>>,
    history: watch::Receiver<HistorySnapshot>,
    status: watch::Receiver<RoomStatus>,
}

impl Room {
    /// Open the room's endpoint on `transport` and start its worker.
    ///
    /// Discovery starts immediately. Must be called from within a tokio
    /// runtime.
    pub fn create(
        room_id: &str,
        local: PeerIdentity,
        invite_timeout: Duration,
        transport: &dyn Transport,
    ) -> Result<Self, NetworkError> {
        let service_type = ServiceType::for_room(room_id)?;
        let runtime = Handle::try_current()
            .map_err(|e| NetworkError::Transport(format!("Room {room_id} needs a runtime: {e}")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Arc::new(EventSink::new(room_id, &tx));
        let endpoint: Arc<dyn RoomEndpoint> =
            Arc::from(transport.open(&service_type, &local, sink.clone(), sink)?);

        let history = MessageHistory::new();
        let sessions = SessionManager::new(local.clone());
        let discovery = DiscoveryService::new(room_id, Arc::clone(&endpoint));
        let broadcaster = MessageBroadcaster::new(room_id);

        let (peers_tx, peers_rx) = watch::channel(Vec::new());
        let (history_tx, history_rx) = watch::channel(history.snapshot());
        let (status_tx, status_rx) = watch::channel(RoomStatus {
            local,
            discovery: discovery.status(),
            sessions: BTreeMap::new(),
            stats: broadcaster.stats(),
            invite_timeouts: 0,
        });

        let worker = RoomWorker {
            room_id: room_id.to_string(),
            invite_timeout,
            endpoint,
            discovery,
            sessions,
            broadcaster,
            history,
            invite_timeouts: 0,
            queue: tx.downgrade(),
            peers_tx,
            history_tx,
            status_tx,
        };
        runtime.spawn(worker.run(rx));
        info!("Room {room_id} created as {service_type}");

        Ok(Self {
            room_id: room_id.to_string(),
            service_type,
            tx,
            peers: peers_rx,
            history: history_rx,
            status: status_rx,
        })
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// The discovery key this room advertises and browses under.
    pub fn service_type(&self) -> &ServiceType {
        &self.service_type
    }

    fn enqueue(&self, input: RoomInput) -> Result<(), NetworkError> {
        self.tx
            .send(input)
            .map_err(|_| NetworkError::RoomClosed(self.room_id.clone()))
    }

    /// Broadcast `payload` to every connected peer and record it locally.
    ///
    /// Per-peer failures are contained (see [`RoomStatus::stats`]); the only
    /// error is [`NetworkError::RoomClosed`]. A payload larger than
    /// [`MAX_PAYLOAD_SIZE`](crate::wire::MAX_PAYLOAD_SIZE) is still recorded
    /// locally but counts as a failed send to every connected peer.
    pub async fn send(&self, payload: impl Into<Vec<u8>>) -> Result<Message, NetworkError> {
        let (reply, recorded) = oneshot::channel();
        self.enqueue(RoomInput::Send {
            payload: payload.into(),
            reply,
        })?;
        recorded
            .await
            .map_err(|_| NetworkError::RoomClosed(self.room_id.clone()))
    }

    /// Serialize `value` as JSON and [`send`](Room::send) it.
    pub async fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<Message, NetworkError> {
        let payload = serde_json::to_vec(value).map_err(|e| NetworkError::Encode(e.to_string()))?;
        self.send(payload).await
    }

    /// Invite `peer` explicitly. A no-op while a session is already under way.
    pub fn invite(&self, peer: PeerIdentity) -> Result<(), NetworkError> {
        self.enqueue(RoomInput::Invite(peer))
    }

    /// Use `identity` as the sender of subsequent messages.
    pub fn set_local_identity(&self, identity: PeerIdentity) -> Result<(), NetworkError> {
        self.enqueue(RoomInput::Rename(identity))
    }

    /// Start (or retry) advertising and browsing.
    pub fn start_discovery(&self) -> Result<(), NetworkError> {
        self.enqueue(RoomInput::StartDiscovery)
    }

    pub fn stop_discovery(&self) -> Result<(), NetworkError> {
        self.enqueue(RoomInput::StopDiscovery)
    }

    /// Current connected-peer set.
    pub fn connected_peers(&self) -> Vec<PeerIdentity> {
        self.peers.borrow().clone()
    }

    /// Current history snapshot.
    pub fn history(&self) -> HistorySnapshot {
        Arc::clone(&self.history.borrow())
    }

    pub fn status(&self) -> RoomStatus {
        self.status.borrow().clone()
    }

    /// Connection state of `peer` as last published.
    pub fn connection_state(&self, peer: &PeerId) -> ConnectionState {
        self.status
            .borrow()
            .sessions
            .get(peer)
            .copied()
            .unwrap_or(ConnectionState::NotConnected)
    }

    pub fn subscribe_peers(&self) -> watch::Receiver<Vec<PeerIdentity>> {
        self.peers.clone()
    }

    pub fn subscribe_history(&self) -> watch::Receiver<HistorySnapshot> {
        self.history.clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<RoomStatus> {
        self.status.clone()
    }

    /// Stop the worker and wait until discovery is released and the endpoint
    /// is closed. Later calls on this handle fail with `RoomClosed`.
    pub async fn destroy(&self) {
        if self.tx.send(RoomInput::Shutdown).is_err() {
            return;
        }
        let mut status = self.status.clone();
        while status.changed().await.is_ok() {}
        info!("Room {} destroyed", self.room_id);
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

struct RoomWorker {
    room_id: String,
    invite_timeout: Duration,
    endpoint: Arc<dyn RoomEndpoint>,
    discovery: DiscoveryService,
    sessions: SessionManager,
    broadcaster: MessageBroadcaster,
    history: MessageHistory,
    invite_timeouts: u64,
    queue: mpsc::WeakUnboundedSender<RoomInput>,
    peers_tx: watch::Sender<Vec<PeerIdentity>>,
    history_tx: watch::Sender<HistorySnapshot>,
    status_tx: watch::Sender<RoomStatus>,
}

impl RoomWorker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RoomInput>) {
        self.discovery.start();
        self.publish_status();

        while let Some(input) = rx.recv().await {
            match input {
                RoomInput::Shutdown => break,
                RoomInput::Network(event) => self.handle_event(event),
                RoomInput::Send { payload, reply } => {
                    let message = self.send(payload);
                    let _ = reply.send(message);
                }
                RoomInput::Invite(peer) => self.invite(peer),
                RoomInput::Rename(identity) => {
                    info!("Room {}: local identity is now {identity}", self.room_id);
                    self.sessions.set_local(identity);
                }
                RoomInput::InviteExpired { peer, attempt } => {
                    if self.sessions.invite_expired(&peer.id, attempt) {
                        self.invite_timeouts += 1;
                        warn!("Room {}: invite to {peer} timed out", self.room_id);
                    }
                }
                RoomInput::StartDiscovery => self.discovery.start(),
                RoomInput::StopDiscovery => self.discovery.stop(),
            }
            self.publish_status();
        }
        debug!("Room {} worker exiting", self.room_id);
    }

    fn handle_event(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::PeerFound(peer) => {
                if self.discovery.peer_found(&peer) {
                    self.invite(peer);
                }
            }
            NetworkEvent::PeerLost(peer) => {
                self.discovery.peer_lost(&peer);
                self.drop_session(&peer.id);
            }
            NetworkEvent::InviteReceived(from) => {
                if self.discovery.invitation_received(&from) {
                    if let Some(attempt) = self.sessions.invite_received(from.clone()) {
                        self.arm_invite_timeout(from.clone(), attempt);
                    }
                    self.endpoint.accept(&from.id);
                }
            }
            NetworkEvent::StateChanged { peer, state } => match state {
                ConnectionState::Connected => match self.sessions.handshake_completed(&peer) {
                    Handshake::Joined => {
                        info!("Room {}: {peer} joined", self.room_id);
                        self.publish_peers();
                    }
                    Handshake::AlreadyConnected => {
                        debug!("Room {}: duplicate handshake with {peer}", self.room_id)
                    }
                    Handshake::Stale => {
                        warn!("Room {}: late handshake with {peer}, dropping link", self.room_id);
                        self.endpoint.disconnect(&peer.id);
                    }
                },
                ConnectionState::Connecting => {
                    debug!("Room {}: {peer} is connecting", self.room_id)
                }
                ConnectionState::NotConnected | ConnectionState::Disconnected => {
                    if self.sessions.connection_lost(&peer.id) {
                        info!("Room {}: {peer} left", self.room_id);
                        self.publish_peers();
                    }
                }
            },
            NetworkEvent::DataReceived { from, data } => {
                if self
                    .broadcaster
                    .on_receive(&from, &data, &mut self.history)
                    .is_some()
                {
                    self.publish_history();
                }
            }
            NetworkEvent::TransferReceived { from, kind, name } => {
                self.broadcaster.on_transfer(&from, kind, &name);
            }
            NetworkEvent::DiscoveryFailed { role, error } => {
                self.discovery.on_start_failed(role, &error);
            }
            NetworkEvent::SendFailed { peer, error } => {
                self.broadcaster.on_send_failed(&peer, &error);
            }
        }
    }

    fn send(&mut self, payload: Vec<u8>) -> Message {
        let peers = self.sessions.connected_peers();
        let sender = self.sessions.local().clone();
        let message = self.broadcaster.send(
            &*self.endpoint,
            &sender,
            &peers,
            payload,
            &mut self.history,
        );
        self.publish_history();
        message
    }

    fn invite(&mut self, peer: PeerIdentity) {
        if peer.id == self.endpoint.wire_identity().id {
            return;
        }
        if let Some(attempt) = self.sessions.begin_invite(peer.clone()) {
            info!("Room {}: inviting {peer}", self.room_id);
            self.endpoint.invite(&peer, self.invite_timeout);
            self.arm_invite_timeout(peer, attempt);
        }
    }

    fn arm_invite_timeout(&self, peer: PeerIdentity, attempt: u64) {
        let queue = self.queue.clone();
        let timeout = self.invite_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(tx) = queue.upgrade() {
                let _ = tx.send(RoomInput::InviteExpired { peer, attempt });
            }
        });
    }

    fn drop_session(&mut self, peer: &PeerId) {
        let was_active = self.sessions.state(peer).is_active();
        if self.sessions.connection_lost(peer) {
            self.publish_peers();
        }
        if was_active {
            self.endpoint.disconnect(peer);
        }
    }

    fn publish_peers(&self) {
        let next = self.sessions.connected_peers();
        self.peers_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn publish_history(&self) {
        self.history_tx.send_replace(self.history.snapshot());
    }

    fn publish_status(&self) {
        let next = RoomStatus {
            local: self.sessions.local().clone(),
            discovery: self.discovery.status(),
            sessions: self.sessions.states(),
            stats: self.broadcaster.stats(),
            invite_timeouts: self.invite_timeouts,
        };
        self.status_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

impl Drop for RoomWorker {
    fn drop(&mut self) {
        self.discovery.stop();
        self.endpoint.close();
        debug!("Room {}: endpoint closed", self.room_id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryNetwork;

    const WAIT: Duration = Duration::from_secs(2);

    async fn wait_status(room: &Room, check: impl Fn(&RoomStatus) -> bool) -> RoomStatus {
        let mut rx = room.subscribe_status();
        let status = tokio::time::timeout(WAIT, rx.wait_for(|s| check(s)))
            .await
            .expect("status condition not reached")
            .expect("room worker stopped")
            .clone();
        status
    }

    #[tokio::test]
    async fn test_send_without_peers_echoes_once() {
        let network = MemoryNetwork::new();
        let alice = PeerIdentity::generate("Alice");
        let room = Room::create("A", alice.clone(), Duration::from_secs(10), &network).unwrap();

        let message = room.send(b"hello".to_vec()).await.unwrap();
        assert_eq!(message.sender, alice);

        let history = room.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].payload, b"hello");
        assert_eq!(history[0].sequence, 0);
        assert_eq!(network.transmissions(), 0);
    }

    #[tokio::test]
    async fn test_create_starts_discovery() {
        let network = MemoryNetwork::new();
        let alice = PeerIdentity::generate("Alice");
        let room = Room::create("A", alice.clone(), Duration::from_secs(10), &network).unwrap();

        let status = wait_status(&room, |s| s.discovery.is_discoverable()).await;
        assert_eq!(status.local, alice);
        assert!(network.is_advertising(room.service_type(), &alice.id));
        assert!(network.is_browsing(room.service_type(), &alice.id));
    }

    #[tokio::test]
    async fn test_destroy_releases_endpoint() {
        let network = MemoryNetwork::new();
        let alice = PeerIdentity::generate("Alice");
        let room = Room::create("A", alice.clone(), Duration::from_secs(10), &network).unwrap();
        wait_status(&room, |s| s.discovery.is_discoverable()).await;

        room.destroy().await;
        assert!(!network.is_advertising(room.service_type(), &alice.id));
        assert!(matches!(
            room.send(b"late".to_vec()).await,
            Err(NetworkError::RoomClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_dropping_handle_stops_worker() {
        let network = MemoryNetwork::new();
        let alice = PeerIdentity::generate("Alice");
        let room = Room::create("B", alice.clone(), Duration::from_secs(10), &network).unwrap();
        let service = room.service_type().clone();
        let mut status = room.subscribe_status();
        wait_status(&room, |s| s.discovery.is_discoverable()).await;

        drop(room);
        tokio::time::timeout(WAIT, async { while status.changed().await.is_ok() {} })
            .await
            .unwrap();
        assert!(!network.is_browsing(&service, &alice.id));
    }

    #[tokio::test]
    async fn test_two_rooms_connect_and_exchange() {
        let network = MemoryNetwork::new();
        let alice = PeerIdentity::generate("Alice");
        let bob = PeerIdentity::generate("Bob");
        let room_a = Room::create("A", alice.clone(), Duration::from_secs(10), &network).unwrap();
        let room_b = Room::create("A", bob.clone(), Duration::from_secs(10), &network).unwrap();

        let mut peers = room_a.subscribe_peers();
        tokio::time::timeout(WAIT, peers.wait_for(|p| p.len() == 1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(room_a.connected_peers(), vec![bob.clone()]);
        assert_eq!(room_a.connection_state(&bob.id), ConnectionState::Connected);

        let sent = room_a.send(b"hi".to_vec()).await.unwrap();
        let mut history = room_b.subscribe_history();
        let received = tokio::time::timeout(WAIT, history.wait_for(|h| h.len() == 1))
            .await
            .unwrap()
            .unwrap()
            .clone();
        assert_eq!(received[0].id, sent.id);
        assert_eq!(received[0].sender, alice);
        assert_eq!(received[0].payload, b"hi");
        assert_eq!(room_a.history().len(), 1);
    }

    #[tokio::test]
    async fn test_discovery_failure_and_retry() {
        let network = MemoryNetwork::new();
        network.set_discovery_failure(true);
        let room = Room::create("C", PeerIdentity::generate("Alice"), Duration::from_secs(10), &network)
            .unwrap();

        let status = wait_status(&room, |s| {
            matches!(
                s.discovery.advertising,
                crate::discovery::ActivityState::Failed(_)
            ) && matches!(s.discovery.browsing, crate::discovery::ActivityState::Failed(_))
        })
        .await;
        assert!(!status.discovery.is_discoverable());

        network.set_discovery_failure(false);
        room.start_discovery().unwrap();
        wait_status(&room, |s| s.discovery.is_discoverable()).await;
    }

    #[tokio::test]
    async fn test_send_json_encodes_payload() {
        let network = MemoryNetwork::new();
        let room = Room::create("D", PeerIdentity::generate("Alice"), Duration::from_secs(10), &network)
            .unwrap();

        let message = room
            .send_json(&serde_json::json!({"strokes": [1, 2, 3]}))
            .await
            .unwrap();
        let decoded: serde_json::Value = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(decoded["strokes"][2], 3);
    }

    #[tokio::test]
    async fn test_invalid_room_id_rejected() {
        let network = MemoryNetwork::new();
        let result = Room::create(
            "not a valid id",
            PeerIdentity::generate("Alice"),
            Duration::from_secs(10),
            &network,
        );
        assert!(matches!(result, Err(NetworkError::InvalidServiceType { .. })));
    }
}
