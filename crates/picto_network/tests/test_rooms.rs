mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use picto_network::{
    ConnectionState, DiscoveryObserver, DiscoveryRole, MemoryNetwork, NetworkConfig, NetworkError,
    PeerIdentity, RoomRegistry, ServiceType, SessionObserver, TransferKind, Transport,
};

use common::{history_until, peers_until, status_until};

fn config(ids: &[&str]) -> NetworkConfig {
    NetworkConfig {
        room_ids: ids.iter().map(|id| id.to_string()).collect(),
        ..NetworkConfig::default()
    }
}

fn registry(network: &MemoryNetwork, ids: &[&str], name: &str) -> RoomRegistry {
    RoomRegistry::new(&config(ids), name, Arc::new(network.clone())).unwrap()
}

/// Observer for a hand-driven endpoint: forwards invites, ignores the rest.
struct InviteProbe {
    invites: mpsc::UnboundedSender<PeerIdentity>,
}

impl DiscoveryObserver for InviteProbe {
    fn peer_found(&self, _peer: PeerIdentity) {}
    fn peer_lost(&self, _peer: PeerIdentity) {}
    fn discovery_failed(&self, _role: DiscoveryRole, _error: NetworkError) {}
}

impl SessionObserver for InviteProbe {
    fn invite_received(&self, from: PeerIdentity) {
        let _ = self.invites.send(from);
    }
    fn state_changed(&self, _peer: PeerIdentity, _state: ConnectionState) {}
    fn data_received(&self, _from: PeerIdentity, _data: Vec<u8>) {}
    fn transfer_received(&self, _from: PeerIdentity, _kind: TransferKind, _name: String) {}
    fn send_failed(&self, _peer: PeerIdentity, _error: NetworkError) {}
}

// -- Scenarios -------------------------------------------------------------

#[tokio::test]
async fn test_hello_with_no_peers_stays_in_room_a() {
    let network = MemoryNetwork::new();
    let alice = registry(&network, &["A", "B", "C", "D"], "Alice");

    alice.lookup("A").unwrap().send(b"hello".to_vec()).await.unwrap();

    let history = alice.lookup("A").unwrap().history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].sender.display_name, "Alice");
    assert_eq!(history[0].payload, b"hello");
    for id in ["B", "C", "D"] {
        assert!(alice.lookup(id).unwrap().history().is_empty());
    }
    assert_eq!(network.transmissions(), 0);
}

#[tokio::test]
async fn test_bob_is_auto_invited_and_receives_hi() {
    let network = MemoryNetwork::new();
    let alice = registry(&network, &["A", "B", "C", "D"], "Alice");
    let bob = registry(&network, &["A", "B", "C", "D"], "Bob");

    let room = alice.lookup("A").unwrap();
    let connected = peers_until(&room, |p| !p.is_empty()).await;
    assert_eq!(connected, vec![bob.local_identity()]);

    room.send(b"hi".to_vec()).await.unwrap();
    assert_eq!(room.history().len(), 1);

    let bob_room = bob.lookup("A").unwrap();
    let received = history_until(&bob_room, |h| !h.is_empty()).await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].payload, b"hi");
    assert_eq!(received[0].sender, alice.local_identity());

    // Rooms are isolated from each other.
    assert!(bob.lookup("B").unwrap().history().is_empty());
}

#[tokio::test]
async fn test_send_reaches_every_connected_peer_once() {
    let network = MemoryNetwork::new();
    let alice = registry(&network, &["A"], "Alice");
    let others: Vec<RoomRegistry> = ["Bob", "Carol", "Dave"]
        .iter()
        .map(|name| registry(&network, &["A"], name))
        .collect();

    let room = alice.lookup("A").unwrap();
    peers_until(&room, |p| p.len() == 3).await;
    let before = network.transmissions();

    let sent = room.send(b"drawing".to_vec()).await.unwrap();
    assert_eq!(network.transmissions() - before, 3);
    assert_eq!(room.history().len(), 1);

    for other in &others {
        let other_room = other.lookup("A").unwrap();
        let history = history_until(&other_room, |h| !h.is_empty()).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, sent.id);
    }
    assert_eq!(room.status().stats.transmissions, 3);
}

#[tokio::test]
async fn test_rename_keeps_recorded_senders() {
    let network = MemoryNetwork::new();
    let alice = registry(&network, &["A", "B"], "Alice");
    let room = alice.lookup("A").unwrap();
    let original = alice.local_identity();

    room.send(b"before".to_vec()).await.unwrap();
    let renamed = alice.rename_local_identity("Alicia");
    room.send(b"after".to_vec()).await.unwrap();

    let history = room.history();
    assert_eq!(history[0].sender, original);
    assert_eq!(history[1].sender, renamed);
    assert_ne!(renamed.id, original.id);

    let other = alice.lookup("B").unwrap();
    status_until(&other, |s| s.local == renamed).await;
}

#[tokio::test]
async fn test_lookup_is_identity_stable() {
    let network = MemoryNetwork::new();
    let alice = registry(&network, &["A", "B", "C", "D"], "Alice");

    assert!(Arc::ptr_eq(
        &alice.lookup("C").unwrap(),
        &alice.lookup("C").unwrap()
    ));
    assert!(matches!(
        alice.lookup("E"),
        Err(NetworkError::RoomNotFound(_))
    ));
}

#[tokio::test]
async fn test_unanswered_invite_times_out_then_reinvite_connects() {
    let network = MemoryNetwork::new();
    let service = ServiceType::for_room("A").unwrap();

    // Bob is a bare endpoint that only answers when told to.
    let (invites_tx, mut invites) = mpsc::unbounded_channel();
    let probe = Arc::new(InviteProbe { invites: invites_tx });
    let bob = PeerIdentity::generate("Bob");
    let bob_endpoint = network
        .open(&service, &bob, probe.clone(), probe)
        .unwrap();
    bob_endpoint.start_advertising();

    let config = NetworkConfig {
        room_ids: vec!["A".into()],
        invite_timeout: Duration::from_millis(150),
        ..NetworkConfig::default()
    };
    let alice = RoomRegistry::new(&config, "Alice", Arc::new(network.clone())).unwrap();
    let room = alice.lookup("A").unwrap();

    let first = tokio::time::timeout(common::WAIT, invites.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.id, alice.local_identity().id);

    let status = status_until(&room, |s| s.invite_timeouts == 1).await;
    assert_eq!(
        status.sessions.get(&bob.id),
        Some(&ConnectionState::NotConnected)
    );
    assert!(room.connected_peers().is_empty());

    room.invite(bob.clone()).unwrap();
    tokio::time::timeout(common::WAIT, invites.recv())
        .await
        .unwrap()
        .unwrap();
    bob_endpoint.accept(&alice.local_identity().id);

    let connected = peers_until(&room, |p| !p.is_empty()).await;
    assert_eq!(connected, vec![bob.clone()]);
    assert_eq!(room.connection_state(&bob.id), ConnectionState::Connected);
}

#[tokio::test]
async fn test_undecodable_data_is_dropped_and_counted() {
    let network = MemoryNetwork::new();
    let alice = registry(&network, &["A"], "Alice");
    let room = alice.lookup("A").unwrap();
    let mallory = PeerIdentity::generate("Mallory");

    room.send(b"mine".to_vec()).await.unwrap();
    assert!(network.deliver_raw(
        room.service_type(),
        &mallory,
        &alice.local_identity().id,
        b"\x00not an envelope".to_vec(),
    ));

    let status = status_until(&room, |s| s.stats.decode_failures == 1).await;
    assert_eq!(status.stats.received, 0);
    assert_eq!(room.history().len(), 1);
}

#[tokio::test]
async fn test_stream_and_resource_offers_are_rejected() {
    let network = MemoryNetwork::new();
    let alice = registry(&network, &["A"], "Alice");
    let room = alice.lookup("A").unwrap();
    let mallory = PeerIdentity::generate("Mallory");
    let me = alice.local_identity().id;

    network.offer_transfer(room.service_type(), &mallory, &me, TransferKind::Stream, "live");
    network.offer_transfer(room.service_type(), &mallory, &me, TransferKind::Resource, "a.png");

    status_until(&room, |s| s.stats.rejected_transfers == 2).await;
    assert!(room.history().is_empty());
}

#[tokio::test]
async fn test_vanished_peer_leaves_connected_set() {
    let network = MemoryNetwork::new();
    let alice = registry(&network, &["A"], "Alice");
    let bob = registry(&network, &["A"], "Bob");
    let room = alice.lookup("A").unwrap();
    peers_until(&room, |p| p.len() == 1).await;

    network.vanish(room.service_type(), &bob.local_identity().id);
    peers_until(&room, |p| p.is_empty()).await;
    assert_eq!(
        room.connection_state(&bob.local_identity().id),
        ConnectionState::NotConnected
    );
}

#[tokio::test]
async fn test_destroyed_peer_room_disconnects() {
    let network = MemoryNetwork::new();
    let alice = registry(&network, &["A"], "Alice");
    let bob = registry(&network, &["A"], "Bob");
    let room = alice.lookup("A").unwrap();
    peers_until(&room, |p| p.len() == 1).await;

    bob.shutdown().await;
    peers_until(&room, |p| p.is_empty()).await;

    // Sending afterwards only echoes locally.
    let before = network.transmissions();
    room.send(b"anyone?".to_vec()).await.unwrap();
    assert_eq!(network.transmissions(), before);
    assert_eq!(room.history().len(), 1);
}
