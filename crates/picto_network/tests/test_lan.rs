//! Two devices talking over loopback with the real LAN transport.
//!
//! Each side binds its own discovery port and announces to the other's, so
//! the test needs neither broadcast permission nor a shared port.

mod common;

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use picto_network::{LanTransport, MAX_PAYLOAD_SIZE, NetworkConfig, RoomRegistry};

use common::{history_until, peers_until, status_until};

/// Two distinct free UDP ports on loopback.
fn free_udp_ports() -> (u16, u16) {
    let first = UdpSocket::bind("127.0.0.1:0").unwrap();
    let second = UdpSocket::bind("127.0.0.1:0").unwrap();
    (
        first.local_addr().unwrap().port(),
        second.local_addr().unwrap().port(),
    )
}

fn loopback_config(listen_port: u16, announce_port: u16) -> NetworkConfig {
    let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);
    NetworkConfig {
        room_ids: vec!["A".into(), "B".into()],
        invite_timeout: Duration::from_secs(3),
        discovery_bind: SocketAddr::new(localhost, listen_port),
        announce_addr: SocketAddr::new(localhost, announce_port),
        listen_ip: localhost,
        announce_interval: Duration::from_millis(100),
        peer_ttl: Duration::from_secs(2),
    }
}

/// Start Alice and Bob on loopback and wait until room A is connected on
/// both sides.
async fn connected_pair() -> (RoomRegistry, RoomRegistry) {
    let (alice_port, bob_port) = free_udp_ports();
    let alice_config = loopback_config(alice_port, bob_port);
    let bob_config = loopback_config(bob_port, alice_port);

    let alice = RoomRegistry::new(
        &alice_config,
        "Alice",
        Arc::new(LanTransport::from_config(&alice_config)),
    )
    .unwrap();
    let bob = RoomRegistry::new(
        &bob_config,
        "Bob",
        Arc::new(LanTransport::from_config(&bob_config)),
    )
    .unwrap();

    let connected = peers_until(&alice.lookup("A").unwrap(), |p| !p.is_empty()).await;
    assert_eq!(connected, vec![bob.local_identity()]);
    peers_until(&bob.lookup("A").unwrap(), |p| !p.is_empty()).await;
    (alice, bob)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lan_loopback_exchange() {
    let (alice, bob) = connected_pair().await;
    let alice_room = alice.lookup("A").unwrap();
    let bob_room = bob.lookup("A").unwrap();

    let sent = alice_room.send(b"hi".to_vec()).await.unwrap();
    let received = history_until(&bob_room, |h| !h.is_empty()).await;
    assert_eq!(received[0].id, sent.id);
    assert_eq!(received[0].payload, b"hi");
    assert_eq!(received[0].sender, alice.local_identity());

    // Room B traffic never shows up in room A and vice versa.
    assert!(bob.lookup("B").unwrap().history().is_empty());

    bob.shutdown().await;
    peers_until(&alice_room, |p| p.is_empty()).await;
    alice.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lan_large_binary_payload_arrives_intact() {
    let (alice, bob) = connected_pair().await;
    let alice_room = alice.lookup("A").unwrap();
    let bob_room = bob.lookup("A").unwrap();

    let payload: Vec<u8> = (0..=255u8).cycle().take(5 * 1024 * 1024).collect();
    let sent = alice_room.send(payload.clone()).await.unwrap();
    let received = history_until(&bob_room, |h| !h.is_empty()).await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].id, sent.id);
    assert_eq!(received[0].payload.len(), payload.len());
    assert!(received[0].payload == payload);

    // The link survives and keeps carrying traffic both ways.
    assert_eq!(alice_room.connected_peers().len(), 1);
    assert_eq!(bob_room.connected_peers().len(), 1);
    bob_room.send(b"got it".to_vec()).await.unwrap();
    let reply = history_until(&alice_room, |h| h.len() == 2).await;
    assert_eq!(reply[1].payload, b"got it");
    assert_eq!(alice_room.status().stats.send_failures, 0);

    bob.shutdown().await;
    alice.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lan_oversized_payload_is_a_counted_failure() {
    let (alice, bob) = connected_pair().await;
    let alice_room = alice.lookup("A").unwrap();
    let bob_room = bob.lookup("A").unwrap();

    let recorded = alice_room
        .send(vec![0xAB; MAX_PAYLOAD_SIZE + 1])
        .await
        .unwrap();
    assert_eq!(recorded.payload.len(), MAX_PAYLOAD_SIZE + 1);
    let status = status_until(&alice_room, |s| s.stats.send_failures == 1).await;
    assert_eq!(status.stats.transmissions, 0);

    // Nothing reached Bob and the session is still up.
    alice_room.send(b"small".to_vec()).await.unwrap();
    let received = history_until(&bob_room, |h| !h.is_empty()).await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].payload, b"small");
    assert_eq!(alice_room.connected_peers().len(), 1);

    bob.shutdown().await;
    alice.shutdown().await;
}
