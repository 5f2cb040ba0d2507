#![allow(dead_code)]

use std::time::Duration;

use picto_network::{HistorySnapshot, PeerIdentity, Room, RoomStatus};

pub const WAIT: Duration = Duration::from_secs(5);

/// Wait until the room's connected-peer set satisfies `check`.
pub async fn peers_until(room: &Room, check: impl Fn(&[PeerIdentity]) -> bool) -> Vec<PeerIdentity> {
    let mut rx = room.subscribe_peers();
    let peers = tokio::time::timeout(WAIT, rx.wait_for(|p| check(p.as_slice())))
        .await
        .expect("peer condition not reached in time")
        .expect("room worker stopped")
        .clone();
    peers
}

/// Wait until the room's history satisfies `check`.
pub async fn history_until(room: &Room, check: impl Fn(&HistorySnapshot) -> bool) -> HistorySnapshot {
    let mut rx = room.subscribe_history();
    let history = tokio::time::timeout(WAIT, rx.wait_for(|h| check(h)))
        .await
        .expect("history condition not reached in time")
        .expect("room worker stopped")
        .clone();
    history
}

/// Wait until the room's status satisfies `check`.
pub async fn status_until(room: &Room, check: impl Fn(&RoomStatus) -> bool) -> RoomStatus {
    let mut rx = room.subscribe_status();
    let status = tokio::time::timeout(WAIT, rx.wait_for(|s| check(s)))
        .await
        .expect("status condition not reached in time")
        .expect("room worker stopped")
        .clone();
    status
}
