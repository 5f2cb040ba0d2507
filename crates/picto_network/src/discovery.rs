//! Discovery service: room-scoped advertising and browsing.
//!
//! The [`DiscoveryService`] drives the advertise/browse halves of a room's
//! endpoint, keeps track of which peers are nearby, and decides which found
//! peers should be auto-invited. It releases discovery when dropped, so a room
//! worker stops advertising and browsing however it exits.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::NetworkError;
use crate::event::DiscoveryRole;
use crate::identity::{PeerId, PeerIdentity};
use crate::transport::RoomEndpoint;

/// State of one discovery half.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    /// Not requested.
    #[default]
    Stopped,
    /// Requested and not reported as failed.
    Running,
    /// The transport could not start it; `start()` retries.
    Failed(String),
}

/// Published discovery status of a room.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryStatus {
    pub advertising: ActivityState,
    pub browsing: ActivityState,
    /// Peers currently seen advertising the room.
    pub nearby: usize,
}

impl DiscoveryStatus {
    /// Whether both halves are up.
    pub fn is_discoverable(&self) -> bool {
        self.advertising == ActivityState::Running && self.browsing == ActivityState::Running
    }
}

/// Advertising + browsing for one room.
pub struct DiscoveryService {
    room_id: String,
    endpoint: Arc<dyn RoomEndpoint>,
    advertising: ActivityState,
    browsing: ActivityState,
    nearby: HashMap<PeerId, PeerIdentity>,
}

impl DiscoveryService {
    /// Create a stopped service over `endpoint`.
    pub fn new(room_id: impl Into<String>, endpoint: Arc<dyn RoomEndpoint>) -> Self {
        Self {
            room_id: room_id.into(),
            endpoint,
            advertising: ActivityState::Stopped,
            browsing: ActivityState::Stopped,
            nearby: HashMap::new(),
        }
    }

    /// Start advertising and browsing. Halves already running are left alone;
    /// stopped or failed halves are (re)started.
    pub fn start(&mut self) {
        if self.advertising != ActivityState::Running {
            self.endpoint.start_advertising();
            self.advertising = ActivityState::Running;
        }
        if self.browsing != ActivityState::Running {
            self.endpoint.start_browsing();
            self.browsing = ActivityState::Running;
        }
        info!("Room {}: discovery started", self.room_id);
    }

    /// Stop advertising and browsing.
    pub fn stop(&mut self) {
        if self.advertising != ActivityState::Stopped {
            self.endpoint.stop_advertising();
            self.advertising = ActivityState::Stopped;
        }
        if self.browsing != ActivityState::Stopped {
            self.endpoint.stop_browsing();
            self.browsing = ActivityState::Stopped;
        }
        self.nearby.clear();
        debug!("Room {}: discovery stopped", self.room_id);
    }

    /// The transport could not start one half. The room stays up but is not
    /// discoverable through that half until `start()` is called again.
    pub fn on_start_failed(&mut self, role: DiscoveryRole, error: &NetworkError) {
        error!("Room {}: {role} did not start: {error}", self.room_id);
        let slot = match role {
            DiscoveryRole::Advertising => &mut self.advertising,
            DiscoveryRole::Browsing => &mut self.browsing,
        };
        if *slot == ActivityState::Running {
            *slot = ActivityState::Failed(error.to_string());
        }
    }

    /// A peer appeared. Returns `true` when it should be auto-invited.
    pub fn peer_found(&mut self, peer: &PeerIdentity) -> bool {
        if peer.id == self.endpoint.wire_identity().id {
            return false;
        }
        info!("Room {}: found peer {peer}", self.room_id);
        self.nearby.insert(peer.id.clone(), peer.clone());
        true
    }

    /// A peer went away. The loss is forwarded to the session manager by the
    /// caller; discovery only forgets the peer.
    pub fn peer_lost(&mut self, peer: &PeerIdentity) {
        info!("Room {}: lost peer {peer}", self.room_id);
        self.nearby.remove(&peer.id);
    }

    /// A peer invited us. Rooms have no admission control, so the answer is
    /// always yes.
    pub fn invitation_received(&self, from: &PeerIdentity) -> bool {
        info!("Room {}: invitation from {from}, accepting", self.room_id);
        true
    }

    /// Peers currently seen advertising.
    pub fn nearby_peers(&self) -> Vec<PeerIdentity> {
        self.nearby.values().cloned().collect()
    }

    /// Snapshot for publishing.
    pub fn status(&self) -> DiscoveryStatus {
        DiscoveryStatus {
            advertising: self.advertising.clone(),
            browsing: self.browsing.clone(),
            nearby: self.nearby.len(),
        }
    }
}

impl Drop for DiscoveryService {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
