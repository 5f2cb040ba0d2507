//! Transport seam.
//!
//! A [`Transport`] knows how to put a device on some network. For each room
//! it opens a [`RoomEndpoint`]: the advertiser, browser and session of that
//! room rolled into one handle. Every endpoint method returns immediately;
//! outcomes come back through the observers passed to [`Transport::open`].
//!
//! Two implementations ship with the crate:
//! - [`lan::LanTransport`]: UDP broadcast discovery plus WebSocket links.
//! - [`memory::MemoryNetwork`]: an in-process network for tests and
//!   simulations.

pub mod lan;
mod link;
pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use crate::error::NetworkError;
use crate::event::{DiscoveryObserver, SessionObserver};
use crate::identity::{PeerId, PeerIdentity};
use crate::service::ServiceType;

/// Opens room-scoped endpoints.
pub trait Transport: Send + Sync {
    /// Open the endpoint for `service`, presenting `local` to remote peers.
    ///
    /// The endpoint starts idle: nothing is advertised or browsed until asked.
    fn open(
        &self,
        service: &ServiceType,
        local: &PeerIdentity,
        discovery: Arc<dyn DiscoveryObserver>,
        session: Arc<dyn SessionObserver>,
    ) -> Result<Box<dyn RoomEndpoint>, NetworkError>;
}

/// One room's view of the network.
pub trait RoomEndpoint: Send + Sync {
    /// The identity remote peers see for this endpoint.
    fn wire_identity(&self) -> &PeerIdentity;

    /// Begin advertising. Failures arrive as `discovery_failed`.
    fn start_advertising(&self);
    /// Stop advertising. Idempotent.
    fn stop_advertising(&self);
    /// Begin browsing. Failures arrive as `discovery_failed`.
    fn start_browsing(&self);
    /// Stop browsing. Idempotent.
    fn stop_browsing(&self);

    /// Invite a discovered peer. The result arrives as `state_changed`.
    fn invite(&self, peer: &PeerIdentity, timeout: Duration);
    /// Accept a pending invite from `peer`.
    fn accept(&self, peer: &PeerId);
    /// Queue `data` for a connected peer.
    fn send(&self, peer: &PeerId, data: Vec<u8>) -> Result<(), NetworkError>;
    /// Drop the link to `peer`, if any.
    fn disconnect(&self, peer: &PeerId);

    /// Stop everything and release all links.
    fn close(&self);
}
