//! In-process transport.
//!
//! [`MemoryNetwork`] connects every endpoint opened on it, keyed by service
//! type and wire identity, so several registries in one process behave like
//! devices on one LAN. Invites, accepts and data are delivered synchronously
//! into the observers (which only enqueue), preserving per-link order.
//!
//! The network also exposes knobs for fault injection: muting a peer's
//! invites, failing discovery, and delivering raw bytes or transfer offers
//! that no real peer would send.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::NetworkError;
use crate::event::{DiscoveryObserver, DiscoveryRole, SessionObserver, TransferKind};
use crate::identity::{PeerId, PeerIdentity};
use crate::session::ConnectionState;
use crate::service::ServiceType;
use crate::transport::{RoomEndpoint, Transport};

type Key = (ServiceType, PeerId);
type Deferred = Vec<Box<dyn FnOnce() + Send>>;

struct Entry {
    identity: PeerIdentity,
    advertising: bool,
    browsing: bool,
    discovery: Arc<dyn DiscoveryObserver>,
    session: Arc<dyn SessionObserver>,
}

#[derive(Default)]
struct NetState {
    endpoints: HashMap<Key, Entry>,
    /// Outstanding invites: (service, from, to).
    pending: HashSet<(ServiceType, PeerId, PeerId)>,
    /// Live links, stored with the smaller id first.
    links: HashSet<(ServiceType, PeerId, PeerId)>,
    muted: HashSet<Key>,
    fail_discovery: bool,
    transmissions: u64,
}

fn link_key(service: &ServiceType, a: &PeerId, b: &PeerId) -> (ServiceType, PeerId, PeerId) {
    if a <= b {
        (service.clone(), a.clone(), b.clone())
    } else {
        (service.clone(), b.clone(), a.clone())
    }
}

fn run(deferred: Deferred) {
    for callback in deferred {
        callback();
    }
}

/// A simulated local network shared by any number of devices.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetState>>,
}

impl MemoryNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, invites addressed to `peer` in `service` are swallowed, so
    /// the inviter's handshake never completes.
    pub fn set_ignore_invites(&self, service: &ServiceType, peer: &PeerId, ignore: bool) {
        let key = (service.clone(), peer.clone());
        let mut state = self.state.lock();
        if ignore {
            state.muted.insert(key);
        } else {
            state.muted.remove(&key);
        }
    }

    /// Make every subsequent advertise/browse request fail.
    pub fn set_discovery_failure(&self, fail: bool) {
        self.state.lock().fail_discovery = fail;
    }

    /// Number of per-peer data transmissions delivered so far.
    pub fn transmissions(&self) -> u64 {
        self.state.lock().transmissions
    }

    /// Number of live links across all services.
    pub fn link_count(&self) -> usize {
        self.state.lock().links.len()
    }

    /// Whether `peer` is advertising in `service`.
    pub fn is_advertising(&self, service: &ServiceType, peer: &PeerId) -> bool {
        self.state
            .lock()
            .endpoints
            .get(&(service.clone(), peer.clone()))
            .is_some_and(|e| e.advertising)
    }

    /// Whether `peer` is browsing in `service`.
    pub fn is_browsing(&self, service: &ServiceType, peer: &PeerId) -> bool {
        self.state
            .lock()
            .endpoints
            .get(&(service.clone(), peer.clone()))
            .is_some_and(|e| e.browsing)
    }

    /// Hand arbitrary bytes to `to` as if `from` had sent them. Returns
    /// `false` if no endpoint `to` is open in `service`.
    pub fn deliver_raw(
        &self,
        service: &ServiceType,
        from: &PeerIdentity,
        to: &PeerId,
        data: Vec<u8>,
    ) -> bool {
        let session = match self.state.lock().endpoints.get(&(service.clone(), to.clone())) {
            Some(entry) => Arc::clone(&entry.session),
            None => return false,
        };
        session.data_received(from.clone(), data);
        true
    }

    /// Offer a stream or resource transfer to `to` on behalf of `from`.
    pub fn offer_transfer(
        &self,
        service: &ServiceType,
        from: &PeerIdentity,
        to: &PeerId,
        kind: TransferKind,
        name: &str,
    ) -> bool {
        let session = match self.state.lock().endpoints.get(&(service.clone(), to.clone())) {
            Some(entry) => Arc::clone(&entry.session),
            None => return false,
        };
        session.transfer_received(from.clone(), kind, name.to_string());
        true
    }

    /// Make `peer` disappear from `service` without a goodbye: browsers lose
    /// it and its links drop.
    pub fn vanish(&self, service: &ServiceType, peer: &PeerId) {
        let deferred = {
            let mut state = self.state.lock();
            detach(&mut state, &(service.clone(), peer.clone()))
        };
        run(deferred);
    }
}

impl Transport for MemoryNetwork {
    fn open(
        &self,
        service: &ServiceType,
        local: &PeerIdentity,
        discovery: Arc<dyn DiscoveryObserver>,
        session: Arc<dyn SessionObserver>,
    ) -> Result<Box<dyn RoomEndpoint>, NetworkError> {
        let key = (service.clone(), local.id.clone());
        let mut state = self.state.lock();
        if state.endpoints.contains_key(&key) {
            return Err(NetworkError::Transport(format!(
                "{local} already has an endpoint for {service}"
            )));
        }
        state.endpoints.insert(
            key,
            Entry {
                identity: local.clone(),
                advertising: false,
                browsing: false,
                discovery,
                session,
            },
        );
        debug!("Memory endpoint opened for {local} in {service}");
        Ok(Box::new(MemoryEndpoint {
            service: service.clone(),
            local: local.clone(),
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Remove an endpoint and everything attached to it.
fn detach(state: &mut NetState, key: &Key) -> Deferred {
    let mut deferred: Deferred = Vec::new();
    let Some(entry) = state.endpoints.remove(key) else {
        return deferred;
    };
    let (service, local) = key;

    if entry.advertising {
        for ((other_service, _), other) in &state.endpoints {
            if other.browsing && other_service == service {
                let observer = Arc::clone(&other.discovery);
                let lost = entry.identity.clone();
                deferred.push(Box::new(move || observer.peer_lost(lost)));
            }
        }
    }

    let dropped: Vec<_> = state
        .links
        .iter()
        .filter(|(s, a, b)| s == service && (a == local || b == local))
        .cloned()
        .collect();
    for link in dropped {
        state.links.remove(&link);
        let other_id = if &link.1 == local { &link.2 } else { &link.1 };
        if let Some(other) = state.endpoints.get(&(service.clone(), other_id.clone())) {
            let observer = Arc::clone(&other.session);
            let gone = entry.identity.clone();
            deferred.push(Box::new(move || {
                observer.state_changed(gone, ConnectionState::NotConnected)
            }));
        }
    }

    state
        .pending
        .retain(|(s, from, to)| !(s == service && (from == local || to == local)));
    deferred
}

/// Endpoint opened on a [`MemoryNetwork`].
pub struct MemoryEndpoint {
    service: ServiceType,
    local: PeerIdentity,
    state: Arc<Mutex<NetState>>,
    closed: AtomicBool,
}

impl MemoryEndpoint {
    fn key(&self) -> Key {
        (self.service.clone(), self.local.id.clone())
    }

    fn peers_in_service<'a>(
        &'a self,
        state: &'a NetState,
    ) -> impl Iterator<Item = &'a Entry> + 'a {
        state
            .endpoints
            .iter()
            .filter(move |((s, id), _)| *s == self.service && *id != self.local.id)
            .map(|(_, entry)| entry)
    }

    fn fail_discovery(&self, state: &NetState, role: DiscoveryRole) -> Option<Deferred> {
        if !state.fail_discovery {
            return None;
        }
        let entry = state.endpoints.get(&self.key())?;
        let observer = Arc::clone(&entry.discovery);
        let callback: Box<dyn FnOnce() + Send> = Box::new(move || {
            observer.discovery_failed(
                role,
                NetworkError::Discovery(format!("{role} unavailable on this network")),
            )
        });
        Some(vec![callback])
    }
}

impl RoomEndpoint for MemoryEndpoint {
    fn wire_identity(&self) -> &PeerIdentity {
        &self.local
    }

    fn start_advertising(&self) {
        let deferred = {
            let mut state = self.state.lock();
            if let Some(failed) = self.fail_discovery(&state, DiscoveryRole::Advertising) {
                failed
            } else {
                match state.endpoints.get_mut(&self.key()) {
                    Some(entry) if !entry.advertising => {
                        entry.advertising = true;
                        self.peers_in_service(&state)
                            .filter(|other| other.browsing)
                            .map(|other| {
                                let observer = Arc::clone(&other.discovery);
                                let found = self.local.clone();
                                Box::new(move || observer.peer_found(found))
                                    as Box<dyn FnOnce() + Send>
                            })
                            .collect()
                    }
                    _ => Vec::new(),
                }
            }
        };
        run(deferred);
    }

    fn stop_advertising(&self) {
        let deferred = {
            let mut state = self.state.lock();
            match state.endpoints.get_mut(&self.key()) {
                Some(entry) if entry.advertising => {
                    entry.advertising = false;
                    self.peers_in_service(&state)
                        .filter(|other| other.browsing)
                        .map(|other| {
                            let observer = Arc::clone(&other.discovery);
                            let lost = self.local.clone();
                            Box::new(move || observer.peer_lost(lost)) as Box<dyn FnOnce() + Send>
                        })
                        .collect()
                }
                _ => Vec::new(),
            }
        };
        run(deferred);
    }

    fn start_browsing(&self) {
        let deferred = {
            let mut state = self.state.lock();
            if let Some(failed) = self.fail_discovery(&state, DiscoveryRole::Browsing) {
                failed
            } else {
                match state.endpoints.get_mut(&self.key()) {
                    Some(entry) if !entry.browsing => {
                        entry.browsing = true;
                        let observer = Arc::clone(&entry.discovery);
                        let found: Vec<PeerIdentity> = self
                            .peers_in_service(&state)
                            .filter(|other| other.advertising)
                            .map(|other| other.identity.clone())
                            .collect();
                        let callback: Box<dyn FnOnce() + Send> = Box::new(move || {
                            for peer in found {
                                observer.peer_found(peer);
                            }
                        });
                        vec![callback]
                    }
                    _ => Vec::new(),
                }
            }
        };
        run(deferred);
    }

    fn stop_browsing(&self) {
        if let Some(entry) = self.state.lock().endpoints.get_mut(&self.key()) {
            entry.browsing = false;
        }
    }

    fn invite(&self, peer: &PeerIdentity, _timeout: Duration) {
        let deferred = {
            let mut state = self.state.lock();
            let target = (self.service.clone(), peer.id.clone());
            if state.muted.contains(&target) {
                trace!("Invite from {} to {peer} swallowed", self.local);
                return;
            }
            let Some(entry) = state.endpoints.get(&target) else {
                debug!("Invite to {peer} in {}: no such endpoint", self.service);
                return;
            };
            let observer = Arc::clone(&entry.session);
            state.pending.insert((
                self.service.clone(),
                self.local.id.clone(),
                peer.id.clone(),
            ));
            let from = self.local.clone();
            let callback: Box<dyn FnOnce() + Send> = Box::new(move || observer.invite_received(from));
            vec![callback]
        };
        run(deferred);
    }

    fn accept(&self, peer: &PeerId) {
        let deferred = {
            let mut state = self.state.lock();
            let invite = (self.service.clone(), peer.clone(), self.local.id.clone());
            if !state.pending.remove(&invite) {
                debug!("No pending invite from {peer} in {}", self.service);
                return;
            }
            let (Some(remote), Some(local)) = (
                state.endpoints.get(&(self.service.clone(), peer.clone())),
                state.endpoints.get(&self.key()),
            ) else {
                return;
            };
            let remote_identity = remote.identity.clone();
            let remote_observer = Arc::clone(&remote.session);
            let local_observer = Arc::clone(&local.session);
            state
                .links
                .insert(link_key(&self.service, &self.local.id, peer));

            let me = self.local.clone();
            let callback: Box<dyn FnOnce() + Send> = Box::new(move || {
                local_observer.state_changed(remote_identity, ConnectionState::Connected);
                remote_observer.state_changed(me, ConnectionState::Connected);
            });
            vec![callback]
        };
        run(deferred);
    }

    fn send(&self, peer: &PeerId, data: Vec<u8>) -> Result<(), NetworkError> {
        let observer = {
            let mut state = self.state.lock();
            if !state
                .links
                .contains(&link_key(&self.service, &self.local.id, peer))
            {
                return Err(NetworkError::PeerNotFound(peer.to_string()));
            }
            let observer = match state.endpoints.get(&(self.service.clone(), peer.clone())) {
                Some(entry) => Arc::clone(&entry.session),
                None => return Err(NetworkError::PeerNotFound(peer.to_string())),
            };
            state.transmissions += 1;
            observer
        };
        observer.data_received(self.local.clone(), data);
        Ok(())
    }

    fn disconnect(&self, peer: &PeerId) {
        let deferred = {
            let mut state = self.state.lock();
            let service = self.service.clone();
            let local = self.local.id.clone();
            state.pending.retain(|(s, from, to)| {
                !(s == &service
                    && ((from == &local && to == peer) || (from == peer && to == &local)))
            });
            if !state.links.remove(&link_key(&service, &local, peer)) {
                return;
            }
            match state.endpoints.get(&(service, peer.clone())) {
                Some(entry) => {
                    let observer = Arc::clone(&entry.session);
                    let me = self.local.clone();
                    let callback: Box<dyn FnOnce() + Send> = Box::new(move || {
                        observer.state_changed(me, ConnectionState::NotConnected)
                    });
                    vec![callback]
                }
                None => Vec::new(),
            }
        };
        run(deferred);
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let deferred = {
            let mut state = self.state.lock();
            detach(&mut state, &self.key())
        };
        run(deferred);
        debug!("Memory endpoint closed for {} in {}", self.local, self.service);
    }
}

impl Drop for MemoryEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
