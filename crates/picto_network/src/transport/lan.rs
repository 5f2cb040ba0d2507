//! LAN transport: UDP broadcast discovery and WebSocket sessions.
//!
//! Each advertising room endpoint binds its own WebSocket listener on an
//! ephemeral port and periodically broadcasts an [`Announcement`] naming its
//! service type, identity and port. A single UDP [`Beacon`] per transport
//! listens on the discovery port and routes announcements to the endpoints
//! browsing that service type. Peers that stop announcing are reported lost
//! after the configured TTL.
//!
//! Inviting a peer dials its listener and sends [`ControlFrame::Invite`]; the
//! invited endpoint answers [`ControlFrame::Accept`] once its room accepts.
//! When both sides dial each other at once, the link dialed by the smaller
//! [`PeerId`] survives.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, accept_async_with_config, connect_async_with_config,
};
use tracing::{debug, error, info, trace, warn};

use crate::config::NetworkConfig;
use crate::error::NetworkError;
use crate::event::{DiscoveryObserver, DiscoveryRole, SessionObserver, TransferKind};
use crate::identity::{PeerId, PeerIdentity};
use crate::service::ServiceType;
use crate::session::ConnectionState;
use crate::transport::link::{LinkEvents, LinkHandle, link_config, spawn_link};
use crate::transport::{RoomEndpoint, Transport};
use crate::wire::ControlFrame;

/// How long an inbound invite waits for the local room to accept it.
const PENDING_INVITE_TTL: Duration = Duration::from_secs(30);

/// How long a freshly accepted socket may take to send its invite.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest announcement datagram we read.
const MAX_DATAGRAM: usize = 4096;

/// Settings of the LAN transport.
#[derive(Debug, Clone)]
pub struct LanConfig {
    pub discovery_bind: SocketAddr,
    pub announce_addr: SocketAddr,
    pub listen_ip: IpAddr,
    pub announce_interval: Duration,
    pub peer_ttl: Duration,
}

impl LanConfig {
    /// Extract the LAN settings from the network config.
    pub fn from_network(config: &NetworkConfig) -> Self {
        Self {
            discovery_bind: config.discovery_bind,
            announce_addr: config.announce_addr,
            listen_ip: config.listen_ip,
            announce_interval: config.announce_interval,
            peer_ttl: config.peer_ttl,
        }
    }
}

impl Default for LanConfig {
    fn default() -> Self {
        Self::from_network(&NetworkConfig::default())
    }
}

/// Presence datagram broadcast by advertising endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    /// Room service type being advertised.
    pub service: ServiceType,
    /// Identity of the advertising endpoint.
    pub peer: PeerIdentity,
    /// Port of the endpoint's WebSocket listener.
    pub port: u16,
    /// Set on the last datagram sent when advertising stops.
    #[serde(default)]
    pub withdrawn: bool,
}

/// [`Transport`] over the local network.
pub struct LanTransport {
    config: LanConfig,
    beacon: Arc<Beacon>,
}

impl LanTransport {
    pub fn new(config: LanConfig) -> Self {
        let beacon = Arc::new(Beacon::new(config.discovery_bind));
        Self { config, beacon }
    }

    /// Build a transport from the network config.
    pub fn from_config(config: &NetworkConfig) -> Self {
        Self::new(LanConfig::from_network(config))
    }
}

impl Transport for LanTransport {
    fn open(
        &self,
        service: &ServiceType,
        local: &PeerIdentity,
        discovery: Arc<dyn DiscoveryObserver>,
        session: Arc<dyn SessionObserver>,
    ) -> Result<Box<dyn RoomEndpoint>, NetworkError> {
        let runtime = Handle::try_current()
            .map_err(|e| NetworkError::Transport(format!("LAN transport needs a runtime: {e}")))?;
        let shared = Arc::new(EndpointShared {
            service: service.clone(),
            local: local.clone(),
            config: self.config.clone(),
            runtime,
            beacon: Arc::clone(&self.beacon),
            discovery,
            session,
            state: Mutex::new(EndpointState::default()),
            next_link: AtomicU64::new(1),
        });
        debug!("LAN endpoint opened for {local} in {service}");
        Ok(Box::new(LanEndpoint { shared }))
    }
}

// ---------------------------------------------------------------------------
// Beacon: the shared discovery listener
// ---------------------------------------------------------------------------

struct Route {
    service: ServiceType,
    local: PeerId,
    endpoint: Weak<EndpointShared>,
}

#[derive(Default)]
struct BeaconState {
    routes: Vec<Route>,
    /// Shutdown signal of the running listener, with its generation.
    listener: Option<(u64, broadcast::Sender<()>)>,
    generation: u64,
}

/// One UDP listener per transport, fanned out to browsing endpoints.
struct Beacon {
    bind: SocketAddr,
    state: Mutex<BeaconState>,
}

impl Beacon {
    fn new(bind: SocketAddr) -> Self {
        Self {
            bind,
            state: Mutex::new(BeaconState::default()),
        }
    }

    /// Route announcements for `service` to `endpoint`, starting the
    /// listener if this is the first route.
    fn subscribe(self: &Arc<Self>, endpoint: &Arc<EndpointShared>) {
        let mut state = self.state.lock();
        state.routes.push(Route {
            service: endpoint.service.clone(),
            local: endpoint.local.id.clone(),
            endpoint: Arc::downgrade(endpoint),
        });
        if state.listener.is_some() {
            return;
        }
        state.generation += 1;
        let generation = state.generation;
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        state.listener = Some((generation, shutdown_tx));
        drop(state);

        let beacon = Arc::clone(self);
        endpoint
            .runtime
            .spawn(async move { beacon.listen(generation, shutdown_rx).await });
    }

    /// Remove the route of `endpoint`, stopping the listener when idle.
    fn unsubscribe(&self, service: &ServiceType, local: &PeerId) {
        let mut state = self.state.lock();
        state
            .routes
            .retain(|r| !(r.service == *service && r.local == *local));
        if state.routes.is_empty()
            && let Some((_, shutdown)) = state.listener.take()
        {
            let _ = shutdown.send(());
        }
    }

    async fn listen(self: Arc<Self>, generation: u64, mut shutdown: broadcast::Receiver<()>) {
        let socket = match UdpSocket::bind(self.bind).await {
            Ok(socket) => socket,
            Err(e) => {
                self.bind_failed(generation, NetworkError::Discovery(format!("Bind failed: {e}")));
                return;
            }
        };
        info!("Discovery listening on {}", self.bind);

        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                result = socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, src)) if len == buf.len() => {
                            warn!("Dropping oversized discovery datagram from {src}");
                        }
                        Ok((len, src)) => {
                            match serde_json::from_slice::<Announcement>(&buf[..len]) {
                                Ok(announcement) => self.dispatch(&announcement, src),
                                Err(e) => trace!("Ignoring datagram from {src}: {e}"),
                            }
                        }
                        Err(e) => warn!("Discovery recv error: {e}"),
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Discovery listener shutting down");
                    break;
                }
            }
        }
    }

    fn dispatch(&self, announcement: &Announcement, src: SocketAddr) {
        let targets: Vec<Arc<EndpointShared>> = {
            let mut state = self.state.lock();
            state.routes.retain(|r| r.endpoint.strong_count() > 0);
            state
                .routes
                .iter()
                .filter(|r| r.service == announcement.service && r.local != announcement.peer.id)
                .filter_map(|r| r.endpoint.upgrade())
                .collect()
        };
        for endpoint in targets {
            endpoint.on_announcement(announcement, src);
        }
    }

    fn bind_failed(&self, generation: u64, error: NetworkError) {
        error!("Discovery listener on {}: {error}", self.bind);
        let routes = {
            let mut state = self.state.lock();
            if state.listener.as_ref().map(|(g, _)| *g) != Some(generation) {
                return;
            }
            state.listener = None;
            std::mem::take(&mut state.routes)
        };
        for route in routes {
            if let Some(endpoint) = route.endpoint.upgrade() {
                endpoint.browse_failed(NetworkError::Discovery(error.to_string()));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

struct NearbyPeer {
    identity: PeerIdentity,
    addr: SocketAddr,
    last_seen: Instant,
}

struct Advertiser {
    epoch: u64,
    shutdown: broadcast::Sender<()>,
}

#[derive(Default)]
struct EndpointState {
    closed: bool,
    advertiser: Option<Advertiser>,
    advertise_epoch: u64,
    browsing: bool,
    sweeper: Option<broadcast::Sender<()>>,
    nearby: HashMap<PeerId, NearbyPeer>,
    /// Inbound invites awaiting the room's answer.
    pending: HashMap<PeerId, oneshot::Sender<()>>,
    links: HashMap<PeerId, LinkHandle>,
}

struct EndpointShared {
    service: ServiceType,
    local: PeerIdentity,
    config: LanConfig,
    runtime: Handle,
    beacon: Arc<Beacon>,
    discovery: Arc<dyn DiscoveryObserver>,
    session: Arc<dyn SessionObserver>,
    state: Mutex<EndpointState>,
    next_link: AtomicU64,
}

impl EndpointShared {
    fn start_advertising(self: &Arc<Self>) {
        let (epoch, shutdown_rx) = {
            let mut state = self.state.lock();
            if state.closed || state.advertiser.is_some() {
                return;
            }
            state.advertise_epoch += 1;
            let epoch = state.advertise_epoch;
            let (shutdown, shutdown_rx) = broadcast::channel(1);
            state.advertiser = Some(Advertiser { epoch, shutdown });
            (epoch, shutdown_rx)
        };
        let endpoint = Arc::downgrade(self);
        let config = self.config.clone();
        let announcement = Announcement {
            service: self.service.clone(),
            peer: self.local.clone(),
            port: 0,
            withdrawn: false,
        };
        self.runtime.spawn(async move {
            if let Err(e) = advertise(endpoint.clone(), config, announcement, shutdown_rx).await
                && let Some(endpoint) = endpoint.upgrade()
            {
                endpoint.advertise_failed(epoch, e);
            }
        });
    }

    fn stop_advertising(&self) {
        if let Some(advertiser) = self.state.lock().advertiser.take() {
            let _ = advertiser.shutdown.send(());
        }
    }

    fn advertise_failed(&self, epoch: u64, error: NetworkError) {
        {
            let mut state = self.state.lock();
            if state.advertiser.as_ref().map(|a| a.epoch) != Some(epoch) {
                return;
            }
            state.advertiser = None;
        }
        self.discovery
            .discovery_failed(DiscoveryRole::Advertising, error);
    }

    fn start_browsing(self: &Arc<Self>) {
        let shutdown_rx = {
            let mut state = self.state.lock();
            if state.closed || state.browsing {
                return;
            }
            state.browsing = true;
            let (shutdown, shutdown_rx) = broadcast::channel(1);
            state.sweeper = Some(shutdown);
            shutdown_rx
        };
        self.beacon.subscribe(self);

        let endpoint = Arc::downgrade(self);
        let period = (self.config.peer_ttl / 2).max(Duration::from_millis(50));
        self.runtime.spawn(sweep(endpoint, period, shutdown_rx));
    }

    fn stop_browsing(&self) {
        let sweeper = {
            let mut state = self.state.lock();
            if !state.browsing {
                return;
            }
            state.browsing = false;
            state.nearby.clear();
            state.sweeper.take()
        };
        if let Some(sweeper) = sweeper {
            let _ = sweeper.send(());
        }
        self.beacon.unsubscribe(&self.service, &self.local.id);
    }

    fn browse_failed(&self, error: NetworkError) {
        let sweeper = {
            let mut state = self.state.lock();
            if !state.browsing {
                return;
            }
            state.browsing = false;
            state.sweeper.take()
        };
        if let Some(sweeper) = sweeper {
            let _ = sweeper.send(());
        }
        self.discovery.discovery_failed(DiscoveryRole::Browsing, error);
    }

    fn on_announcement(&self, announcement: &Announcement, src: SocketAddr) {
        enum Seen {
            Found,
            Lost(PeerIdentity),
            Refreshed,
        }
        let seen = {
            let mut state = self.state.lock();
            if !state.browsing {
                return;
            }
            let id = &announcement.peer.id;
            if announcement.withdrawn {
                match state.nearby.remove(id) {
                    Some(peer) => Seen::Lost(peer.identity),
                    None => Seen::Refreshed,
                }
            } else {
                let addr = SocketAddr::new(src.ip(), announcement.port);
                let previous = state.nearby.insert(
                    id.clone(),
                    NearbyPeer {
                        identity: announcement.peer.clone(),
                        addr,
                        last_seen: Instant::now(),
                    },
                );
                if previous.is_some() {
                    Seen::Refreshed
                } else {
                    Seen::Found
                }
            }
        };
        match seen {
            Seen::Found => {
                debug!("{}: found {} at {src}", self.service, announcement.peer);
                self.discovery.peer_found(announcement.peer.clone());
            }
            Seen::Lost(peer) => self.discovery.peer_lost(peer),
            Seen::Refreshed => {}
        }
    }

    fn expire_nearby(&self) {
        let expired: Vec<PeerIdentity> = {
            let mut state = self.state.lock();
            let ttl = self.config.peer_ttl;
            let stale: Vec<PeerId> = state
                .nearby
                .iter()
                .filter(|(_, p)| p.last_seen.elapsed() > ttl)
                .map(|(id, _)| id.clone())
                .collect();
            stale
                .iter()
                .filter_map(|id| state.nearby.remove(id))
                .map(|p| p.identity)
                .collect()
        };
        for peer in expired {
            debug!("{}: {peer} went silent", self.service);
            self.discovery.peer_lost(peer);
        }
    }

    fn invite(self: &Arc<Self>, peer: &PeerIdentity, timeout: Duration) {
        let addr = {
            let state = self.state.lock();
            if state.closed {
                return;
            }
            state.nearby.get(&peer.id).map(|p| p.addr)
        };
        let Some(addr) = addr else {
            warn!("{}: no address for {peer}, invite dropped", self.service);
            self.session
                .state_changed(peer.clone(), ConnectionState::NotConnected);
            return;
        };

        // Both sides usually find each other at once. The larger id holds
        // back for a moment so the smaller id's invite can land first.
        let defer = if self.local.id > peer.id {
            self.config.announce_interval.min(timeout / 2)
        } else {
            Duration::ZERO
        };

        let endpoint = Arc::clone(self);
        let peer = peer.clone();
        self.runtime.spawn(async move {
            if !defer.is_zero() {
                tokio::time::sleep(defer).await;
                if endpoint.has_session_with(&peer.id) {
                    debug!("{}: {peer} reached us first, not dialing", endpoint.service);
                    return;
                }
            }
            let remaining = timeout.saturating_sub(defer);
            let dialed = tokio::time::timeout(
                remaining,
                dial(addr, &endpoint.service, &endpoint.local, &peer.id),
            )
            .await
            .unwrap_or_else(|_| Err(NetworkError::Timeout(timeout)));
            match dialed {
                Ok((ws, remote)) => {
                    let initiator = endpoint.local.id.clone();
                    endpoint.install_link(ws, remote, initiator);
                }
                Err(e) => {
                    info!("{}: invite to {peer} failed: {e}", endpoint.service);
                    endpoint
                        .session
                        .state_changed(peer, ConnectionState::NotConnected);
                }
            }
        });
    }

    /// Whether a link or an inbound invite already ties us to `peer`.
    fn has_session_with(&self, peer: &PeerId) -> bool {
        let state = self.state.lock();
        state.closed || state.links.contains_key(peer) || state.pending.contains_key(peer)
    }

    fn accept(&self, peer: &PeerId) {
        match self.state.lock().pending.remove(peer) {
            Some(answer) => {
                let _ = answer.send(());
            }
            None => debug!("{}: no pending invite from {peer}", self.service),
        }
    }

    /// Park an inbound invite. Returns `false` once the endpoint is closed.
    fn register_pending(&self, from: &PeerId, answer: oneshot::Sender<()>) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.pending.insert(from.clone(), answer);
        true
    }

    fn install_link<S>(self: &Arc<Self>, ws: WebSocketStream<S>, peer: PeerIdentity, initiator: PeerId)
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let id = self.next_link.fetch_add(1, Ordering::Relaxed);
        let preferred = std::cmp::min(&self.local.id, &peer.id).clone();
        let announce = {
            let mut state = self.state.lock();
            if state.closed {
                drop(state);
                self.runtime.spawn(async move {
                    let mut ws = ws;
                    let _ = ws.close(None).await;
                });
                return;
            }
            if let Some(existing) = state.links.get(&peer.id)
                && existing.initiator == preferred
                && initiator != preferred
            {
                debug!("{}: keeping existing link {} to {peer}", self.service, existing.id);
                drop(state);
                self.runtime.spawn(async move {
                    let mut ws = ws;
                    let _ = ws.close(None).await;
                });
                return;
            }
            let handle = spawn_link(ws, id, peer.clone(), initiator, Arc::downgrade(self));
            match state.links.insert(peer.id.clone(), handle) {
                Some(replaced) => {
                    debug!("{}: link {id} replaces {} to {peer}", self.service, replaced.id);
                    replaced.shutdown();
                    false
                }
                None => true,
            }
        };
        if announce {
            info!("{}: connected to {peer}", self.service);
            self.session.state_changed(peer, ConnectionState::Connected);
        }
    }

    fn send(&self, peer: &PeerId, data: Vec<u8>) -> Result<(), NetworkError> {
        match self.state.lock().links.get(peer) {
            Some(link) => link.send(data),
            None => Err(NetworkError::PeerNotFound(peer.to_string())),
        }
    }

    fn disconnect(&self, peer: &PeerId) {
        let link = {
            let mut state = self.state.lock();
            state.pending.remove(peer);
            state.links.remove(peer)
        };
        if let Some(link) = link {
            debug!("{}: disconnecting link {} to {peer}", self.service, link.id);
            link.shutdown();
        }
    }

    fn close(&self) {
        let (advertiser, sweeper, browsing, links) = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.pending.clear();
            state.nearby.clear();
            let browsing = std::mem::take(&mut state.browsing);
            (
                state.advertiser.take(),
                state.sweeper.take(),
                browsing,
                std::mem::take(&mut state.links),
            )
        };
        if let Some(advertiser) = advertiser {
            let _ = advertiser.shutdown.send(());
        }
        if let Some(sweeper) = sweeper {
            let _ = sweeper.send(());
        }
        if browsing {
            self.beacon.unsubscribe(&self.service, &self.local.id);
        }
        for link in links.values() {
            link.shutdown();
        }
        debug!("LAN endpoint closed for {} in {}", self.local, self.service);
    }
}

impl LinkEvents for EndpointShared {
    fn link_data(&self, peer: &PeerIdentity, data: Vec<u8>) {
        self.session.data_received(peer.clone(), data);
    }

    fn link_transfer(&self, peer: &PeerIdentity, kind: TransferKind, name: String) {
        self.session.transfer_received(peer.clone(), kind, name);
    }

    fn link_write_failed(&self, peer: &PeerIdentity, error: NetworkError) {
        self.session.send_failed(peer.clone(), error);
    }

    fn link_closed(&self, link: u64, peer: &PeerIdentity) {
        let current = {
            let mut state = self.state.lock();
            if state.links.get(&peer.id).map(|l| l.id) == Some(link) {
                state.links.remove(&peer.id);
                true
            } else {
                false
            }
        };
        if current {
            info!("{}: link to {peer} closed", self.service);
            self.session
                .state_changed(peer.clone(), ConnectionState::NotConnected);
        }
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Listener + announcer of one advertising endpoint.
async fn advertise(
    endpoint: Weak<EndpointShared>,
    config: LanConfig,
    mut announcement: Announcement,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), NetworkError> {
    let listener = TcpListener::bind(SocketAddr::new(config.listen_ip, 0))
        .await
        .map_err(|e| NetworkError::Discovery(format!("Listener bind failed: {e}")))?;
    announcement.port = listener.local_addr()?.port();

    let unspecified = match config.announce_addr {
        SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    let sender = UdpSocket::bind(SocketAddr::new(unspecified, 0))
        .await
        .map_err(|e| NetworkError::Discovery(format!("Sender bind: {e}")))?;
    sender
        .set_broadcast(true)
        .map_err(|e| NetworkError::Discovery(format!("Set broadcast: {e}")))?;

    let datagram = serde_json::to_vec(&announcement)?;
    info!(
        "Advertising {} as {} on port {}",
        announcement.service, announcement.peer, announcement.port
    );

    let mut ticker = tokio::time::interval(config.announce_interval);
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => match endpoint.upgrade() {
                        Some(endpoint) => {
                            tokio::spawn(handle_inbound(endpoint, stream, addr));
                        }
                        None => break,
                    },
                    Err(e) => error!("TCP accept failed: {e}"),
                }
            }
            _ = ticker.tick() => {
                match sender.send_to(&datagram, config.announce_addr).await {
                    Ok(_) => trace!("Announcement sent for {}", announcement.service),
                    Err(e) => debug!("Announcement send failed: {e}"),
                }
            }
            _ = shutdown.recv() => {
                announcement.withdrawn = true;
                if let Ok(bye) = serde_json::to_vec(&announcement) {
                    let _ = sender.send_to(&bye, config.announce_addr).await;
                }
                debug!("Advertiser for {} shutting down", announcement.service);
                break;
            }
        }
    }
    Ok(())
}

/// Periodically report peers that stopped announcing.
async fn sweep(endpoint: Weak<EndpointShared>, period: Duration, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => match endpoint.upgrade() {
                Some(endpoint) => endpoint.expire_nearby(),
                None => break,
            },
            _ = shutdown.recv() => break,
        }
    }
}

/// Dial `addr`, send our invite and wait for the accept.
async fn dial(
    addr: SocketAddr,
    service: &ServiceType,
    local: &PeerIdentity,
    expected: &PeerId,
) -> Result<(WebSocketStream<MaybeTlsStream<TcpStream>>, PeerIdentity), NetworkError> {
    let url = format!("ws://{addr}");
    let (mut ws, _) = connect_async_with_config(&url, Some(link_config()), true)
        .await
        .map_err(|e| NetworkError::Transport(format!("Connect to {addr} failed: {e}")))?;

    let invite = ControlFrame::Invite {
        service: service.clone(),
        from: local.clone(),
    }
    .to_json()?;
    ws.send(Message::Text(invite.into()))
        .await
        .map_err(|e| NetworkError::Transport(format!("Send error: {e}")))?;

    while let Some(msg) = ws.next().await {
        match msg.map_err(|e| NetworkError::Transport(format!("Read error: {e}")))? {
            Message::Text(text) => match ControlFrame::from_json(&text)? {
                ControlFrame::Accept { from } if from.id == *expected => return Ok((ws, from)),
                other => {
                    return Err(NetworkError::Transport(format!(
                        "unexpected handshake frame from {addr}: {other:?}"
                    )));
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }
    Err(NetworkError::Transport(format!(
        "{addr} closed during handshake"
    )))
}

/// Run the accepting side of the handshake for one inbound socket.
async fn handle_inbound(endpoint: Arc<EndpointShared>, stream: TcpStream, addr: SocketAddr) {
    let mut ws = match accept_async_with_config(stream, Some(link_config())).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket accept failed for {addr}: {e}");
            return;
        }
    };

    let first = tokio::time::timeout(HANDSHAKE_TIMEOUT, ws.next()).await;
    let from = match first {
        Ok(Some(Ok(Message::Text(text)))) => match ControlFrame::from_json(&text) {
            Ok(ControlFrame::Invite { service, from }) if service == endpoint.service => from,
            Ok(ControlFrame::Invite { service, from }) => {
                warn!("{from} at {addr} invited us into {service}, expected {}", endpoint.service);
                let _ = ws.close(None).await;
                return;
            }
            Ok(other) => {
                warn!("Expected invite from {addr}, got {other:?}");
                let _ = ws.close(None).await;
                return;
            }
            Err(e) => {
                warn!("Bad handshake frame from {addr}: {e}");
                let _ = ws.close(None).await;
                return;
            }
        },
        _ => {
            debug!("No invite from {addr}");
            return;
        }
    };

    let (answer, accepted) = oneshot::channel();
    if !endpoint.register_pending(&from.id, answer) {
        let _ = ws.close(None).await;
        return;
    }
    endpoint.session.invite_received(from.clone());

    match tokio::time::timeout(PENDING_INVITE_TTL, accepted).await {
        Ok(Ok(())) => {
            let reply = match (ControlFrame::Accept {
                from: endpoint.local.clone(),
            })
            .to_json()
            {
                Ok(reply) => reply,
                Err(e) => {
                    error!("Failed to encode accept: {e}");
                    return;
                }
            };
            if let Err(e) = ws.send(Message::Text(reply.into())).await {
                info!("Accept to {from} failed: {e}");
                endpoint
                    .session
                    .state_changed(from, ConnectionState::NotConnected);
                return;
            }
            let initiator = from.id.clone();
            endpoint.install_link(ws, from, initiator);
        }
        _ => {
            {
                let mut state = endpoint.state.lock();
                if state.pending.get(&from.id).is_some_and(|tx| tx.is_closed()) {
                    state.pending.remove(&from.id);
                }
            }
            debug!("Invite from {from} was not accepted");
            let _ = ws.close(None).await;
        }
    }
}

/// Handle returned by [`LanTransport::open`].
pub struct LanEndpoint {
    shared: Arc<EndpointShared>,
}

impl RoomEndpoint for LanEndpoint {
    fn wire_identity(&self) -> &PeerIdentity {
        &self.shared.local
    }

    fn start_advertising(&self) {
        self.shared.start_advertising();
    }

    fn stop_advertising(&self) {
        self.shared.stop_advertising();
    }

    fn start_browsing(&self) {
        self.shared.start_browsing();
    }

    fn stop_browsing(&self) {
        self.shared.stop_browsing();
    }

    fn invite(&self, peer: &PeerIdentity, timeout: Duration) {
        self.shared.invite(peer, timeout);
    }

    fn accept(&self, peer: &PeerId) {
        self.shared.accept(peer);
    }

    fn send(&self, peer: &PeerId, data: Vec<u8>) -> Result<(), NetworkError> {
        self.shared.send(peer, data)
    }

    fn disconnect(&self, peer: &PeerId) {
        self.shared.disconnect(peer);
    }

    fn close(&self) {
        self.shared.close();
    }
}

impl Drop for LanEndpoint {
    fn drop(&mut self) {
        self.shared.close();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
