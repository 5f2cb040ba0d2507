//! Picto Network: local-network rooms for broadcasting opaque payloads.
//!
//! Devices on the same network discover each other per room, connect without
//! any authentication, and broadcast payloads (drawings, in the original
//! product) to every connected member. Each room keeps an ordered history of
//! everything it sent and received.
//!
//! # Architecture
//!
//! - **Rooms**: a [`Room`] is a handle onto a worker task that owns discovery,
//!   sessions, the broadcaster and the history, and applies events one at a
//!   time from a single queue.
//! - **Transport**: the [`Transport`] trait opens a room-scoped endpoint.
//!   [`LanTransport`] uses UDP broadcast for discovery and WebSocket links
//!   (via `tokio-tungstenite`) for sessions; [`MemoryNetwork`] connects
//!   registries inside one process.
//! - **Scoping**: each room advertises under its own [`ServiceType`], so
//!   messages never cross rooms.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use picto_network::{LanTransport, NetworkConfig, RoomRegistry};
//!
//! # async fn example() -> Result<(), picto_network::NetworkError> {
//! let config = NetworkConfig::default();
//! let transport = Arc::new(LanTransport::from_config(&config));
//! let registry = RoomRegistry::new(&config, "Alice", transport)?;
//!
//! let room = registry.lookup("A")?;
//! room.send(b"hello".to_vec()).await?;
//! registry.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod broadcast;
pub mod config;
pub mod discovery;
pub mod error;
pub mod event;
pub mod history;
pub mod identity;
pub mod registry;
pub mod room;
pub mod service;
pub mod session;
pub mod transport;
pub mod wire;

// ── Re-exports for convenience ──────────────────────────────────────────

pub use broadcast::BroadcastStats;
pub use config::NetworkConfig;
pub use discovery::{ActivityState, DiscoveryStatus};
pub use error::NetworkError;
pub use event::{DiscoveryObserver, DiscoveryRole, NetworkEvent, SessionObserver, TransferKind};
pub use history::{HistorySnapshot, Message, MessageId};
pub use identity::{PeerId, PeerIdentity};
pub use registry::RoomRegistry;
pub use room::{Room, RoomStatus};
pub use service::ServiceType;
pub use session::ConnectionState;
pub use transport::lan::{LanConfig, LanTransport};
pub use transport::memory::MemoryNetwork;
pub use transport::{RoomEndpoint, Transport};
pub use wire::MAX_PAYLOAD_SIZE;
