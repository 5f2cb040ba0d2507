//! Room registry: the fixed set of rooms a device participates in.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::config::NetworkConfig;
use crate::error::NetworkError;
use crate::identity::PeerIdentity;
use crate::room::Room;
use crate::service::ServiceType;
use crate::transport::Transport;

/// Owns one [`Room`] per configured id for the lifetime of the process.
pub struct RoomRegistry {
    /// Room ids in configuration order.
    order: Vec<String>,
    rooms: BTreeMap<String, Arc<Room>>,
    local: RwLock<PeerIdentity>,
}

impl RoomRegistry {
    /// Create every room in `config.room_ids` under a fresh identity named
    /// `display_name`.
    ///
    /// Fails with [`NetworkError::InvalidServiceType`] when an id cannot be
    /// used as a discovery key, and with [`NetworkError::DuplicateRoom`] when
    /// two ids map to the same room.
    pub fn new(
        config: &NetworkConfig,
        display_name: impl Into<String>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, NetworkError> {
        let mut seen_ids = HashSet::new();
        let mut seen_services = HashSet::new();
        for room_id in &config.room_ids {
            let service = ServiceType::for_room(room_id)?;
            if !seen_ids.insert(room_id.as_str()) || !seen_services.insert(service) {
                return Err(NetworkError::DuplicateRoom(room_id.clone()));
            }
        }

        let local = PeerIdentity::generate(display_name);
        let mut rooms = BTreeMap::new();
        for room_id in &config.room_ids {
            info!("Initializing room {room_id}");
            let room = Room::create(
                room_id,
                local.clone(),
                config.invite_timeout,
                &*transport,
            )?;
            rooms.insert(room_id.clone(), Arc::new(room));
        }

        Ok(Self {
            order: config.room_ids.clone(),
            rooms,
            local: RwLock::new(local),
        })
    }

    /// The room registered under `room_id`. Repeated lookups return the same
    /// room.
    pub fn lookup(&self, room_id: &str) -> Result<Arc<Room>, NetworkError> {
        self.rooms
            .get(room_id)
            .cloned()
            .ok_or_else(|| NetworkError::RoomNotFound(room_id.to_string()))
    }

    /// Replace the local identity with a new one named `display_name` and
    /// push it into every room. Recorded history keeps its senders and live
    /// sessions stay up.
    pub fn rename_local_identity(&self, display_name: impl Into<String>) -> PeerIdentity {
        let renamed = {
            let mut local = self.local.write();
            let renamed = local.renamed(display_name);
            *local = renamed.clone();
            renamed
        };
        info!("Local identity renamed to {renamed}");
        for (room_id, room) in &self.rooms {
            if let Err(e) = room.set_local_identity(renamed.clone()) {
                warn!("Room {room_id}: rename not applied: {e}");
            }
        }
        renamed
    }

    pub fn local_identity(&self) -> PeerIdentity {
        self.local.read().clone()
    }

    /// Room ids in configuration order.
    pub fn room_ids(&self) -> &[String] {
        &self.order
    }

    /// Rooms in configuration order.
    pub fn rooms(&self) -> Vec<Arc<Room>> {
        self.order
            .iter()
            .filter_map(|id| self.rooms.get(id).cloned())
            .collect()
    }

    /// Destroy every room.
    pub async fn shutdown(&self) {
        for room in self.rooms() {
            room.destroy().await;
        }
        info!("Room registry shut down");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryNetwork;

    fn config(ids: &[&str]) -> NetworkConfig {
        NetworkConfig {
            room_ids: ids.iter().map(|id| id.to_string()).collect(),
            ..NetworkConfig::default()
        }
    }

    #[tokio::test]
    async fn test_default_rooms_in_order() {
        let registry = RoomRegistry::new(
            &NetworkConfig::default(),
            "Alice",
            Arc::new(MemoryNetwork::new()),
        )
        .unwrap();
        assert_eq!(registry.room_ids(), ["A", "B", "C", "D"]);
        let ids: Vec<String> = registry
            .rooms()
            .iter()
            .map(|r| r.room_id().to_string())
            .collect();
        assert_eq!(ids, vec!["A", "B", "C", "D"]);
    }

    #[tokio::test]
    async fn test_lookup_is_stable() {
        let registry =
            RoomRegistry::new(&config(&["A", "B"]), "Alice", Arc::new(MemoryNetwork::new()))
                .unwrap();
        let first = registry.lookup("A").unwrap();
        let second = registry.lookup("A").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(matches!(
            registry.lookup("Z"),
            Err(NetworkError::RoomNotFound(id)) if id == "Z"
        ));
    }

    #[tokio::test]
    async fn test_duplicate_ids_rejected() {
        let network: Arc<dyn Transport> = Arc::new(MemoryNetwork::new());
        assert!(matches!(
            RoomRegistry::new(&config(&["A", "A"]), "Alice", Arc::clone(&network)),
            Err(NetworkError::DuplicateRoom(_))
        ));
        assert!(matches!(
            RoomRegistry::new(&config(&["A", "a"]), "Alice", Arc::clone(&network)),
            Err(NetworkError::DuplicateRoom(_))
        ));
        assert!(matches!(
            RoomRegistry::new(&config(&["A", "x y"]), "Alice", network),
            Err(NetworkError::InvalidServiceType { .. })
        ));
    }

    #[tokio::test]
    async fn test_rename_produces_new_identity() {
        let registry =
            RoomRegistry::new(&config(&["A"]), "Alice", Arc::new(MemoryNetwork::new())).unwrap();
        let before = registry.local_identity();
        let after = registry.rename_local_identity("Alicia");

        assert_eq!(after.display_name, "Alicia");
        assert_ne!(after.id, before.id);
        assert_eq!(registry.local_identity(), after);
    }

    #[tokio::test]
    async fn test_shutdown_closes_rooms() {
        let registry =
            RoomRegistry::new(&config(&["A", "B"]), "Alice", Arc::new(MemoryNetwork::new()))
                .unwrap();
        registry.shutdown().await;
        for room in registry.rooms() {
            assert!(room.send(b"late".to_vec()).await.is_err());
        }
    }
}
