//! Network configuration for the room layer and the LAN transport.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Room ids created at startup when nothing else is configured.
pub const DEFAULT_ROOM_IDS: [&str; 4] = ["A", "B", "C", "D"];

/// UDP port used for discovery announcements.
pub const DEFAULT_DISCOVERY_PORT: u16 = 9471;

/// Configuration for rooms and the LAN transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Ids of the rooms created by the registry, in display order.
    pub room_ids: Vec<String>,

    /// How long an invite may stay unanswered before the peer reverts to
    /// `NotConnected`.
    #[serde(with = "duration_ms", rename = "invite_timeout_ms")]
    pub invite_timeout: Duration,

    /// Address the discovery listener binds to.
    #[serde(with = "socket_addr_serde")]
    pub discovery_bind: SocketAddr,

    /// Destination of outgoing announcements (normally the LAN broadcast
    /// address on the discovery port).
    #[serde(with = "socket_addr_serde")]
    pub announce_addr: SocketAddr,

    /// Interface the per-room WebSocket listeners bind to.
    pub listen_ip: IpAddr,

    /// Interval between presence announcements.
    #[serde(with = "duration_ms", rename = "announce_interval_ms")]
    pub announce_interval: Duration,

    /// A peer that has not announced itself for this long is reported lost.
    #[serde(with = "duration_ms", rename = "peer_ttl_ms")]
    pub peer_ttl: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            room_ids: DEFAULT_ROOM_IDS.iter().map(|id| id.to_string()).collect(),
            invite_timeout: Duration::from_secs(10),
            discovery_bind: SocketAddr::new(
                IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                DEFAULT_DISCOVERY_PORT,
            ),
            announce_addr: SocketAddr::new(
                IpAddr::V4(Ipv4Addr::BROADCAST),
                DEFAULT_DISCOVERY_PORT,
            ),
            listen_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            announce_interval: Duration::from_secs(2),
            peer_ttl: Duration::from_secs(8),
        }
    }
}

impl NetworkConfig {
    /// Save the config to a JSON file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create directory: {e}"))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {e}"))?;
        std::fs::write(path, json).map_err(|e| format!("Failed to write config file: {e}"))
    }

    /// Load config from a JSON file, or return defaults if the file is missing.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(data) => match serde_json::from_str::<NetworkConfig>(&data) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Corrupt config file, using defaults: {e}");
                    }
                },
                Err(e) => {
                    tracing::warn!("Cannot read config file, using defaults: {e}");
                }
            }
        }
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Serde helpers
// ---------------------------------------------------------------------------

mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S: Serializer>(addr: &SocketAddr, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SocketAddr, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(dur: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(dur.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NetworkConfig::default();
        assert_eq!(config.room_ids, vec!["A", "B", "C", "D"]);
        assert_eq!(config.invite_timeout, Duration::from_secs(10));
        assert_eq!(config.discovery_bind.port(), 9471);
        assert_eq!(config.announce_addr.ip(), IpAddr::V4(Ipv4Addr::BROADCAST));
        assert!(config.peer_ttl > config.announce_interval);
    }

    #[test]
    fn test_config_serializes_durations_as_millis() {
        let config = NetworkConfig::default();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["invite_timeout_ms"], 10_000);
        assert_eq!(json["announce_interval_ms"], 2_000);
        assert_eq!(json["discovery_bind"], "0.0.0.0:9471");
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: NetworkConfig =
            serde_json::from_str(r#"{"room_ids": ["X"], "invite_timeout_ms": 250}"#).unwrap();
        assert_eq!(config.room_ids, vec!["X"]);
        assert_eq!(config.invite_timeout, Duration::from_millis(250));
        assert_eq!(config.peer_ttl, Duration::from_secs(8));
    }

    #[test]
    fn test_config_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut original = NetworkConfig::default();
        original.room_ids = vec!["north".into(), "south".into()];
        original.peer_ttl = Duration::from_millis(1500);
        original.save_to_file(&path).unwrap();

        let loaded = NetworkConfig::load_or_default(&path);
        assert_eq!(loaded.room_ids, vec!["north", "south"]);
        assert_eq!(loaded.peer_ttl, Duration::from_millis(1500));
    }

    #[test]
    fn test_config_load_missing_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = NetworkConfig::load_or_default(&dir.path().join("absent.json"));
        assert_eq!(config.room_ids.len(), 4);
    }

    #[test]
    fn test_config_load_corrupt_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let config = NetworkConfig::load_or_default(&path);
        assert_eq!(config.invite_timeout, Duration::from_secs(10));
    }
}
