//! Message broadcaster: fan-out of local payloads and intake of remote ones.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::NetworkError;
use crate::event::TransferKind;
use crate::history::{Message, MessageHistory};
use crate::identity::PeerIdentity;
use crate::transport::RoomEndpoint;
use crate::wire::{DataEnvelope, EnvelopeError};

/// Counters describing a room's traffic and contained failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastStats {
    /// Local messages recorded (self-echo appends).
    pub sent: u64,
    /// Per-peer transmissions handed to the transport.
    pub transmissions: u64,
    /// Remote messages recorded.
    pub received: u64,
    /// Per-peer transmissions that failed.
    pub send_failures: u64,
    /// Inbound payloads that could not be interpreted.
    pub decode_failures: u64,
    /// Stream/resource transfers refused.
    pub rejected_transfers: u64,
}

/// Sends payloads to the connected-peer set and records traffic in history.
#[derive(Debug)]
pub struct MessageBroadcaster {
    room_id: String,
    stats: BroadcastStats,
}

impl MessageBroadcaster {
    /// Create a broadcaster for the given room.
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            stats: BroadcastStats::default(),
        }
    }

    /// Current counters.
    pub fn stats(&self) -> BroadcastStats {
        self.stats
    }

    /// Transmit `payload` to every peer in `peers` and record it locally.
    ///
    /// The local append happens exactly once whatever the transmission
    /// outcome, including when `peers` is empty (no transmission at all).
    pub fn send(
        &mut self,
        endpoint: &dyn RoomEndpoint,
        sender: &PeerIdentity,
        peers: &[PeerIdentity],
        payload: Vec<u8>,
        history: &mut MessageHistory,
    ) -> Message {
        let envelope = DataEnvelope::new(payload);
        info!(
            "Room {}: sending {} bytes to {} peers",
            self.room_id,
            envelope.payload.len(),
            peers.len()
        );

        if !peers.is_empty() {
            match envelope.encode() {
                Ok(bytes) => {
                    for peer in peers {
                        match endpoint.send(&peer.id, bytes.clone()) {
                            Ok(()) => self.stats.transmissions += 1,
                            Err(e) => self.record_send_failure(peer, &e),
                        }
                    }
                }
                Err(EnvelopeError::PayloadTooLarge { size, max }) => {
                    let error = NetworkError::PayloadTooLarge { size, max };
                    for peer in peers {
                        self.record_send_failure(peer, &error);
                    }
                }
                Err(e) => {
                    error!("Room {}: failed to encode envelope: {e}", self.room_id);
                    self.stats.send_failures += peers.len() as u64;
                }
            }
        }

        self.stats.sent += 1;
        history
            .append(envelope.id, sender.clone(), envelope.payload)
            .clone()
    }

    /// Interpret bytes received from `from`. On success the message is
    /// appended with `from` as sender; otherwise it is dropped and logged.
    pub fn on_receive(
        &mut self,
        from: &PeerIdentity,
        data: &[u8],
        history: &mut MessageHistory,
    ) -> Option<Message> {
        match DataEnvelope::decode(data) {
            Ok(envelope) => {
                self.stats.received += 1;
                let message = history
                    .append(envelope.id, from.clone(), envelope.payload)
                    .clone();
                debug!(
                    "Room {}: received message {} from {from}",
                    self.room_id, message.id
                );
                Some(message)
            }
            Err(e) => {
                self.stats.decode_failures += 1;
                let error = NetworkError::Decode {
                    peer: from.to_string(),
                    reason: e.to_string(),
                };
                error!("Room {}: {error}", self.room_id);
                None
            }
        }
    }

    /// Refuse a stream or resource transfer.
    pub fn on_transfer(&mut self, from: &PeerIdentity, kind: TransferKind, name: &str) {
        self.stats.rejected_transfers += 1;
        let error = NetworkError::UnsupportedTransfer {
            kind: kind.to_string(),
            name: name.to_string(),
            peer: from.to_string(),
        };
        error!("Room {}: {error}", self.room_id);
    }

    /// A transmission failed after it was handed to the transport.
    pub fn on_send_failed(&mut self, peer: &PeerIdentity, error: &NetworkError) {
        self.record_send_failure(peer, error);
    }

    fn record_send_failure(&mut self, peer: &PeerIdentity, error: &NetworkError) {
        self.stats.send_failures += 1;
        warn!("Room {}: send to {peer} failed: {error}", self.room_id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
