//! Wire formats.
//!
//! [`DataEnvelope`] is what travels on a session's data channel: a fixed
//! binary header carrying the message id, followed by the caller's payload
//! bytes untouched. [`ControlFrame`] is the LAN link protocol spoken over
//! WebSocket text frames.
//!
//! Envelope layout (big endian):
//!
//! ```text
//! magic: 4 | version: 1 | message id: 16 | sent_at ms: 8 | payload len: 4 | payload
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::history::MessageId;
use crate::identity::PeerIdentity;
use crate::service::ServiceType;

/// Largest payload a room will put on the wire (16 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Why bytes received from a peer are not an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("envelope too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("invalid envelope magic")]
    InvalidMagic,

    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u8),

    #[error("payload length {declared} does not match {actual} bytes received")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("timestamp {0} ms is out of range")]
    InvalidTimestamp(i64),
}

/// A broadcast payload as sent to each peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataEnvelope {
    /// Id shared by the sender's self-echo and every receiver's entry.
    pub id: MessageId,
    /// The caller's bytes, untouched.
    pub payload: Vec<u8>,
    /// Sender's clock when the message was created, at millisecond precision.
    pub sent_at: DateTime<Utc>,
}

impl DataEnvelope {
    pub const MAGIC: u32 = 0x5043_4854;
    pub const VERSION: u8 = 0x01;
    /// Bytes preceding the payload.
    pub const HEADER_SIZE: usize = 4 + 1 + 16 + 8 + 4;
    /// Largest encoded envelope, header included.
    pub const MAX_SIZE: usize = Self::HEADER_SIZE + MAX_PAYLOAD_SIZE;

    /// Wrap a payload under a new message id.
    pub fn new(payload: Vec<u8>) -> Self {
        let now = Utc::now();
        Self {
            id: MessageId::generate(),
            payload,
            sent_at: DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now),
        }
    }

    /// Serialize for transmission. Fails only when the payload is larger
    /// than [`MAX_PAYLOAD_SIZE`].
    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        let len = self.payload.len();
        if len > MAX_PAYLOAD_SIZE {
            return Err(EnvelopeError::PayloadTooLarge {
                size: len,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let declared = u32::try_from(len).map_err(|_| EnvelopeError::PayloadTooLarge {
            size: len,
            max: MAX_PAYLOAD_SIZE,
        })?;

        let mut out = Vec::with_capacity(Self::HEADER_SIZE + len);
        out.extend_from_slice(&Self::MAGIC.to_be_bytes());
        out.push(Self::VERSION);
        out.extend_from_slice(self.id.0.as_bytes());
        out.extend_from_slice(&self.sent_at.timestamp_millis().to_be_bytes());
        out.extend_from_slice(&declared.to_be_bytes());
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    /// Parse bytes received from a peer. The header is validated before the
    /// payload is copied.
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let Some((header, payload)) = bytes.split_at_checked(Self::HEADER_SIZE) else {
            return Err(EnvelopeError::TooShort {
                expected: Self::HEADER_SIZE,
                actual: bytes.len(),
            });
        };
        let (magic, rest) = header.split_at(4);
        let (version, rest) = rest.split_at(1);
        let (id, rest) = rest.split_at(16);
        let (sent_at, declared) = rest.split_at(8);

        if u32::from_be_bytes(magic.try_into().unwrap_or_default()) != Self::MAGIC {
            return Err(EnvelopeError::InvalidMagic);
        }
        if version[0] != Self::VERSION {
            return Err(EnvelopeError::UnsupportedVersion(version[0]));
        }
        let declared = u32::from_be_bytes(declared.try_into().unwrap_or_default()) as usize;
        if declared > MAX_PAYLOAD_SIZE {
            return Err(EnvelopeError::PayloadTooLarge {
                size: declared,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        if declared != payload.len() {
            return Err(EnvelopeError::LengthMismatch {
                declared,
                actual: payload.len(),
            });
        }
        let millis = i64::from_be_bytes(sent_at.try_into().unwrap_or_default());
        let sent_at =
            DateTime::from_timestamp_millis(millis).ok_or(EnvelopeError::InvalidTimestamp(millis))?;

        Ok(Self {
            id: MessageId(uuid::Uuid::from_bytes(id.try_into().unwrap_or_default())),
            payload: payload.to_vec(),
            sent_at,
        })
    }
}

/// Control messages exchanged on a LAN link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    /// First frame from the dialing side.
    Invite {
        service: ServiceType,
        from: PeerIdentity,
    },
    /// The invited room accepted; the link is live.
    Accept { from: PeerIdentity },
    /// A peer offers a named stream.
    Stream { name: String },
    /// A peer offers a named resource.
    Resource { name: String },
    /// Clean disconnect notification.
    Goodbye,
}

impl ControlFrame {
    /// Serialize the frame to a JSON string for transmission.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize a frame from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_preserves_payload_bytes() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        let envelope = DataEnvelope::new(payload.clone());
        let encoded = envelope.encode().unwrap();
        assert_eq!(encoded.len(), DataEnvelope::HEADER_SIZE + payload.len());
        assert_eq!(&encoded[DataEnvelope::HEADER_SIZE..], payload.as_slice());

        let decoded = DataEnvelope::decode(&encoded).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_envelope_empty_payload() {
        let envelope = DataEnvelope::new(Vec::new());
        let decoded = DataEnvelope::decode(&envelope.encode().unwrap()).unwrap();
        assert!(decoded.payload.is_empty());
        assert_eq!(decoded.id, envelope.id);
    }

    #[test]
    fn test_envelope_rejects_garbage() {
        assert!(matches!(
            DataEnvelope::decode(b"not an envelope"),
            Err(EnvelopeError::TooShort { actual: 15, .. })
        ));
        assert!(DataEnvelope::decode(&[]).is_err());

        let mut bytes = DataEnvelope::new(b"hi".to_vec()).encode().unwrap();
        bytes[0] ^= 0xFF;
        assert_eq!(DataEnvelope::decode(&bytes), Err(EnvelopeError::InvalidMagic));
    }

    #[test]
    fn test_envelope_rejects_unknown_version() {
        let mut bytes = DataEnvelope::new(b"hi".to_vec()).encode().unwrap();
        bytes[4] = 0xFF;
        assert_eq!(
            DataEnvelope::decode(&bytes),
            Err(EnvelopeError::UnsupportedVersion(0xFF))
        );
    }

    #[test]
    fn test_envelope_rejects_truncated_payload() {
        let bytes = DataEnvelope::new(b"hello".to_vec()).encode().unwrap();
        assert_eq!(
            DataEnvelope::decode(&bytes[..bytes.len() - 1]),
            Err(EnvelopeError::LengthMismatch {
                declared: 5,
                actual: 4
            })
        );
    }

    #[test]
    fn test_envelope_refuses_oversized_payload() {
        let envelope = DataEnvelope::new(vec![0u8; MAX_PAYLOAD_SIZE + 1]);
        assert_eq!(
            envelope.encode(),
            Err(EnvelopeError::PayloadTooLarge {
                size: MAX_PAYLOAD_SIZE + 1,
                max: MAX_PAYLOAD_SIZE
            })
        );
        assert!(DataEnvelope::new(vec![0u8; MAX_PAYLOAD_SIZE]).encode().is_ok());
    }

    #[test]
    fn test_control_frame_tagging() {
        let frame = ControlFrame::Invite {
            service: ServiceType::for_room("A").unwrap(),
            from: PeerIdentity::generate("Alice"),
        };
        let json: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "invite");
        assert_eq!(json["service"], "picto-a");

        let goodbye = ControlFrame::from_json(r#"{"type":"goodbye"}"#).unwrap();
        assert_eq!(goodbye, ControlFrame::Goodbye);
    }

    #[test]
    fn test_control_frame_rejects_invalid_service() {
        let json = r#"{"type":"invite","service":"Not Valid","from":{"id":"x","display_name":"X"}}"#;
        assert!(ControlFrame::from_json(json).is_err());
    }
}
