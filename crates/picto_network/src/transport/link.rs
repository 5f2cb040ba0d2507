//! WebSocket link tasks.
//!
//! Once a handshake completes, a link is split into a writer task fed by an
//! unbounded channel and a reader task that reports frames back to its owner.
//! Data travels as binary frames; [`ControlFrame`]s travel as text frames.

use std::sync::Weak;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{debug, trace, warn};

use crate::error::NetworkError;
use crate::event::TransferKind;
use crate::identity::{PeerId, PeerIdentity};
use crate::wire::{ControlFrame, DataEnvelope};

/// WebSocket limits for both ends of a link. A data envelope travels as a
/// single binary frame, so frame and message limits both admit the largest
/// envelope.
pub(crate) fn link_config() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(DataEnvelope::MAX_SIZE);
    config.max_frame_size = Some(DataEnvelope::MAX_SIZE);
    config
}

/// Receives what a link's tasks observe.
pub(crate) trait LinkEvents: Send + Sync + 'static {
    /// A binary frame arrived.
    fn link_data(&self, peer: &PeerIdentity, data: Vec<u8>);
    /// The peer offered a stream or resource.
    fn link_transfer(&self, peer: &PeerIdentity, kind: TransferKind, name: String);
    /// A queued frame could not be written.
    fn link_write_failed(&self, peer: &PeerIdentity, error: NetworkError);
    /// The link with id `link` is gone.
    fn link_closed(&self, link: u64, peer: &PeerIdentity);
}

/// Owner-side handle to a running link.
#[derive(Debug)]
pub(crate) struct LinkHandle {
    pub id: u64,
    /// Who dialed this link.
    pub initiator: PeerId,
    outbound: mpsc::UnboundedSender<Message>,
}

impl LinkHandle {
    /// Queue a data frame.
    pub fn send(&self, data: Vec<u8>) -> Result<(), NetworkError> {
        self.outbound
            .send(Message::Binary(data.into()))
            .map_err(|_| NetworkError::Transport(format!("link {} is closed", self.id)))
    }

    /// Say goodbye and close the socket. Frames already queued go first.
    pub fn shutdown(&self) {
        if let Ok(goodbye) = ControlFrame::Goodbye.to_json() {
            let _ = self.outbound.send(Message::Text(goodbye.into()));
        }
        let _ = self.outbound.send(Message::Close(None));
    }
}

/// Split `ws` into reader and writer tasks on the current runtime.
pub(crate) fn spawn_link<S, H>(
    ws: WebSocketStream<S>,
    id: u64,
    peer: PeerIdentity,
    initiator: PeerId,
    events: Weak<H>,
) -> LinkHandle
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    H: LinkEvents,
{
    let (mut sink, mut stream) = ws.split();
    let (outbound, mut rx) = mpsc::unbounded_channel::<Message>();

    let writer_peer = peer.clone();
    let writer_events = events.clone();
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = sink.send(msg).await {
                debug!("Link {id} to {writer_peer}: write failed: {e}");
                if let Some(events) = writer_events.upgrade() {
                    events.link_write_failed(
                        &writer_peer,
                        NetworkError::Transport(format!("Send error: {e}")),
                    );
                }
                break;
            }
            if closing {
                break;
            }
        }
        let _ = sink.close().await;
        trace!("Link {id} writer finished");
    });

    tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            let Some(events) = events.upgrade() else {
                break;
            };
            match msg {
                Ok(Message::Binary(data)) => events.link_data(&peer, data.to_vec()),
                Ok(Message::Text(text)) => match ControlFrame::from_json(&text) {
                    Ok(ControlFrame::Stream { name }) => {
                        events.link_transfer(&peer, TransferKind::Stream, name)
                    }
                    Ok(ControlFrame::Resource { name }) => {
                        events.link_transfer(&peer, TransferKind::Resource, name)
                    }
                    Ok(ControlFrame::Goodbye) => {
                        debug!("Link {id}: {peer} said goodbye");
                        break;
                    }
                    Ok(other) => warn!("Link {id}: unexpected frame from {peer}: {other:?}"),
                    Err(e) => warn!("Link {id}: bad control frame from {peer}: {e}"),
                },
                Ok(Message::Close(_)) => {
                    debug!("Link {id}: {peer} sent close");
                    break;
                }
                Ok(_) => {} // ping/pong are handled by tungstenite
                Err(e) => {
                    debug!("Link {id}: read error from {peer}: {e}");
                    break;
                }
            }
        }
        if let Some(events) = events.upgrade() {
            events.link_closed(id, &peer);
        }
    });

    LinkHandle {
        id,
        initiator,
        outbound,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
