//! Console relay: turns stdin lines into room operations and logs room
//! activity.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use picto_network::{Room, RoomRegistry};

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `<room> <text>`: broadcast `text` in `room`.
    Send { room: String, text: String },
    /// `/name <display name>`: rename the local identity.
    Rename(String),
    /// `/status`: log every room's status.
    Status,
}

/// Parse a console line. Blank lines and incomplete commands yield `None`.
pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if line == "/status" {
        return Some(Command::Status);
    }
    if let Some(name) = line.strip_prefix("/name ") {
        let name = name.trim();
        return (!name.is_empty()).then(|| Command::Rename(name.to_string()));
    }
    let (room, text) = line.split_once(char::is_whitespace)?;
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Some(Command::Send {
        room: room.to_string(),
        text: text.to_string(),
    })
}

/// Read stdin until EOF and apply each command to `registry`.
pub async fn relay_stdin(registry: Arc<RoomRegistry>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("stdin read failed: {e}");
                break;
            }
        };
        match parse_command(&line) {
            Some(Command::Send { room, text }) => match registry.lookup(&room) {
                Ok(room) => {
                    if let Err(e) = room.send(text.into_bytes()).await {
                        warn!("Send failed: {e}");
                    }
                }
                Err(e) => warn!("{e}"),
            },
            Some(Command::Rename(name)) => {
                let identity = registry.rename_local_identity(name);
                info!("Now known as {identity}");
            }
            Some(Command::Status) => {
                for room in registry.rooms() {
                    let status = room.status();
                    info!(
                        "Room {}: {} connected, {} messages, discoverable={}, stats={:?}",
                        room.room_id(),
                        room.connected_peers().len(),
                        room.history().len(),
                        status.discovery.is_discoverable(),
                        status.stats
                    );
                }
            }
            None => warn!("Usage: <room> <text> | /name <name> | /status"),
        }
    }
}

/// Log membership changes and new messages of `room` until it shuts down.
pub async fn watch_room(room: Arc<Room>) {
    let mut peers = room.subscribe_peers();
    let mut history = room.subscribe_history();
    let mut seen = history.borrow().len();

    loop {
        tokio::select! {
            changed = peers.changed() => {
                if changed.is_err() {
                    break;
                }
                let names: Vec<String> = peers
                    .borrow_and_update()
                    .iter()
                    .map(|p| p.to_string())
                    .collect();
                info!("Room {}: connected [{}]", room.room_id(), names.join(", "));
            }
            changed = history.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = history.borrow_and_update().clone();
                for message in snapshot.iter().skip(seen) {
                    info!(
                        "Room {} #{} {}: {}",
                        room.room_id(),
                        message.sequence,
                        message.sender.display_name,
                        String::from_utf8_lossy(&message.payload)
                    );
                }
                seen = snapshot.len();
            }
        }
    }
}
