//! Best-effort delivery of room state to members' channels.

use crate::state::SessionTable;
use log::debug;
use shared::{RoomState, ServerMessage};
use tokio_tungstenite::tungstenite::Message;

/// Serializes the message once and sends the same text frame to every
/// listed member. A member with no live session, or whose channel has
/// already closed, is skipped without aborting delivery to the rest.
pub fn deliver(sessions: &SessionTable, members: &[String], message: &ServerMessage) {
    let payload = match serde_json::to_string(message) {
        Ok(payload) => payload,
        Err(e) => {
            debug!("dropping unencodable broadcast: {}", e);
            return;
        }
    };

    for uid in members {
        if let Some(session) = sessions.get(uid) {
            if session.tx.send(Message::Text(payload.clone())).is_err() {
                debug!("skipping closed channel for {}", uid);
            }
        }
    }
}

/// Fans a room snapshot out as a `gameState` broadcast.
pub fn broadcast_state(sessions: &SessionTable, members: &[String], state: RoomState) {
    deliver(sessions, members, &ServerMessage::GameState { state });
}
