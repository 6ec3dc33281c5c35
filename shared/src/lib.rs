use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const ARENA_WIDTH: f32 = 800.0;
pub const ARENA_HEIGHT: f32 = 600.0;
pub const PLAYER_RADIUS: f32 = 8.0;
pub const PLAYER_SPEED: f32 = 4.0;
pub const ROOM_CAPACITY: usize = 4;
pub const TICK_RATE: u32 = 60;
pub const SPAWN_X: f32 = 100.0;
pub const SPAWN_Y: f32 = 300.0;
pub const SPAWN_STRIDE: f32 = 50.0;
pub const ROOM_CODE_LEN: usize = 6;

/// Commands a client may send over its channel. The `type` field on the
/// wire selects the variant.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    Auth {
        token: String,
    },
    CreateRoom,
    JoinRoom {
        #[serde(rename = "roomId")]
        room_id: String,
    },
    Input {
        inputs: InputFlags,
    },
    StartGame,
}

/// Replies and broadcasts sent back to clients.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    AuthSuccess,
    Error {
        message: String,
    },
    RoomCreated {
        #[serde(rename = "roomId")]
        room_id: String,
        state: RoomState,
    },
    GameState {
        state: RoomState,
    },
}

/// Directional flags for one player. Each `input` command replaces the
/// whole set; omitted fields read as released.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputFlags {
    #[serde(default)]
    pub up: bool,
    #[serde(default)]
    pub down: bool,
    #[serde(default)]
    pub left: bool,
    #[serde(default)]
    pub right: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Waiting,
    Playing,
}

/// One player's simulated state, keyed by account id inside a room.
/// Nickname and game id are denormalized from the profile at join time.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerState {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    pub speed: f32,
    pub nickname: String,
    pub gid: String,
    pub inputs: InputFlags,
}

impl PlayerState {
    /// Spawns a player for the given join slot: the creator (slot 0)
    /// starts at the spawn point, later joiners are offset to the right.
    pub fn spawn(slot: usize, nickname: &str, gid: &str) -> Self {
        Self {
            x: SPAWN_X + slot as f32 * SPAWN_STRIDE,
            y: SPAWN_Y,
            radius: PLAYER_RADIUS,
            speed: PLAYER_SPEED,
            nickname: nickname.to_string(),
            gid: gid.to_string(),
            inputs: InputFlags::default(),
        }
    }

    /// Advances the player by one tick. Each held direction contributes
    /// its full per-axis speed (opposite flags cancel, orthogonal flags
    /// move diagonally, not normalized), then the position is clamped
    /// to the arena so the whole disc stays inside.
    pub fn step(&mut self) {
        if self.inputs.up {
            self.y -= self.speed;
        }
        if self.inputs.down {
            self.y += self.speed;
        }
        if self.inputs.left {
            self.x -= self.speed;
        }
        if self.inputs.right {
            self.x += self.speed;
        }

        self.x = self.x.clamp(self.radius, ARENA_WIDTH - self.radius);
        self.y = self.y.clamp(self.radius, ARENA_HEIGHT - self.radius);
    }
}

/// Full state of one room as broadcast to its members.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RoomState {
    pub status: RoomStatus,
    pub players: HashMap<String, PlayerState>,
}
