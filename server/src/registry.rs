//! Room registry and membership management for the session relay
//!
//! This module owns every live room, including:
//! - Room creation with collision-free short codes
//! - Membership capacity and one-room-per-identity enforcement
//! - Input recording and the per-tick position update
//! - Room teardown the moment the last member leaves
//!
//! All room mutation goes through the registry's operations; nothing
//! else holds a reference into the room maps, which keeps the capacity
//! and membership invariants enforceable at a single choke point.

use crate::identity::Profile;
use log::info;
use rand::Rng;
use shared::{InputFlags, PlayerState, RoomState, RoomStatus, ROOM_CAPACITY, ROOM_CODE_LEN};
use std::collections::HashMap;
use thiserror::Error;

const CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Room-level failures, reported to the sender as an `error` message.
/// Neither variant affects the connection or any room state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("room not found")]
    RoomNotFound,
    #[error("room is full")]
    RoomFull,
}

/// What happened to a client's previous room when they left it. The
/// caller is responsible for broadcasting `Remaining` states to the
/// members still inside.
#[derive(Debug)]
pub enum Departure {
    /// The room lost its last member and was deleted.
    Deleted { code: String },
    /// The room survives with the listed members.
    Remaining {
        code: String,
        members: Vec<String>,
        state: RoomState,
    },
}

/// A bounded group of clients sharing one simulated arena.
///
/// `members` preserves join order, which fixes each joiner's spawn
/// slot; `players` holds the simulated state keyed by account id.
#[derive(Debug, Clone)]
pub struct Room {
    code: String,
    status: RoomStatus,
    members: Vec<String>,
    players: HashMap<String, PlayerState>,
}

impl Room {
    fn new(code: String) -> Self {
        Self {
            code,
            status: RoomStatus::Waiting,
            members: Vec::new(),
            players: HashMap::new(),
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn status(&self) -> RoomStatus {
        self.status
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn player(&self, uid: &str) -> Option<&PlayerState> {
        self.players.get(uid)
    }

    /// Snapshot of the room as broadcast to members.
    pub fn state(&self) -> RoomState {
        RoomState {
            status: self.status,
            players: self.players.clone(),
        }
    }

    fn insert(&mut self, uid: &str, profile: &Profile) {
        let slot = self.members.len();
        self.members.push(uid.to_string());
        self.players.insert(
            uid.to_string(),
            PlayerState::spawn(slot, &profile.nickname, &profile.gid),
        );
    }

    fn remove(&mut self, uid: &str) {
        self.members.retain(|member| member != uid);
        self.players.remove(uid);
    }

    /// Advances every player in the room by one tick.
    pub fn step(&mut self) {
        for player in self.players.values_mut() {
            player.step();
        }
    }
}

/// All live rooms plus the identity → room mapping.
///
/// A room exists in the registry exactly as long as it has at least one
/// member, and an identity maps to at most one room at a time.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
    membership: HashMap<String, String>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn room(&self, code: &str) -> Option<&Room> {
        self.rooms.get(code)
    }

    /// Room code the identity is currently in, if any.
    pub fn room_of(&self, uid: &str) -> Option<&str> {
        self.membership.get(uid).map(String::as_str)
    }

    /// Creates a room in `waiting` status with the creator as sole
    /// member at the spawn point. If the creator was in another room
    /// they leave it first; the returned departure tells the caller who
    /// still needs the old room's updated state.
    pub fn create_room(
        &mut self,
        uid: &str,
        profile: &Profile,
    ) -> (String, RoomState, Option<Departure>) {
        let departure = self.remove_client(uid);

        let code = self.generate_code();
        let mut room = Room::new(code.clone());
        room.insert(uid, profile);
        let state = room.state();

        self.rooms.insert(code.clone(), room);
        self.membership.insert(uid.to_string(), code.clone());
        info!("Room {} created by {}", code, profile.nickname);

        (code, state, departure)
    }

    /// Adds the identity to an existing room at the next spawn slot.
    /// Fails with `RoomNotFound` or `RoomFull` before any state changes,
    /// so a failed join leaves current membership untouched.
    pub fn join_room(
        &mut self,
        uid: &str,
        profile: &Profile,
        code: &str,
    ) -> Result<(Vec<String>, RoomState, Option<Departure>), RoomError> {
        {
            let room = self.rooms.get(code).ok_or(RoomError::RoomNotFound)?;
            if room.len() >= ROOM_CAPACITY {
                return Err(RoomError::RoomFull);
            }
        }

        // Re-joining the current room must not tear it down, so the
        // sole-member case bypasses the deletion path.
        let departure = if self.room_of(uid) == Some(code) {
            if let Some(room) = self.rooms.get_mut(code) {
                room.remove(uid);
            }
            self.membership.remove(uid);
            None
        } else {
            self.remove_client(uid)
        };

        let room = self.rooms.get_mut(code).ok_or(RoomError::RoomNotFound)?;
        room.insert(uid, profile);
        self.membership.insert(uid.to_string(), code.to_string());
        info!("{} joined room {}", profile.nickname, code);

        Ok((room.members.clone(), room.state(), departure))
    }

    /// Replaces the player's directional flags verbatim. A client
    /// outside any room is a silent no-op.
    pub fn record_input(&mut self, uid: &str, inputs: InputFlags) {
        if let Some(code) = self.membership.get(uid) {
            if let Some(room) = self.rooms.get_mut(code) {
                if let Some(player) = room.players.get_mut(uid) {
                    player.inputs = inputs;
                }
            }
        }
    }

    /// Flips the client's room to `playing`. Deliberately permissive:
    /// any member may start at any time, with no minimum player count
    /// and no check that the room was still `waiting`.
    pub fn start_game(&mut self, uid: &str) {
        if let Some(code) = self.membership.get(uid) {
            if let Some(room) = self.rooms.get_mut(code) {
                room.status = RoomStatus::Playing;
                info!("Game started in room {}", code);
            }
        }
    }

    /// Removes the identity from its room, deleting the room if it
    /// becomes empty. Returns `None` when the identity was not in any
    /// room.
    pub fn remove_client(&mut self, uid: &str) -> Option<Departure> {
        let code = self.membership.remove(uid)?;
        let room = self.rooms.get_mut(&code)?;
        room.remove(uid);

        if room.is_empty() {
            self.rooms.remove(&code);
            info!("Room {} is empty, deleting", code);
            Some(Departure::Deleted { code })
        } else {
            Some(Departure::Remaining {
                members: room.members.clone(),
                state: room.state(),
                code,
            })
        }
    }

    /// Advances every `playing` room by one tick and returns the
    /// snapshots to broadcast. Waiting rooms are untouched.
    pub fn step_playing_rooms(&mut self) -> Vec<(Vec<String>, RoomState)> {
        let mut updates = Vec::new();
        for room in self.rooms.values_mut() {
            if room.status() != RoomStatus::Playing {
                continue;
            }
            room.step();
            updates.push((room.members.clone(), room.state()));
        }
        updates
    }

    /// Short random alphanumeric code, regenerated until it does not
    /// collide with a live room.
    fn generate_code(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let code: String = (0..ROOM_CODE_LEN)
                .map(|_| CODE_CHARSET[rng.gen_range(0..CODE_CHARSET.len())] as char)
                .collect();
            if !self.rooms.contains_key(&code) {
                return code;
            }
        }
    }
}
