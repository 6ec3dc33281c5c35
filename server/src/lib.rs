//! # Session Relay Server Library
//!
//! Authoritative session server for small-group real-time play. Clients
//! open a persistent WebSocket channel, authenticate with an opaque
//! access key, form rooms of up to four players, and exchange input and
//! position updates at a fixed 60Hz simulation rate.
//!
//! ## Module Organization
//!
//! - [`gateway`] owns the listener and one task per connection: frame
//!   decoding, the auth handshake, and command dispatch.
//! - [`identity`] is the bridge to the external credential verifier,
//!   shipped here as a keyring of pre-issued access keys.
//! - [`registry`] holds every live room and is the single choke point
//!   for membership, capacity, and room-code invariants.
//! - [`state`] couples the session table and the room registry into one
//!   shared `World` behind a single lock.
//! - [`simulation`] advances all playing rooms once per tick and hands
//!   the resulting snapshots to [`fanout`].
//! - [`fanout`] serializes room state once and delivers it to every
//!   member, tolerating channels that have already closed.
//!
//! ## Execution Model
//!
//! All shared state lives in one `Arc<RwLock<World>>`. Connection tasks
//! and the simulation loop take the write lock for each mutation, which
//! keeps execution equivalent to a single-threaded event loop: there is
//! never parallel mutation of room or session state, so no further
//! locking discipline is needed.

pub mod fanout;
pub mod gateway;
pub mod identity;
pub mod registry;
pub mod simulation;
pub mod state;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current unix time in milliseconds, used for access-key expiry.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}
