//! Shared server state: the session table mapping authenticated
//! identities to their outbound channels, and the `World` that couples
//! it with the room registry behind a single lock.

use crate::identity::Profile;
use crate::registry::RoomRegistry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Handle distinguishing the underlying connection behind a session.
/// Identities can log in again; connection ids never repeat.
pub fn next_conn_id() -> u64 {
    NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed)
}

/// The authenticated view of a connection. The transport itself stays
/// with the connection task; the table only holds the sender feeding
/// that task's writer.
#[derive(Debug, Clone)]
pub struct Session {
    pub conn_id: u64,
    pub uid: String,
    pub profile: Profile,
    pub tx: UnboundedSender<Message>,
}

/// Live sessions keyed by account id.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<String, Session>,
}

impl SessionTable {
    /// Binds an identity to a connection, returning the session this
    /// login superseded, if any.
    pub fn bind(&mut self, session: Session) -> Option<Session> {
        self.sessions.insert(session.uid.clone(), session)
    }

    pub fn get(&self, uid: &str) -> Option<&Session> {
        self.sessions.get(uid)
    }

    /// Removes the identity's session, but only if it still belongs to
    /// the given connection. Returns false when a newer login owns the
    /// identity, in which case the caller must leave room state alone.
    pub fn unbind(&mut self, uid: &str, conn_id: u64) -> bool {
        match self.sessions.get(uid) {
            Some(session) if session.conn_id == conn_id => {
                self.sessions.remove(uid);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Everything the gateway and simulation loop share. All mutation goes
/// through the write lock, preserving single-threaded-equivalent
/// execution over room and session state.
#[derive(Debug, Default)]
pub struct World {
    pub sessions: SessionTable,
    pub rooms: RoomRegistry,
}

pub type SharedWorld = Arc<RwLock<World>>;

impl World {
    pub fn new_shared() -> SharedWorld {
        Arc::new(RwLock::new(World::default()))
    }
}
