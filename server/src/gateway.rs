//! Connection gateway: WebSocket accept loop, per-connection auth
//! handshake, and command dispatch.
//!
//! Protocol errors are deliberately non-fatal and unreported: malformed
//! frames and unknown command types are dropped without a reply and the
//! connection stays open. Only authentication failure ends a
//! connection from the server side.

use crate::fanout;
use crate::identity::{Identity, IdentityBridge};
use crate::registry::Departure;
use crate::state::{next_conn_id, Session, SessionTable, SharedWorld};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use shared::{ClientMessage, ServerMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

type WsReader = SplitStream<WebSocketStream<TcpStream>>;

/// Accepts transport channels and runs one task per connection.
pub struct Gateway {
    listener: TcpListener,
    world: SharedWorld,
    identity: Arc<dyn IdentityBridge>,
}

impl Gateway {
    pub async fn bind(
        addr: &str,
        world: SharedWorld,
        identity: Arc<dyn IdentityBridge>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Gateway listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            world,
            identity,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop. Runs until the task is dropped.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let world = Arc::clone(&self.world);
                    let identity = Arc::clone(&self.identity);
                    tokio::spawn(async move {
                        handle_connection(stream, peer, world, identity).await;
                    });
                }
                Err(e) => warn!("Failed to accept connection: {}", e),
            }
        }
    }
}

/// Drives one connection through its whole lifecycle:
/// unauthenticated → authenticated → closed.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    world: SharedWorld,
    bridge: Arc<dyn IdentityBridge>,
) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("Handshake with {} failed: {}", peer, e);
            return;
        }
    };
    info!("Client connected from {}", peer);

    let (mut sink, mut reader) = ws.split();

    // Writer task owns the sink; everything outbound goes through this
    // channel so the session table never holds the socket itself.
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(frame).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let identity = match authenticate(&mut reader, &tx, bridge.as_ref()).await {
        Some(identity) => identity,
        None => {
            drop(tx);
            let _ = writer.await;
            return;
        }
    };

    let conn_id = next_conn_id();
    {
        let mut w = world.write().await;
        if let Some(previous) = w.sessions.bind(Session {
            conn_id,
            uid: identity.uid.clone(),
            profile: identity.profile.clone(),
            tx: tx.clone(),
        }) {
            debug!(
                "Session for {} superseded (was connection {})",
                previous.uid, previous.conn_id
            );
        }
    }
    send(&tx, &ServerMessage::AuthSuccess);
    info!(
        "Client authenticated: {} ({})",
        identity.profile.nickname, identity.profile.gid
    );

    while let Some(frame) = reader.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(command) => handle_command(&world, &identity, command, &tx).await,
                Err(e) => debug!("Dropping malformed frame from {}: {}", identity.uid, e),
            },
            Ok(Message::Ping(payload)) => {
                let _ = tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Read error from {}: {}", identity.uid, e);
                break;
            }
        }
    }

    disconnect(&world, &identity.uid, conn_id).await;
    info!("Client {} disconnected", identity.profile.nickname);

    drop(tx);
    let _ = writer.await;
}

/// Pre-authentication read loop. Only `auth` is honored; every other
/// frame is dropped silently, including frames that race the identity
/// lookup. Returns `None` when the connection should close: channel
/// closed, read error, or a failed credential (terminal, no retry).
async fn authenticate(
    reader: &mut WsReader,
    tx: &UnboundedSender<Message>,
    bridge: &dyn IdentityBridge,
) -> Option<Identity> {
    loop {
        let frame = reader.next().await?;
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Ping(payload)) => {
                let _ = tx.send(Message::Pong(payload));
                continue;
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        };

        let token = match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::Auth { token }) => token,
            Ok(_) => {
                debug!("Ignoring pre-auth command");
                continue;
            }
            Err(e) => {
                debug!("Dropping malformed pre-auth frame: {}", e);
                continue;
            }
        };

        // Pending sub-state: the connection stays unauthenticated while
        // the bridge call is outstanding, and frames arriving meanwhile
        // are dropped exactly like any other pre-auth frame.
        let verify = bridge.verify(&token);
        tokio::pin!(verify);
        let outcome = loop {
            tokio::select! {
                outcome = &mut verify => break outcome,
                frame = reader.next() => match frame {
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = tx.send(Message::Pong(payload));
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return None,
                    Some(Ok(_)) => debug!("Dropping frame received during auth"),
                },
            }
        };

        return match outcome {
            Ok(identity) => Some(identity),
            Err(e) => {
                warn!("Auth error: {}", e);
                send(tx, &ServerMessage::Error {
                    message: "Authentication failed.".to_string(),
                });
                let _ = tx.send(Message::Close(None));
                None
            }
        };
    }
}

/// Dispatches one authenticated command. Room errors go back to the
/// sender as `error` messages; everything else replies or broadcasts
/// per command.
async fn handle_command(
    world: &SharedWorld,
    identity: &Identity,
    command: ClientMessage,
    tx: &UnboundedSender<Message>,
) {
    match command {
        // There is no re-authentication path.
        ClientMessage::Auth { .. } => debug!("Ignoring re-auth from {}", identity.uid),

        ClientMessage::CreateRoom => {
            let mut guard = world.write().await;
            let w = &mut *guard;
            let (room_id, state, departure) = w.rooms.create_room(&identity.uid, &identity.profile);
            notify_departure(&w.sessions, departure);
            send(tx, &ServerMessage::RoomCreated { room_id, state });
        }

        ClientMessage::JoinRoom { room_id } => {
            let mut guard = world.write().await;
            let w = &mut *guard;
            match w.rooms.join_room(&identity.uid, &identity.profile, &room_id) {
                Ok((members, state, departure)) => {
                    notify_departure(&w.sessions, departure);
                    fanout::broadcast_state(&w.sessions, &members, state);
                }
                Err(e) => send(tx, &ServerMessage::Error {
                    message: e.to_string(),
                }),
            }
        }

        ClientMessage::Input { inputs } => {
            world.write().await.rooms.record_input(&identity.uid, inputs);
        }

        ClientMessage::StartGame => {
            world.write().await.rooms.start_game(&identity.uid);
        }
    }
}

/// Channel-close cleanup: unbind the session and pull the client out of
/// its room, telling the remaining members. A connection whose identity
/// was superseded by a newer login leaves room state alone.
async fn disconnect(world: &SharedWorld, uid: &str, conn_id: u64) {
    let mut guard = world.write().await;
    let w = &mut *guard;
    if !w.sessions.unbind(uid, conn_id) {
        return;
    }
    notify_departure(&w.sessions, w.rooms.remove_client(uid));
}

/// Broadcasts the post-departure state of a room the client just left,
/// if the room still has members.
fn notify_departure(sessions: &SessionTable, departure: Option<Departure>) {
    if let Some(Departure::Remaining { members, state, .. }) = departure {
        fanout::broadcast_state(sessions, &members, state);
    }
}

fn send(tx: &UnboundedSender<Message>, message: &ServerMessage) {
    match serde_json::to_string(message) {
        Ok(payload) => {
            let _ = tx.send(Message::Text(payload));
        }
        Err(e) => debug!("Failed to encode reply: {}", e),
    }
}
