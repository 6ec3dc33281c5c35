//! Integration tests driving the relay end-to-end over real WebSocket
//! connections against an in-process server.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use server::gateway::Gateway;
use server::identity::{KeyEntry, KeyringBridge};
use server::simulation;
use server::state::World;
use shared::{PLAYER_RADIUS, PLAYER_SPEED, ROOM_CODE_LEN, SPAWN_STRIDE, SPAWN_X, SPAWN_Y};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(3);

fn keyring() -> KeyringBridge {
    KeyringBridge::from_entries([
        ("key-a".to_string(), KeyEntry::new("uid-a", "Alice", "g-1")),
        ("key-b".to_string(), KeyEntry::new("uid-b", "Bob", "g-2")),
        ("key-c".to_string(), KeyEntry::new("uid-c", "Carol", "g-3")),
        ("key-d".to_string(), KeyEntry::new("uid-d", "Dave", "g-4")),
        ("key-e".to_string(), KeyEntry::new("uid-e", "Eve", "g-5")),
        (
            "key-expired".to_string(),
            KeyEntry::expiring("uid-x", "Xavier", "g-9", 1),
        ),
    ])
}

async fn start_server() -> SocketAddr {
    let world = World::new_shared();
    let gateway = Gateway::bind("127.0.0.1:0", Arc::clone(&world), Arc::new(keyring()))
        .await
        .expect("Failed to bind gateway");
    let addr = gateway.local_addr().unwrap();
    tokio::spawn(gateway.run());
    tokio::spawn(simulation::run(world, 60));
    addr
}

async fn connect(addr: SocketAddr) -> WsClient {
    let (ws, _) = connect_async(format!("ws://{}", addr))
        .await
        .expect("Failed to connect");
    ws
}

async fn send_json(ws: &mut WsClient, value: Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

/// Receives the next text frame as JSON, skipping control frames.
async fn recv_json(ws: &mut WsClient) -> Value {
    loop {
        let frame = timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("Timed out waiting for frame")
            .expect("Connection closed unexpectedly")
            .expect("Read error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn authenticate(ws: &mut WsClient, key: &str) {
    send_json(ws, json!({"type": "auth", "token": key})).await;
    let reply = recv_json(ws).await;
    assert_eq!(reply["type"], "authSuccess", "unexpected reply: {}", reply);
}

/// Waits until the peer closes the connection (Close frame or EOF).
async fn expect_closed(ws: &mut WsClient) {
    loop {
        match timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("Timed out waiting for close")
        {
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
            Some(Ok(_)) => {}
        }
    }
}

/// AUTH HANDSHAKE TESTS
mod auth_tests {
    use super::*;

    #[tokio::test]
    async fn auth_with_valid_key_succeeds() {
        let addr = start_server().await;
        let mut ws = connect(addr).await;
        authenticate(&mut ws, "key-a").await;
    }

    #[tokio::test]
    async fn auth_with_unknown_key_is_terminal() {
        let addr = start_server().await;
        let mut ws = connect(addr).await;

        send_json(&mut ws, json!({"type": "auth", "token": "garbage"})).await;
        let reply = recv_json(&mut ws).await;
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["message"], "Authentication failed.");
        expect_closed(&mut ws).await;
    }

    #[tokio::test]
    async fn auth_with_expired_key_is_terminal() {
        let addr = start_server().await;
        let mut ws = connect(addr).await;

        send_json(&mut ws, json!({"type": "auth", "token": "key-expired"})).await;
        let reply = recv_json(&mut ws).await;
        assert_eq!(reply["type"], "error");
        expect_closed(&mut ws).await;
    }

    #[tokio::test]
    async fn pre_auth_commands_are_silently_ignored() {
        let addr = start_server().await;
        let mut ws = connect(addr).await;

        // None of these may produce a reply or create anything.
        send_json(&mut ws, json!({"type": "createRoom"})).await;
        send_json(&mut ws, json!({"type": "startGame"})).await;
        send_json(&mut ws, json!({"type": "joinRoom", "roomId": "ABCDEF"})).await;
        send_json(&mut ws, json!({"not even": "a command"})).await;

        // The first reply on the channel is the auth acknowledgment.
        authenticate(&mut ws, "key-a").await;

        // And the connection still works normally afterwards.
        send_json(&mut ws, json!({"type": "createRoom"})).await;
        let reply = recv_json(&mut ws).await;
        assert_eq!(reply["type"], "roomCreated");
    }

    #[tokio::test]
    async fn malformed_frames_do_not_end_an_authenticated_connection() {
        let addr = start_server().await;
        let mut ws = connect(addr).await;
        authenticate(&mut ws, "key-a").await;

        send_json(&mut ws, json!({"type": "teleport"})).await;
        ws.send(Message::Text("not json at all".to_string()))
            .await
            .unwrap();

        send_json(&mut ws, json!({"type": "createRoom"})).await;
        let reply = recv_json(&mut ws).await;
        assert_eq!(reply["type"], "roomCreated");
    }
}

/// ROOM LIFECYCLE TESTS
mod room_tests {
    use super::*;

    #[tokio::test]
    async fn create_room_returns_one_member_waiting_state() {
        let addr = start_server().await;
        let mut ws = connect(addr).await;
        authenticate(&mut ws, "key-a").await;

        send_json(&mut ws, json!({"type": "createRoom"})).await;
        let reply = recv_json(&mut ws).await;

        assert_eq!(reply["type"], "roomCreated");
        let room_id = reply["roomId"].as_str().unwrap();
        assert_eq!(room_id.len(), ROOM_CODE_LEN);

        let state = &reply["state"];
        assert_eq!(state["status"], "waiting");
        assert_eq!(state["players"].as_object().unwrap().len(), 1);

        let player = &state["players"]["uid-a"];
        assert_eq!(player["x"], SPAWN_X);
        assert_eq!(player["y"], SPAWN_Y);
        assert_eq!(player["radius"], PLAYER_RADIUS);
        assert_eq!(player["speed"], PLAYER_SPEED);
        assert_eq!(player["nickname"], "Alice");
        assert_eq!(player["gid"], "g-1");
        assert_eq!(player["inputs"]["left"], false);
    }

    #[tokio::test]
    async fn join_broadcasts_two_member_state_to_everyone() {
        let addr = start_server().await;
        let mut ws_a = connect(addr).await;
        authenticate(&mut ws_a, "key-a").await;
        send_json(&mut ws_a, json!({"type": "createRoom"})).await;
        let created = recv_json(&mut ws_a).await;
        let room_id = created["roomId"].as_str().unwrap().to_string();

        let mut ws_b = connect(addr).await;
        authenticate(&mut ws_b, "key-b").await;
        send_json(&mut ws_b, json!({"type": "joinRoom", "roomId": room_id})).await;

        for ws in [&mut ws_a, &mut ws_b] {
            let update = recv_json(ws).await;
            assert_eq!(update["type"], "gameState");
            let players = update["state"]["players"].as_object().unwrap();
            assert_eq!(players.len(), 2);
            assert_eq!(players["uid-b"]["x"], SPAWN_X + SPAWN_STRIDE);
            assert_eq!(players["uid-b"]["nickname"], "Bob");
        }
    }

    #[tokio::test]
    async fn join_unknown_room_reports_error() {
        let addr = start_server().await;
        let mut ws = connect(addr).await;
        authenticate(&mut ws, "key-a").await;

        send_json(&mut ws, json!({"type": "joinRoom", "roomId": "NOSUCH"})).await;
        let reply = recv_json(&mut ws).await;
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["message"], "room not found");
    }

    #[tokio::test]
    async fn join_full_room_reports_error() {
        let addr = start_server().await;
        let mut ws_a = connect(addr).await;
        authenticate(&mut ws_a, "key-a").await;
        send_json(&mut ws_a, json!({"type": "createRoom"})).await;
        let created = recv_json(&mut ws_a).await;
        let room_id = created["roomId"].as_str().unwrap().to_string();

        // Keep the joiners' connections open so the room stays full.
        let mut members = Vec::new();
        for key in ["key-b", "key-c", "key-d"] {
            let mut ws = connect(addr).await;
            authenticate(&mut ws, key).await;
            send_json(&mut ws, json!({"type": "joinRoom", "roomId": room_id})).await;
            let update = recv_json(&mut ws).await;
            assert_eq!(update["type"], "gameState");
            members.push(ws);
        }

        let mut ws_e = connect(addr).await;
        authenticate(&mut ws_e, "key-e").await;
        send_json(&mut ws_e, json!({"type": "joinRoom", "roomId": room_id})).await;
        let reply = recv_json(&mut ws_e).await;
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["message"], "room is full");
    }

    #[tokio::test]
    async fn empty_room_is_deleted_from_the_registry() {
        let addr = start_server().await;
        let mut ws_a = connect(addr).await;
        authenticate(&mut ws_a, "key-a").await;
        send_json(&mut ws_a, json!({"type": "createRoom"})).await;
        let created = recv_json(&mut ws_a).await;
        let room_id = created["roomId"].as_str().unwrap().to_string();

        ws_a.close(None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let mut ws_b = connect(addr).await;
        authenticate(&mut ws_b, "key-b").await;
        send_json(&mut ws_b, json!({"type": "joinRoom", "roomId": room_id})).await;
        let reply = recv_json(&mut ws_b).await;
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["message"], "room not found");
    }
}

/// SIMULATION & DISCONNECT SCENARIOS
mod gameplay_tests {
    use super::*;

    /// Holding left moves the player 4 units per tick until the arena
    /// clamp at x = 8, after which further input has no effect.
    #[tokio::test]
    async fn input_moves_player_until_clamped_at_wall() {
        let addr = start_server().await;
        let mut ws = connect(addr).await;
        authenticate(&mut ws, "key-a").await;
        send_json(&mut ws, json!({"type": "createRoom"})).await;
        recv_json(&mut ws).await;

        send_json(&mut ws, json!({"type": "startGame"})).await;
        send_json(
            &mut ws,
            json!({"type": "input", "inputs": {"left": true}}),
        )
        .await;

        let mut last_x = SPAWN_X as f64;
        let mut clamped_frames = 0;
        while clamped_frames < 3 {
            let update = recv_json(&mut ws).await;
            assert_eq!(update["type"], "gameState");
            assert_eq!(update["state"]["status"], "playing");

            let x = update["state"]["players"]["uid-a"]["x"].as_f64().unwrap();
            let delta = last_x - x;
            assert!(
                delta == 0.0 || delta == PLAYER_SPEED as f64,
                "player moved {} in one tick",
                delta
            );
            assert!(x >= PLAYER_RADIUS as f64);
            last_x = x;

            if x == PLAYER_RADIUS as f64 {
                clamped_frames += 1;
            }
        }
    }

    #[tokio::test]
    async fn disconnect_mid_game_prunes_player_from_broadcasts() {
        let addr = start_server().await;
        let mut ws_a = connect(addr).await;
        authenticate(&mut ws_a, "key-a").await;
        send_json(&mut ws_a, json!({"type": "createRoom"})).await;
        let created = recv_json(&mut ws_a).await;
        let room_id = created["roomId"].as_str().unwrap().to_string();

        let mut ws_b = connect(addr).await;
        authenticate(&mut ws_b, "key-b").await;
        send_json(&mut ws_b, json!({"type": "joinRoom", "roomId": room_id})).await;
        recv_json(&mut ws_b).await;

        send_json(&mut ws_a, json!({"type": "startGame"})).await;
        ws_b.close(None).await.unwrap();

        // Tick broadcasts keep flowing to A; within a few frames B must
        // be gone from the room state.
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        loop {
            assert!(
                tokio::time::Instant::now() < deadline,
                "B never left the broadcast state"
            );
            let update = recv_json(&mut ws_a).await;
            if update["type"] != "gameState" {
                continue;
            }
            let players = update["state"]["players"].as_object().unwrap();
            if !players.contains_key("uid-b") {
                assert_eq!(players.len(), 1);
                assert!(players.contains_key("uid-a"));
                break;
            }
        }
    }

    #[tokio::test]
    async fn input_outside_a_room_is_a_noop() {
        let addr = start_server().await;
        let mut ws = connect(addr).await;
        authenticate(&mut ws, "key-a").await;

        send_json(
            &mut ws,
            json!({"type": "input", "inputs": {"right": true}}),
        )
        .await;

        // No error, no broadcast; the connection is still usable.
        send_json(&mut ws, json!({"type": "createRoom"})).await;
        let reply = recv_json(&mut ws).await;
        assert_eq!(reply["type"], "roomCreated");
        assert_eq!(reply["state"]["players"]["uid-a"]["x"], SPAWN_X);
    }
}
