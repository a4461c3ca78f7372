// End-to-end tests for the session server.
//
// Starts a server on localhost with an in-memory store, connects WebSocket
// clients, and exercises login, request correlation, error policy, game
// creation notifications, and move updates over the real wire format.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uttt_protocol::messages::ErrorMessage;
use uttt_protocol::{decode_message, GameState, ServerMessage, UNSOLICITED_REQUEST_ID};
use uttt_server::config::PlayerSection;
use uttt_server::session::SessionRegistry;
use uttt_server::{GameServer, MemoryStore, ServerConfig, ServerHandle, UltimateTicTacToe};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

fn test_config() -> ServerConfig {
    let players = ["alice", "bob", "carol"]
        .iter()
        .map(|name| PlayerSection {
            login_id: format!("login-{name}"),
            username: name.to_string(),
            player_id: Some(format!("p-{name}")),
        })
        .collect();
    ServerConfig {
        bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        players,
        ..ServerConfig::default()
    }
}

async fn start_with(config: ServerConfig) -> ServerHandle {
    let store = Arc::new(MemoryStore::with_players(&config.players));
    GameServer::new(config, store, Arc::new(UltimateTicTacToe))
        .start()
        .await
        .unwrap()
}

async fn start_server() -> ServerHandle {
    start_with(test_config()).await
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/socket"))
        .await
        .unwrap();
    ws
}

async fn send(ws: &mut Client, message_type: &str, request_id: i64, payload: serde_json::Value) {
    let frame = json!({
        "messageType": message_type,
        "requestID": request_id,
        "payload": payload,
    });
    ws.send(Message::text(frame.to_string())).await.unwrap();
}

/// Receive the next server message with its request id.
async fn recv(ws: &mut Client) -> (ServerMessage, i64) {
    loop {
        let frame = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for a message")
            .expect("connection ended")
            .unwrap();
        match frame {
            Message::Text(text) => return decode_message(text.as_bytes()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame {other:?}"),
        }
    }
}

async fn recv_error(ws: &mut Client) -> (ErrorMessage, i64) {
    match recv(ws).await {
        (ServerMessage::ErrorMessage(e), id) => (e, id),
        other => panic!("expected ErrorMessage, got {other:?}"),
    }
}

async fn login(ws: &mut Client, name: &str) {
    send(ws, "LoginRequest", 1, json!({ "loginID": format!("login-{name}") })).await;
    match recv(ws).await {
        (ServerMessage::LoginSuccess(ok), 1) => assert_eq!(ok.username, name),
        other => panic!("expected LoginSuccess, got {other:?}"),
    }
}

/// The server must close the connection without sending anything else.
async fn assert_closed(ws: &mut Client) {
    let next = tokio::time::timeout(WAIT, ws.next())
        .await
        .expect("connection was not closed");
    match next {
        None | Some(Err(_)) | Some(Ok(Message::Close(_))) => {}
        Some(Ok(other)) => panic!("expected close, got {other:?}"),
    }
}

async fn assert_silent(ws: &mut Client) {
    let next = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(next.is_err(), "unexpected message {next:?}");
}

async fn new_game(challenger: &mut Client, opponent: &mut Client, opponent_name: &str) -> GameState {
    send(challenger, "NewGame", 5, json!({ "opponent": opponent_name })).await;
    let game = match recv(opponent).await {
        (ServerMessage::NewGameNotification(n), UNSOLICITED_REQUEST_ID) => n.game,
        other => panic!("expected NewGameNotification, got {other:?}"),
    };
    match recv(challenger).await {
        (ServerMessage::NewGameNotification(n), UNSOLICITED_REQUEST_ID) => {
            assert_eq!(n.opponent, opponent_name);
            assert_eq!(n.game_id, game.game_id);
        }
        other => panic!("expected NewGameNotification, got {other:?}"),
    }
    game
}

#[tokio::test]
async fn unknown_login_is_recoverable() {
    let server = start_server().await;
    let mut ws = connect(server.local_addr()).await;

    send(&mut ws, "LoginRequest", 3, json!({ "loginID": "nobody" })).await;
    let (err, id) = recv_error(&mut ws).await;
    assert_eq!(id, 3);
    assert!(err.recoverable);

    login(&mut ws, "alice").await;
    server.shutdown().await;
}

#[tokio::test]
async fn requests_before_login_are_rejected() {
    let server = start_server().await;
    let mut ws = connect(server.local_addr()).await;

    send(&mut ws, "UserLookup", 9, json!({ "username": "bob" })).await;
    let (err, id) = recv_error(&mut ws).await;
    assert_eq!(id, 9);
    assert!(err.recoverable);
    assert_eq!(err.message, "not authenticated");

    server.shutdown().await;
}

#[tokio::test]
async fn unknown_type_keeps_connection_open() {
    let server = start_server().await;
    let mut ws = connect(server.local_addr()).await;
    login(&mut ws, "alice").await;

    send(&mut ws, "Bogus", 4, json!({})).await;
    let (err, id) = recv_error(&mut ws).await;
    assert_eq!(id, 4);
    assert!(err.recoverable);

    send(&mut ws, "UserLookup", 6, json!({ "username": "bob" })).await;
    match recv(&mut ws).await {
        (ServerMessage::UserLookupResult(r), 6) => {
            assert!(r.found);
            assert_eq!(r.player_id.as_deref(), Some("p-bob"));
        }
        other => panic!("expected UserLookupResult, got {other:?}"),
    }
    server.shutdown().await;
}

#[tokio::test]
async fn undeclared_field_closes_connection() {
    let server = start_server().await;
    let mut ws = connect(server.local_addr()).await;
    login(&mut ws, "alice").await;

    send(&mut ws, "UserLookup", 8, json!({ "username": "bob", "admin": true })).await;
    let (err, id) = recv_error(&mut ws).await;
    assert_eq!(id, 8);
    assert!(!err.recoverable);
    assert_closed(&mut ws).await;

    server.shutdown().await;
}

#[tokio::test]
async fn unparsable_frame_closes_connection() {
    let server = start_server().await;
    let mut ws = connect(server.local_addr()).await;

    ws.send(Message::text("{not json")).await.unwrap();
    let (err, id) = recv_error(&mut ws).await;
    assert_eq!(id, UNSOLICITED_REQUEST_ID);
    assert!(!err.recoverable);
    assert_closed(&mut ws).await;

    server.shutdown().await;
}

#[tokio::test]
async fn second_session_for_same_player_is_rejected() {
    let server = start_server().await;
    let mut first = connect(server.local_addr()).await;
    login(&mut first, "alice").await;

    let mut second = connect(server.local_addr()).await;
    send(&mut second, "LoginRequest", 2, json!({ "loginID": "login-alice" })).await;
    let (err, id) = recv_error(&mut second).await;
    assert_eq!(id, 2);
    assert!(err.recoverable);

    // The original session is unaffected.
    send(&mut first, "UserLookup", 3, json!({ "username": "carol" })).await;
    assert!(matches!(recv(&mut first).await, (ServerMessage::UserLookupResult(_), 3)));

    server.shutdown().await;
}

#[tokio::test]
async fn new_game_is_announced_once_and_listed_on_login() {
    let server = start_server().await;
    let mut alice = connect(server.local_addr()).await;
    let mut bob = connect(server.local_addr()).await;
    login(&mut alice, "alice").await;
    login(&mut bob, "bob").await;

    let game = new_game(&mut alice, &mut bob, "bob").await;
    assert_eq!(game.x_player, "p-alice");
    assert_eq!(game.o_player, "p-bob");
    assert_silent(&mut bob).await;

    // After reconnecting, the game is listed in bob's LoginSuccess.
    drop(bob);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut bob = connect(server.local_addr()).await;
    send(&mut bob, "LoginRequest", 11, json!({ "loginID": "login-bob" })).await;
    match recv(&mut bob).await {
        (ServerMessage::LoginSuccess(ok), 11) => {
            assert_eq!(ok.games.len(), 1);
            assert_eq!(ok.games[0].game_id, game.game_id);
        }
        other => panic!("expected LoginSuccess, got {other:?}"),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn moves_are_checked_and_pushed_to_the_opponent() {
    let server = start_server().await;
    let mut alice = connect(server.local_addr()).await;
    let mut bob = connect(server.local_addr()).await;
    let mut carol = connect(server.local_addr()).await;
    login(&mut alice, "alice").await;
    login(&mut bob, "bob").await;
    login(&mut carol, "carol").await;

    let game = new_game(&mut alice, &mut bob, "bob").await;
    let play = |board: u8, square: u8| {
        json!({ "gameID": game.game_id, "move": { "board": board, "square": square } })
    };

    send(&mut carol, "PlayMove", 20, play(4, 4)).await;
    let (err, id) = recv_error(&mut carol).await;
    assert_eq!(id, 20);
    assert!(err.recoverable);

    send(&mut bob, "PlayMove", 21, play(4, 4)).await;
    let (err, id) = recv_error(&mut bob).await;
    assert_eq!(id, 21);
    assert_eq!(err.message, "illegal move: it is not your turn");

    send(&mut alice, "PlayMove", 22, play(4, 4)).await;
    let mine = match recv(&mut alice).await {
        (ServerMessage::GameState(state), 22) => state,
        other => panic!("expected GameState, got {other:?}"),
    };
    assert_eq!(mine.move_count, 1);
    assert_eq!(mine.active_board, Some(4));

    match recv(&mut bob).await {
        (ServerMessage::GameState(state), UNSOLICITED_REQUEST_ID) => assert_eq!(state, mine),
        other => panic!("expected GameState update, got {other:?}"),
    }
    assert_silent(&mut alice).await;

    server.shutdown().await;
}

#[tokio::test]
async fn shutdown_sends_fatal_error() {
    let server = start_server().await;
    let mut ws = connect(server.local_addr()).await;
    login(&mut ws, "alice").await;

    server.shutdown().await;
    let (err, id) = recv_error(&mut ws).await;
    assert_eq!(id, UNSOLICITED_REQUEST_ID);
    assert!(!err.recoverable);
    assert_eq!(err.message, "server shutting down");
}

#[tokio::test]
async fn wrong_path_is_refused() {
    let server = start_server().await;
    let addr = server.local_addr();
    let result = tokio_tungstenite::connect_async(format!("ws://{addr}/elsewhere")).await;
    assert!(result.is_err());
    server.shutdown().await;
}

#[tokio::test]
async fn quiet_session_hits_idle_timeout() {
    let server = start_with(ServerConfig {
        idle_timeout: 1,
        ..test_config()
    })
    .await;
    let mut ws = connect(server.local_addr()).await;
    login(&mut ws, "alice").await;

    let (err, id) = recv_error(&mut ws).await;
    assert_eq!(id, UNSOLICITED_REQUEST_ID);
    assert!(!err.recoverable);
    assert_eq!(err.message, "idle timeout");
    assert_closed(&mut ws).await;

    server.shutdown().await;
}

#[tokio::test]
async fn pings_keep_session_alive() {
    let server = start_with(ServerConfig {
        idle_timeout: 1,
        ..test_config()
    })
    .await;
    let mut ws = connect(server.local_addr()).await;
    login(&mut ws, "alice").await;

    // Well past the timeout, with a ping every 300ms and no data frames.
    for _ in 0..8 {
        ws.send(Message::Ping(b"keepalive".to_vec().into())).await.unwrap();
        let next_ping = tokio::time::Instant::now() + Duration::from_millis(300);
        loop {
            match tokio::time::timeout_at(next_ping, ws.next()).await {
                Err(_) => break,
                Ok(Some(Ok(Message::Pong(_)))) => continue,
                Ok(other) => panic!("session ended while pinging: {other:?}"),
            }
        }
    }

    send(&mut ws, "UserLookup", 30, json!({ "username": "bob" })).await;
    assert!(matches!(recv(&mut ws).await, (ServerMessage::UserLookupResult(_), 30)));

    // Once the pings stop the timeout applies again.
    let (err, _) = recv_error(&mut ws).await;
    assert_eq!(err.message, "idle timeout");

    server.shutdown().await;
}

#[tokio::test]
async fn oversized_frame_is_malformed() {
    let server = start_with(ServerConfig {
        max_frame_bytes: 1024,
        ..test_config()
    })
    .await;
    let mut ws = connect(server.local_addr()).await;
    login(&mut ws, "alice").await;

    let padding = "x".repeat(1024);
    send(&mut ws, "UserLookup", 31, json!({ "username": padding })).await;
    let (err, id) = recv_error(&mut ws).await;
    assert_eq!(id, UNSOLICITED_REQUEST_ID);
    assert!(!err.recoverable);
    assert_eq!(err.message, "malformed request");
    assert_closed(&mut ws).await;

    server.shutdown().await;
}

#[tokio::test]
async fn frame_at_the_limit_is_accepted() {
    let server = start_with(ServerConfig {
        max_frame_bytes: 1024,
        ..test_config()
    })
    .await;
    let mut ws = connect(server.local_addr()).await;
    login(&mut ws, "alice").await;

    let envelope = |name: &str| {
        json!({
            "messageType": "UserLookup",
            "requestID": 32,
            "payload": { "username": name },
        })
        .to_string()
    };
    let overhead = envelope("").len();
    let frame = envelope(&"y".repeat(1024 - overhead));
    assert_eq!(frame.len(), 1024);
    ws.send(Message::text(frame)).await.unwrap();
    match recv(&mut ws).await {
        (ServerMessage::UserLookupResult(r), 32) => assert!(!r.found),
        other => panic!("expected UserLookupResult, got {other:?}"),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn server_indexes_sessions_in_supplied_registry() {
    let config = test_config();
    let store = Arc::new(MemoryStore::with_players(&config.players));
    let registry = Arc::new(SessionRegistry::new());
    let server = GameServer::with_registry(config, store, Arc::new(UltimateTicTacToe), registry.clone())
        .start()
        .await
        .unwrap();
    assert!(Arc::ptr_eq(server.registry(), &registry));

    let mut ws = connect(server.local_addr()).await;
    login(&mut ws, "alice").await;
    let handle = registry.lookup("p-alice").await.unwrap();
    assert!(handle.is_open());

    drop(ws);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(registry.lookup("p-alice").await.is_none());

    server.shutdown().await;
}
