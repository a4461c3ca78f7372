//! Request and response payloads.
//!
//! Every inbound payload is closed-world (`deny_unknown_fields`). The wire
//! tag of a message is derived from its variant by `message_type()`, never
//! from caller input.

use crate::game::{GameState, Move};
use serde::{Deserialize, Serialize};

// ── Requests (client → server) ──────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    #[serde(rename = "loginID")]
    pub login_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewGameRequest {
    /// Username of the player being challenged.
    pub opponent: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserLookupRequest {
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlayMoveRequest {
    #[serde(rename = "gameID")]
    pub game_id: String,
    #[serde(rename = "move")]
    pub mv: Move,
}

/// A decoded client request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Request {
    Login(LoginRequest),
    NewGame(NewGameRequest),
    UserLookup(UserLookupRequest),
    PlayMove(PlayMoveRequest),
}

impl Request {
    pub fn message_type(&self) -> &'static str {
        match self {
            Request::Login(_) => "LoginRequest",
            Request::NewGame(_) => "NewGame",
            Request::UserLookup(_) => "UserLookup",
            Request::PlayMove(_) => "PlayMove",
        }
    }
}

impl From<LoginRequest> for Request {
    fn from(r: LoginRequest) -> Self {
        Request::Login(r)
    }
}

impl From<NewGameRequest> for Request {
    fn from(r: NewGameRequest) -> Self {
        Request::NewGame(r)
    }
}

impl From<UserLookupRequest> for Request {
    fn from(r: UserLookupRequest) -> Self {
        Request::UserLookup(r)
    }
}

impl From<PlayMoveRequest> for Request {
    fn from(r: PlayMoveRequest) -> Self {
        Request::PlayMove(r)
    }
}

// ── Responses and notifications (server → client) ───────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginSuccess {
    pub username: String,
    #[serde(rename = "playerID")]
    pub player_id: String,
    /// The player's open games, oldest first.
    pub games: Vec<GameState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
    /// If false the server closes the connection after sending this message.
    pub recoverable: bool,
}

impl ErrorMessage {
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            recoverable: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            recoverable: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserLookupResult {
    pub username: String,
    pub found: bool,
    #[serde(rename = "playerID", default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGameNotification {
    #[serde(rename = "gameID")]
    pub game_id: String,
    /// Username of the other participant, from the recipient's point of view.
    pub opponent: String,
    pub game: GameState,
}

/// Any message the server sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ServerMessage {
    LoginSuccess(LoginSuccess),
    ErrorMessage(ErrorMessage),
    GameState(GameState),
    UserLookupResult(UserLookupResult),
    NewGameNotification(NewGameNotification),
}

impl ServerMessage {
    pub fn message_type(&self) -> &'static str {
        match self {
            ServerMessage::LoginSuccess(_) => "LoginSuccess",
            ServerMessage::ErrorMessage(_) => "ErrorMessage",
            ServerMessage::GameState(_) => "GameState",
            ServerMessage::UserLookupResult(_) => "UserLookupResult",
            ServerMessage::NewGameNotification(_) => "NewGameNotification",
        }
    }
}

impl From<ErrorMessage> for ServerMessage {
    fn from(e: ErrorMessage) -> Self {
        ServerMessage::ErrorMessage(e)
    }
}
