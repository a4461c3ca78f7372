//! Per-connection session state machine.
//!
//! `Unauthenticated → Authenticated → Closed`, with `Closed` reachable from
//! either state. The session is transport-agnostic: the connection task feeds
//! it inbound frames one at a time and writes whatever [`Reply`] it returns,
//! tagged with the reply's own `request_id`. Notifications go through
//! [`ConnectionSession::accept_notification`] and are written unsolicited.

use super::Notification;
use crate::dispatch::{Dispatcher, SessionBinding};
use crate::error::DispatchError;
use crate::store::Player;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uttt_protocol::messages::{ErrorMessage, LoginSuccess};
use uttt_protocol::{decode_request, DecodeError, Request, ServerMessage, UNSOLICITED_REQUEST_ID};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated(Player),
    Closed,
}

/// What to send back for one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub message: Option<ServerMessage>,
    /// Correlation id of the request this reply answers.
    pub request_id: i64,
    /// Close the connection after sending `message`.
    pub close: bool,
}

impl Reply {
    fn respond(message: ServerMessage, request_id: i64) -> Self {
        Self {
            message: Some(message),
            request_id,
            close: false,
        }
    }

    fn silent(request_id: i64) -> Self {
        Self {
            message: None,
            request_id,
            close: false,
        }
    }

    fn fatal(message: &str, request_id: i64) -> Self {
        Self {
            message: Some(ErrorMessage::fatal(message).into()),
            request_id,
            close: true,
        }
    }
}

pub struct ConnectionSession {
    session_id: u64,
    state: SessionState,
    /// Games the peer has already been told about, in the order learned.
    known_games: Vec<String>,
    last_request_id: i64,
    dispatcher: Arc<Dispatcher>,
    notify_tx: mpsc::Sender<Notification>,
    cancel: CancellationToken,
    request_logs: bool,
}

impl ConnectionSession {
    pub fn new(
        session_id: u64,
        dispatcher: Arc<Dispatcher>,
        notify_tx: mpsc::Sender<Notification>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session_id,
            state: SessionState::Unauthenticated,
            known_games: Vec::new(),
            last_request_id: UNSOLICITED_REQUEST_ID,
            dispatcher,
            notify_tx,
            cancel,
            request_logs: false,
        }
    }

    /// Log every decoded request at `info` instead of `debug`.
    pub fn with_request_logs(mut self, enabled: bool) -> Self {
        self.request_logs = enabled;
        self
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn player(&self) -> Option<&Player> {
        match &self.state {
            SessionState::Authenticated(player) => Some(player),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    pub fn last_request_id(&self) -> i64 {
        self.last_request_id
    }

    /// Decode and service one inbound frame.
    pub async fn handle_frame(&mut self, frame: &[u8]) -> Reply {
        if self.is_closed() {
            return Reply {
                message: None,
                request_id: UNSOLICITED_REQUEST_ID,
                close: true,
            };
        }

        let decoded = match decode_request(frame) {
            Ok(decoded) => decoded,
            Err(err @ DecodeError::Malformed { .. }) => {
                warn!(session_id = self.session_id, error = ?err, "malformed request");
                return self.malformed(err.request_id());
            }
            Err(DecodeError::UnknownType {
                request_id,
                message_type,
            }) => {
                self.last_request_id = request_id;
                debug!(session_id = self.session_id, %message_type, "unknown message type");
                return Reply::respond(
                    ErrorMessage::recoverable(format!("invalid request type {message_type:?}"))
                        .into(),
                    request_id,
                );
            }
        };

        let request_id = decoded.request_id;
        self.last_request_id = request_id;
        if self.request_logs {
            info!(
                session_id = self.session_id,
                request_id,
                message_type = decoded.request.message_type(),
                "request"
            );
        } else {
            debug!(
                session_id = self.session_id,
                request_id,
                message_type = decoded.request.message_type(),
                "request"
            );
        }

        match self.dispatch(decoded.request).await {
            Ok(Some(message)) => Reply::respond(message, request_id),
            Ok(None) => Reply::silent(request_id),
            Err(err) => {
                debug!(
                    session_id = self.session_id,
                    request_id,
                    authorization = err.is_authorization(),
                    error = %err,
                    "request failed"
                );
                Reply::respond(
                    ErrorMessage::recoverable(err.client_message()).into(),
                    request_id,
                )
            }
        }
    }

    /// Report a protocol-integrity violation and move to `Closed`.
    ///
    /// Also used by the transport for frames it refuses before decoding.
    pub fn malformed(&mut self, request_id: Option<i64>) -> Reply {
        self.state = SessionState::Closed;
        if let Some(request_id) = request_id {
            self.last_request_id = request_id;
        }
        Reply::fatal(
            "malformed request",
            request_id.unwrap_or(UNSOLICITED_REQUEST_ID),
        )
    }

    async fn dispatch(&mut self, request: Request) -> Result<Option<ServerMessage>, DispatchError> {
        let player = match (&self.state, &request) {
            (SessionState::Unauthenticated, Request::Login(login)) => {
                let binding = SessionBinding {
                    session_id: self.session_id,
                    sender: self.notify_tx.clone(),
                    cancel: self.cancel.clone(),
                };
                let outcome = self.dispatcher.login(login, binding).await?;
                self.known_games = outcome.games.iter().map(|g| g.game_id.clone()).collect();
                self.state = SessionState::Authenticated(outcome.player.clone());
                return Ok(Some(ServerMessage::LoginSuccess(LoginSuccess {
                    username: outcome.player.username,
                    player_id: outcome.player.player_id,
                    games: outcome.games,
                })));
            }
            (SessionState::Unauthenticated, _) => return Err(DispatchError::NotAuthenticated),
            (SessionState::Authenticated(_), Request::Login(_)) => {
                return Err(DispatchError::AlreadyAuthenticated)
            }
            (SessionState::Authenticated(player), _) => player.clone(),
            (SessionState::Closed, _) => return Err(DispatchError::NotAuthenticated),
        };

        match request {
            Request::NewGame(r) => {
                self.dispatcher.new_game(&player, &r).await?;
                Ok(None)
            }
            Request::UserLookup(r) => Ok(Some(ServerMessage::UserLookupResult(
                self.dispatcher.lookup_user(&r).await?,
            ))),
            Request::PlayMove(r) => Ok(Some(ServerMessage::GameState(
                self.dispatcher.play_move(&player, &r).await?,
            ))),
            Request::Login(_) => Err(DispatchError::AlreadyAuthenticated),
        }
    }

    /// Turn a hub notification into an outbound message, or `None` if it must
    /// not be sent. Each new game is announced at most once per session.
    pub fn accept_notification(&mut self, notification: Notification) -> Option<ServerMessage> {
        if !matches!(self.state, SessionState::Authenticated(_)) {
            return None;
        }
        match notification {
            Notification::NewGame(n) => {
                if self.known_games.contains(&n.game_id) {
                    debug!(session_id = self.session_id, game_id = %n.game_id, "duplicate new-game notification dropped");
                    return None;
                }
                self.known_games.push(n.game_id.clone());
                Some(ServerMessage::NewGameNotification(n))
            }
            Notification::GameUpdate(game) => Some(ServerMessage::GameState(game)),
        }
    }

    /// Tear the session down: deregister it and cancel its scoped work.
    pub async fn close(&mut self) {
        if let SessionState::Authenticated(player) = &self.state {
            self.dispatcher.logout(player, self.session_id).await;
        }
        self.cancel.cancel();
        if !self.is_closed() {
            debug!(
                session_id = self.session_id,
                last_request_id = self.last_request_id,
                "session closed"
            );
        }
        self.state = SessionState::Closed;
    }
}
