//! Request handlers for authenticated (and authenticating) sessions.
//!
//! The dispatcher owns no per-connection state; everything it needs about
//! the caller is passed in. Business failures come back as [`DispatchError`]
//! and are always recoverable.

use crate::engine::GameEngine;
use crate::error::DispatchError;
use crate::session::registry::{RegistryError, SessionHandle, SessionRegistry};
use crate::session::Notification;
use crate::store::{Player, Store};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uttt_protocol::messages::{
    LoginRequest, NewGameRequest, PlayMoveRequest, UserLookupRequest, UserLookupResult,
};
use uttt_protocol::GameState;

/// What a session needs to hand over so the dispatcher can register it on login.
pub struct SessionBinding {
    pub session_id: u64,
    pub sender: mpsc::Sender<Notification>,
    pub cancel: CancellationToken,
}

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub player: Player,
    /// Open games, oldest first.
    pub games: Vec<GameState>,
}

pub struct Dispatcher {
    store: Arc<dyn Store>,
    engine: Arc<dyn GameEngine>,
    registry: Arc<SessionRegistry>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        engine: Arc<dyn GameEngine>,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            store,
            engine,
            registry,
        }
    }

    /// Resolve the login id, bind the session to the player, and list their open games.
    ///
    /// On any failure the session is left unbound.
    pub async fn login(
        &self,
        request: &LoginRequest,
        binding: SessionBinding,
    ) -> Result<LoginOutcome, DispatchError> {
        let player = self.store.authenticate_login(&request.login_id).await?;

        let handle = SessionHandle::new(
            binding.session_id,
            player.player_id.clone(),
            player.username.clone(),
            binding.sender,
            binding.cancel,
        );
        if let Err(RegistryError::AlreadyConnected { session_id, .. }) =
            self.registry.register(handle).await
        {
            warn!(
                player_id = %player.player_id,
                existing_session = session_id,
                "duplicate login rejected"
            );
            return Err(DispatchError::DuplicateLogin);
        }

        // Registered before listing so a game created in between is either
        // listed or notified; the session drops the duplicate.
        let games = match self.store.list_open_games(&player.player_id).await {
            Ok(games) => games,
            Err(e) => {
                self.registry
                    .deregister(&player.player_id, binding.session_id)
                    .await;
                return Err(e.into());
            }
        };

        info!(
            player_id = %player.player_id,
            session_id = binding.session_id,
            open_games = games.len(),
            "login succeeded"
        );
        Ok(LoginOutcome { player, games })
    }

    /// Drop the registry entry for a session that is going away.
    pub async fn logout(&self, player: &Player, session_id: u64) {
        self.registry.deregister(&player.player_id, session_id).await;
    }

    /// Create a game against the named opponent. Participants learn about it
    /// through the notification hub, not through a direct reply.
    pub async fn new_game(
        &self,
        player: &Player,
        request: &NewGameRequest,
    ) -> Result<GameState, DispatchError> {
        let game = self.store.create_game(player, &request.opponent).await?;
        debug!(
            game_id = %game.game_id,
            challenger = %player.player_id,
            opponent = %request.opponent,
            "new game requested"
        );
        Ok(game)
    }

    pub async fn lookup_user(
        &self,
        request: &UserLookupRequest,
    ) -> Result<UserLookupResult, DispatchError> {
        let found = self.store.lookup_user(&request.username).await?;
        Ok(UserLookupResult {
            username: request.username.clone(),
            found: found.is_some(),
            player_id: found.map(|p| p.player_id),
        })
    }

    /// Check participation, apply the move through the engine, and record it.
    pub async fn play_move(
        &self,
        player: &Player,
        request: &PlayMoveRequest,
    ) -> Result<GameState, DispatchError> {
        let not_participant = || DispatchError::NotParticipant(request.game_id.clone());

        let state = self
            .store
            .load_game(&request.game_id)
            .await?
            .ok_or_else(not_participant)?;
        let mark = state.mark_of(&player.player_id).ok_or_else(not_participant)?;

        let next = self.engine.apply_move(&state, mark, request.mv)?;
        self.store.record_move(&next, &player.player_id).await?;

        debug!(
            game_id = %next.game_id,
            player_id = %player.player_id,
            board = request.mv.board,
            square = request.mv.square,
            move_count = next.move_count,
            "move recorded"
        );
        Ok(next)
    }
}
