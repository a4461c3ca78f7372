//! Persistence collaborator: players, games, and store-originated events.
//!
//! Methods return boxed `Send` futures so the trait stays object safe and a
//! single `Arc<dyn Store>` can be shared by every connection task.

pub mod memory;

pub use memory::MemoryStore;

use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::broadcast;
use uttt_protocol::GameState;

/// A registered player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub player_id: String,
    pub username: String,
}

/// Business-rule and backend failures reported by a [`Store`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("unknown login id")]
    UnknownLogin,

    #[error("no user named {0:?}")]
    UnknownUser(String),

    #[error("you cannot start a game against yourself")]
    SelfChallenge,

    #[error("game {0} not found")]
    GameNotFound(String),

    #[error("game {0} changed concurrently, reload and retry")]
    Conflict(String),

    #[error("store backend failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
pub type StoreFuture<'a, T> = BoxFuture<'a, StoreResult<T>>;

/// Events the store emits after a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    GameCreated {
        game: GameState,
        x_player: Player,
        o_player: Player,
    },
    MoveRecorded {
        game: GameState,
        /// Player id of the participant who made the move.
        mover: String,
    },
}

pub trait Store: Send + Sync {
    /// Resolve a login id to the player it belongs to.
    fn authenticate_login<'a>(&'a self, login_id: &'a str) -> StoreFuture<'a, Player>;

    fn lookup_user<'a>(&'a self, username: &'a str) -> StoreFuture<'a, Option<Player>>;

    /// Create a game between `challenger` and the player named `opponent`.
    fn create_game<'a>(&'a self, challenger: &'a Player, opponent: &'a str) -> StoreFuture<'a, GameState>;

    fn load_game<'a>(&'a self, game_id: &'a str) -> StoreFuture<'a, Option<GameState>>;

    /// Persist `next`, which must follow the stored state by exactly one move.
    fn record_move<'a>(&'a self, next: &'a GameState, mover: &'a str) -> StoreFuture<'a, ()>;

    /// Games in progress involving `player_id`, oldest first.
    fn list_open_games<'a>(&'a self, player_id: &'a str) -> StoreFuture<'a, Vec<GameState>>;

    /// Subscribe to events emitted after successful writes.
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}
