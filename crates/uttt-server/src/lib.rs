//! uttt-server: real-time session server for Ultimate Tic-Tac-Toe.
//!
//! Accepts WebSocket connections, authenticates players by login id, and
//! dispatches game requests against a [`store::Store`] and a
//! [`engine::GameEngine`]. Game creation and moves are pushed to the other
//! participant's live session by the [`hub::NotificationHub`].

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod hub;
pub mod server;
pub mod session;
pub mod store;
pub mod transport;

pub use config::ServerConfig;
pub use engine::{GameEngine, UltimateTicTacToe};
pub use error::{DispatchError, ServerError, ServerResult};
pub use server::{GameServer, ServerHandle};
pub use store::{MemoryStore, Store};
