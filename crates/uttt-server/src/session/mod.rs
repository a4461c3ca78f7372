//! Connection sessions and the registry that indexes them.

pub mod connection;
pub mod registry;

pub use connection::{ConnectionSession, Reply, SessionState};
pub use registry::{DeliveryError, SessionHandle, SessionRegistry};

use uttt_protocol::messages::NewGameNotification;
use uttt_protocol::GameState;

/// Unsolicited work pushed to a session by the notification hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    NewGame(NewGameNotification),
    /// The other participant moved.
    GameUpdate(GameState),
}
