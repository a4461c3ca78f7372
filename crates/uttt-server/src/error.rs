use crate::engine::IllegalMove;
use crate::store::StoreError;
use thiserror::Error;
use tracing::error;
use uttt_protocol::ProtocolError;

/// Errors that end a connection or stop the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("config error: {0}")]
    Config(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// A request that could not be serviced. Always reported to the peer as a
/// recoverable `ErrorMessage`; the session stays open.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("not authenticated")]
    NotAuthenticated,

    #[error("already logged in")]
    AlreadyAuthenticated,

    #[error("player is already connected from another session")]
    DuplicateLogin,

    #[error("you are not a participant in game {0}")]
    NotParticipant(String),

    #[error("illegal move: {0}")]
    IllegalMove(#[from] IllegalMove),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DispatchError {
    /// Text sent to the peer. Backend failures are logged here and reported generically.
    pub fn client_message(&self) -> String {
        match self {
            DispatchError::Store(StoreError::Backend(detail)) => {
                error!(error = %detail, "store backend failure");
                "internal server error, try again later".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Whether the failure is an authorization problem rather than a business rule.
    pub fn is_authorization(&self) -> bool {
        matches!(
            self,
            DispatchError::NotAuthenticated | DispatchError::NotParticipant(_)
        )
    }
}
