//! uttt-protocol: wire protocol for the uttt game server.
//!
//! Provides the JSON envelope codec, the static request type registry,
//! request/response payload types, and the game data those payloads carry.

pub mod codec;
pub mod error;
pub mod game;
pub mod messages;

// Re-export commonly used items at crate root.
pub use codec::{
    decode_message, decode_request, encode_message, encode_request, DecodedRequest,
    UNSOLICITED_REQUEST_ID,
};
pub use error::{DecodeError, ProtocolError, ProtocolResult};
pub use game::{GameState, GameStatus, Mark, Move};
pub use messages::{Request, ServerMessage};
