use thiserror::Error;

/// Errors produced while encoding or decoding uttt protocol messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("unknown message type: {0}")]
    UnknownType(String),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Classification of an inbound frame that could not be turned into a request.
///
/// Schema-specific detail stays in `source` for logging; only the variant
/// reaches the wire.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Unparsable frame, missing field, or a field the schema does not declare.
    #[error("malformed request")]
    Malformed {
        /// Correlation id recovered from the frame, if any.
        request_id: Option<i64>,
        #[source]
        source: serde_json::Error,
    },

    /// Well-formed envelope whose `messageType` has no registry entry.
    #[error("unknown message type {message_type:?}")]
    UnknownType {
        request_id: i64,
        message_type: String,
    },
}

impl DecodeError {
    /// Correlation id to echo in the error response, if the frame carried one.
    pub fn request_id(&self) -> Option<i64> {
        match self {
            DecodeError::Malformed { request_id, .. } => *request_id,
            DecodeError::UnknownType { request_id, .. } => Some(*request_id),
        }
    }

    /// Whether the connection must be closed after reporting this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DecodeError::Malformed { .. })
    }
}
