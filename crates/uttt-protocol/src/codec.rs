//! JSON envelope codec and the request type registry.
//!
//! Inbound:  `{"messageType": <string>, "requestID": <int>, "payload": <object>}`
//! Outbound: `{"messageType": <string>, "payload": <object>, "requestID": <int>}`
//!
//! Inbound decoding is closed-world at every level: an undeclared field in
//! the envelope or in the payload is a malformed request.

use crate::error::{DecodeError, ProtocolError, ProtocolResult};
use crate::messages::*;
use crate::game::GameState;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `requestID` stamped on notifications that answer no client request.
pub const UNSOLICITED_REQUEST_ID: i64 = 0;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct IncomingEnvelope {
    #[serde(rename = "messageType")]
    message_type: String,
    #[serde(rename = "requestID")]
    request_id: i64,
    payload: Value,
}

#[derive(Debug, Serialize)]
struct OutgoingEnvelope<'a, P> {
    #[serde(rename = "messageType")]
    message_type: &'static str,
    payload: &'a P,
    #[serde(rename = "requestID")]
    request_id: i64,
}

#[derive(Debug, Deserialize)]
struct ReceivedEnvelope {
    #[serde(rename = "messageType")]
    message_type: String,
    payload: Value,
    #[serde(rename = "requestID")]
    request_id: i64,
}

/// Registry entry mapping a wire tag to the schema that decodes its payload.
pub struct RequestSchema {
    pub message_type: &'static str,
    decode: fn(Value) -> serde_json::Result<Request>,
}

impl RequestSchema {
    pub fn decode(&self, payload: Value) -> serde_json::Result<Request> {
        (self.decode)(payload)
    }
}

fn decode_payload<T>(payload: Value) -> serde_json::Result<Request>
where
    T: DeserializeOwned + Into<Request>,
{
    serde_json::from_value::<T>(payload).map(Into::into)
}

/// Every request type the server accepts. New request kinds are added here.
static REQUEST_REGISTRY: [RequestSchema; 4] = [
    RequestSchema {
        message_type: "LoginRequest",
        decode: decode_payload::<LoginRequest>,
    },
    RequestSchema {
        message_type: "NewGame",
        decode: decode_payload::<NewGameRequest>,
    },
    RequestSchema {
        message_type: "UserLookup",
        decode: decode_payload::<UserLookupRequest>,
    },
    RequestSchema {
        message_type: "PlayMove",
        decode: decode_payload::<PlayMoveRequest>,
    },
];

/// Look up the schema registered for a wire tag.
pub fn lookup_schema(message_type: &str) -> Option<&'static RequestSchema> {
    REQUEST_REGISTRY
        .iter()
        .find(|schema| schema.message_type == message_type)
}

/// Wire tags of all registered request types.
pub fn registered_types() -> impl Iterator<Item = &'static str> {
    REQUEST_REGISTRY.iter().map(|schema| schema.message_type)
}

/// A request together with the correlation id the peer attached to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRequest {
    pub request_id: i64,
    pub request: Request,
}

/// Decode one inbound frame into a typed request.
pub fn decode_request(frame: &[u8]) -> Result<DecodedRequest, DecodeError> {
    let envelope: IncomingEnvelope =
        serde_json::from_slice(frame).map_err(|source| DecodeError::Malformed {
            request_id: recover_request_id(frame),
            source,
        })?;

    let schema = lookup_schema(&envelope.message_type).ok_or_else(|| DecodeError::UnknownType {
        request_id: envelope.request_id,
        message_type: envelope.message_type.clone(),
    })?;

    let request = schema
        .decode(envelope.payload)
        .map_err(|source| DecodeError::Malformed {
            request_id: Some(envelope.request_id),
            source,
        })?;

    Ok(DecodedRequest {
        request_id: envelope.request_id,
        request,
    })
}

/// Best-effort extraction of `requestID` from a frame that failed strict decoding.
fn recover_request_id(frame: &[u8]) -> Option<i64> {
    serde_json::from_slice::<Value>(frame)
        .ok()?
        .get("requestID")?
        .as_i64()
}

/// Encode a server message, tagging it with `request_id`.
pub fn encode_message(message: &ServerMessage, request_id: i64) -> ProtocolResult<String> {
    let envelope = OutgoingEnvelope {
        message_type: message.message_type(),
        payload: message,
        request_id,
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Encode a client request (used by clients and tests).
pub fn encode_request(request: &Request, request_id: i64) -> ProtocolResult<String> {
    let envelope = OutgoingEnvelope {
        message_type: request.message_type(),
        payload: request,
        request_id,
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Decode a server message on the client side, returning it with its `requestID`.
pub fn decode_message(frame: &[u8]) -> ProtocolResult<(ServerMessage, i64)> {
    let envelope: ReceivedEnvelope = serde_json::from_slice(frame)?;
    let payload = envelope.payload;
    let message = match envelope.message_type.as_str() {
        "LoginSuccess" => ServerMessage::LoginSuccess(serde_json::from_value(payload)?),
        "ErrorMessage" => ServerMessage::ErrorMessage(serde_json::from_value(payload)?),
        "GameState" => ServerMessage::GameState(serde_json::from_value::<GameState>(payload)?),
        "UserLookupResult" => ServerMessage::UserLookupResult(serde_json::from_value(payload)?),
        "NewGameNotification" => {
            ServerMessage::NewGameNotification(serde_json::from_value(payload)?)
        }
        other => return Err(ProtocolError::UnknownType(other.to_string())),
    };
    Ok((message, envelope.request_id))
}
