//! Wire envelope for the JSON message protocol.
//!
//! Keepalive tokens travel outside the JSON protocol as literal text frames
//! and are filtered before any parsing happens.

use serde::{Deserialize, Serialize};
use sonic_rs::Value;

use super::types::{WebSocketError, WebSocketResult};

/// Literal keepalive probe sent periodically while the connection is open.
pub const PING_TOKEN: &str = "ping";

/// Literal keepalive reply, recognized and discarded before JSON parsing.
pub const PONG_TOKEN: &str = "pong";

/// Reserved id marking an unsolicited/broadcast message.
pub const BROADCAST_ID: &str = "@";

/// Outbound request envelope: `{id, action, payload?}`.
#[derive(Debug, Clone, Serialize)]
pub struct RequestEnvelope {
    pub id: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl RequestEnvelope {
    pub fn new(id: String, action: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            id,
            action: action.into(),
            payload,
        }
    }
}

/// Inbound envelope: `{id?, data?, error?}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Routing decision for a decoded inbound envelope.
#[derive(Debug)]
pub enum InboundRoute {
    /// No id (or the broadcast sentinel): deliver to the `message` event.
    Broadcast(Value),
    /// Correlated reply for a pending request.
    Response {
        id: String,
        result: WebSocketResult<Value>,
    },
}

/// True when the payload is the literal keepalive reply token.
#[inline]
pub fn is_keepalive_reply(bytes: &[u8]) -> bool {
    bytes == PONG_TOKEN.as_bytes()
}

/// Decode an inbound payload and classify it as broadcast or response.
pub fn route_inbound(bytes: &[u8]) -> WebSocketResult<InboundRoute> {
    let envelope: ResponseEnvelope =
        sonic_rs::from_slice(bytes).map_err(|err| WebSocketError::ParseFailed(err.to_string()))?;

    let ResponseEnvelope { id, data, error } = envelope;
    match id {
        None => Ok(InboundRoute::Broadcast(data.unwrap_or_default())),
        Some(id) if id == BROADCAST_ID => Ok(InboundRoute::Broadcast(data.unwrap_or_default())),
        Some(id) => {
            let result = match error {
                Some(message) => Err(WebSocketError::ServerError { message, data }),
                None => Ok(data.unwrap_or_default()),
            };
            Ok(InboundRoute::Response { id, result })
        }
    }
}
