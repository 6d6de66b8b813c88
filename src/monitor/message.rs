//! Wire messages exchanged with the monitor push endpoint.
//!
//! Outbound frames share one envelope: `{"type", "payload", "timestamp"}`.
//! Inbound frames are decoded into a closed set of variants keyed by `type`;
//! anything unrecognized lands in [`ServerMessage::Unknown`].

use crate::errors::{AppError, Result};
use crate::models::{Alert, Channel, Signal};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Client-to-server messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Subscribe { channels: Vec<Channel> },
    /// Ask for a full snapshot of every subscribed channel.
    Resync,
    Ping,
    /// Ask the server to re-push deltas.
    Poll,
}

#[derive(Serialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: &'static str,
    payload: Value,
    timestamp: i64,
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Resync => "resync",
            Self::Ping => "ping",
            Self::Poll => "poll",
        }
    }

    fn payload(&self) -> Value {
        match self {
            Self::Subscribe { channels } => json!({ "channels": channels }),
            Self::Resync | Self::Ping | Self::Poll => json!({}),
        }
    }

    /// Serialize into a text frame stamped with `timestamp` (epoch millis).
    pub fn encode(&self, timestamp: i64) -> Result<String> {
        let envelope = Envelope {
            kind: self.kind(),
            payload: self.payload(),
            timestamp,
        };
        Ok(serde_json::to_string(&envelope)?)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UpdateFlags {
    #[serde(default)]
    pub snapshot: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Items<T> {
    #[serde(default)]
    pub items: Vec<T>,
}

impl<T> Default for Items<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

/// Server-to-client messages.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake confirmation; the connection is live.
    Heartbeat,
    /// Reply to a client ping. Carries nothing we act on yet.
    Pong,
    SignalsUpdate {
        #[serde(default)]
        payload: UpdateFlags,
        #[serde(default)]
        data: Items<Signal>,
    },
    AlertsUpdate {
        #[serde(default)]
        data: Items<Alert>,
    },
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    /// Decode one inbound text frame. Frames that are not JSON objects or lack
    /// a `type` are errors for the caller to drop. Items are kept as-is.
    pub fn decode(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Err(AppError::Other("inbound frame is not a JSON object".into()));
        }
        Ok(serde_json::from_value(value)?)
    }
}
