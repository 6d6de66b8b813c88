//! Shared data structures used throughout the application.

use crate::errors::AppError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Health of the push connection as seen by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Socket opened, no server heartbeat yet.
    Connecting,
    /// Server heartbeat received.
    Connected,
    /// Push updates unavailable; poll the request layer instead.
    Degraded,
    /// Client disabled by the caller.
    Offline,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Degraded => "degraded",
            Self::Offline => "offline",
        }
    }

    /// True when consumers should refresh through the request layer rather
    /// than wait for pushes.
    pub fn should_poll(&self) -> bool {
        matches!(self, Self::Degraded | Self::Offline)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscription topic sent in the `subscribe` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Signals,
    Alerts,
}

impl Channel {
    pub fn all() -> Vec<Self> {
        vec![Self::Signals, Self::Alerts]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Signals => "signals",
            Self::Alerts => "alerts",
        }
    }
}

impl FromStr for Channel {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "signals" => Ok(Self::Signals),
            "alerts" => Ok(Self::Alerts),
            other => Err(AppError::Config(format!("unknown channel `{other}`"))),
        }
    }
}

/// Trading signal, carried exactly as the backend sent it. Only `id` is
/// interpreted, and only to dedup incremental pushes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signal(pub Value);

impl Signal {
    /// The record's `id`, if present and not null.
    pub fn id(&self) -> Option<&Value> {
        self.0.get("id").filter(|v| !v.is_null())
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

/// Risk alert. Opaque and replaced wholesale on every push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Alert(pub Value);

impl Alert {
    pub fn id(&self) -> Option<&Value> {
        self.0.get("id").filter(|v| !v.is_null())
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}
