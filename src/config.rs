//! Configuration loader and application settings.

use crate::errors::{AppError, Result};
use crate::models::Channel;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(15_000);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5_000);
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Options for one monitor client instance. Fixed for the client's lifetime;
/// changing them means disposing the client and spawning a new one.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// When false the client stays `offline` and never opens a socket.
    pub enabled: bool,
    /// Channels sent in the `subscribe` message.
    pub channels: Vec<Channel>,
    /// Period of client `ping` messages once the socket is open.
    pub heartbeat_interval: Duration,
    /// Period of client `poll` messages once the socket is open.
    pub poll_interval: Duration,
    /// Failed attempts tolerated before the client pins itself `degraded`.
    pub max_reconnect_attempts: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channels: Channel::all(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl MonitorConfig {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_channels(mut self, channels: Vec<Channel>) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }
}

/// Consolidated settings for the `monitor-feed` binary.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// HTTP(S) origin of the backend API; the socket URL is derived from it.
    pub base_url: String,
    pub monitor: MonitorConfig,
    /// How often the status reporter logs.
    pub report_interval: Duration,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup; unset keys take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let base_url = lookup("MONITOR_BASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| AppError::Config("Set MONITOR_BASE_URL to the backend origin".into()))?;

        let defaults = MonitorConfig::default();
        let enabled = value_or(&lookup, "MONITOR_ENABLED", defaults.enabled)?;
        let channels = match lookup("MONITOR_CHANNELS") {
            Some(raw) => parse_channels(&raw)?,
            None => defaults.channels,
        };
        let heartbeat_ms = value_or(
            &lookup,
            "MONITOR_HEARTBEAT_MS",
            defaults.heartbeat_interval.as_millis() as u64,
        )?;
        let poll_ms = value_or(
            &lookup,
            "MONITOR_POLL_MS",
            defaults.poll_interval.as_millis() as u64,
        )?;
        let max_reconnect_attempts = value_or(
            &lookup,
            "MONITOR_MAX_RECONNECTS",
            defaults.max_reconnect_attempts,
        )?;
        let report_secs: u64 = value_or(&lookup, "MONITOR_REPORT_SECS", 5)?;

        Ok(Self {
            base_url,
            monitor: MonitorConfig {
                enabled,
                channels,
                heartbeat_interval: Duration::from_millis(heartbeat_ms),
                poll_interval: Duration::from_millis(poll_ms),
                max_reconnect_attempts,
            },
            report_interval: Duration::from_secs(report_secs.max(1)),
        })
    }
}

/// Parse a comma separated channel list, e.g. "signals,alerts".
pub fn parse_channels(raw: &str) -> Result<Vec<Channel>> {
    let mut channels = Vec::new();
    for part in raw.split(',').filter(|p| !p.trim().is_empty()) {
        let channel = Channel::from_str(part)?;
        if !channels.contains(&channel) {
            channels.push(channel);
        }
    }
    if channels.is_empty() {
        return Err(AppError::Config("channel list is empty".into()));
    }
    Ok(channels)
}

fn value_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value `{raw}`"))),
        None => Ok(default),
    }
}
