//! Pure update rules for the pushed collections and the reconnect schedule.

use crate::models::{Alert, Signal};
use std::collections::HashSet;
use std::time::Duration;

pub const BASE_BACKOFF_MS: u64 = 500;
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Apply one signals push. A snapshot replaces the collection; an incremental
/// push appends only items whose `id` is not already present, in arrival order.
/// Ids compare as JSON values; items without an id are always appended.
pub fn merge_signals(current: &[Signal], incoming: Vec<Signal>, snapshot: bool) -> Vec<Signal> {
    if snapshot {
        return incoming;
    }
    // compact JSON text is a stable key: serde_json maps keep sorted keys
    let mut seen: HashSet<String> = current.iter().filter_map(id_key).collect();
    let mut next = current.to_vec();
    for signal in incoming {
        match id_key(&signal) {
            Some(key) if !seen.insert(key.clone()) => {}
            _ => next.push(signal),
        }
    }
    next
}

fn id_key(signal: &Signal) -> Option<String> {
    signal.id().map(|id| id.to_string())
}

/// Apply one alerts push. Always a full replace.
pub fn replace_alerts(_current: &[Alert], incoming: Vec<Alert>) -> Vec<Alert> {
    incoming
}

/// Delay before reconnect attempt number `attempt` (1-based):
/// `min(30s, 500ms * 2^(attempt - 1))`.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let ms = BASE_BACKOFF_MS.saturating_mul(1u64 << exp).min(MAX_BACKOFF_MS);
    Duration::from_millis(ms)
}
