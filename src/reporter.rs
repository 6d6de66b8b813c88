//! Status reporting for the monitor client's consumers.

use crate::models::{Alert, ConnectionState, Signal};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// What one reporter tick has to say.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    Healthy {
        state: ConnectionState,
        signals: usize,
        alerts: usize,
    },
    /// Push updates are unavailable; consumers should refresh via the API.
    Fallback { state: ConnectionState },
}

pub fn summarize(state: ConnectionState, signals: &[Signal], alerts: &[Alert]) -> Report {
    if state.should_poll() {
        Report::Fallback { state }
    } else {
        Report::Healthy {
            state,
            signals: signals.len(),
            alerts: alerts.len(),
        }
    }
}

/// Spawn the reporter loop: state transitions are logged as they happen, and
/// a summary is logged every `interval`. Stops once the client is gone.
pub fn spawn_status_reporter(
    mut state_rx: watch::Receiver<ConnectionState>,
    signals_rx: watch::Receiver<Vec<Signal>>,
    alerts_rx: watch::Receiver<Vec<Alert>>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        let mut ticks: u64 = 0;
        let mut last = *state_rx.borrow_and_update();

        loop {
            tokio::select! {
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        info!("[STATUS] monitor client gone; reporter stopping");
                        break;
                    }
                    let state = *state_rx.borrow_and_update();
                    if state != last {
                        info!(from = %last, to = %state, "[STATUS] connection state changed");
                        last = state;
                    }
                }
                _ = ticker.tick() => {
                    ticks += 1;
                    let report = summarize(
                        *state_rx.borrow(),
                        &signals_rx.borrow(),
                        &alerts_rx.borrow(),
                    );
                    match report {
                        Report::Healthy { state, signals, alerts } => {
                            info!(%state, signals, alerts, ticks, "[STATUS] push feed live");
                        }
                        Report::Fallback { state } => {
                            warn!(%state, ticks, "[FALLBACK] push updates unavailable; refresh through the API");
                        }
                    }
                }
            }
        }
    })
}
