//! Connection state machine.
//!
//! The machine owns the connection state, the reconnect counter and both
//! pushed collections. It never touches sockets or timers itself: every input
//! arrives as an [`Event`] and every side effect leaves as a [`Command`] for
//! the driver to execute. Each connection attempt gets a fresh generation;
//! events carrying an older generation are dropped.

use crate::config::MonitorConfig;
use crate::models::{Alert, ConnectionState, Signal};
use crate::monitor::message::{ClientMessage, ServerMessage};
use crate::monitor::reducer::{backoff_delay, merge_signals, replace_alerts};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Inputs produced by socket tasks and timers.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    SocketOpened { generation: u64 },
    Frame { generation: u64, text: String },
    /// Socket error or close; both are handled the same way.
    SocketFailed { generation: u64, reason: String },
    HeartbeatTick { generation: u64 },
    PollTick { generation: u64 },
    ReconnectDue { generation: u64 },
}

impl Event {
    pub fn generation(&self) -> u64 {
        match self {
            Self::SocketOpened { generation }
            | Self::Frame { generation, .. }
            | Self::SocketFailed { generation, .. }
            | Self::HeartbeatTick { generation }
            | Self::PollTick { generation }
            | Self::ReconnectDue { generation } => *generation,
        }
    }
}

/// Side effects requested from the driver, executed in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Abort the heartbeat and poll timers.
    StopTimers,
    /// Abort a pending reconnect timer.
    CancelReconnect,
    /// Drop the current socket without reporting a failure.
    CloseSocket,
    Open { generation: u64 },
    Send(ClientMessage),
    StartTimers { generation: u64 },
    ScheduleReconnect { generation: u64, delay: Duration },
}

#[derive(Debug)]
pub struct Machine {
    config: MonitorConfig,
    state: ConnectionState,
    attempts: u32,
    generation: u64,
    active: bool,
    opened: bool,
    failed: bool,
    timers_running: bool,
    exhausted: bool,
    signals: Vec<Signal>,
    alerts: Vec<Alert>,
    signals_dirty: bool,
    alerts_dirty: bool,
}

impl Machine {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Offline,
            attempts: 0,
            generation: 0,
            active: true,
            opened: false,
            failed: false,
            timers_running: false,
            exhausted: false,
            signals: Vec::new(),
            alerts: Vec::new(),
            signals_dirty: false,
            alerts_dirty: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// True once the reconnect budget is spent; the state stays `degraded`.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    /// The signal collection, if it changed since the last call.
    pub fn take_signals(&mut self) -> Option<Vec<Signal>> {
        std::mem::take(&mut self.signals_dirty).then(|| self.signals.clone())
    }

    /// The alert collection, if it changed since the last call.
    pub fn take_alerts(&mut self) -> Option<Vec<Alert>> {
        std::mem::take(&mut self.alerts_dirty).then(|| self.alerts.clone())
    }

    /// Activate the client. `sockets_supported` is false when the host cannot
    /// open sockets at all.
    pub fn start(&mut self, sockets_supported: bool) -> Vec<Command> {
        if !self.config.enabled {
            self.state = ConnectionState::Offline;
            info!("[MONITOR] disabled; staying offline");
            return Vec::new();
        }
        if !sockets_supported {
            self.state = ConnectionState::Degraded;
            warn!("[MONITOR] sockets unavailable; degraded from the start");
            return Vec::new();
        }
        self.state = ConnectionState::Connecting;
        self.begin_attempt()
    }

    pub fn handle(&mut self, event: Event) -> Vec<Command> {
        if !self.active || event.generation() != self.generation {
            trace!(
                event_generation = event.generation(),
                generation = self.generation,
                "[MONITOR] dropping stale event"
            );
            return Vec::new();
        }
        match event {
            Event::SocketOpened { generation } => self.on_open(generation),
            Event::Frame { text, .. } => {
                self.on_frame(&text);
                Vec::new()
            }
            Event::SocketFailed { generation, reason } => self.on_failure(generation, &reason),
            Event::HeartbeatTick { .. } if self.timers_running => {
                vec![Command::Send(ClientMessage::Ping)]
            }
            Event::PollTick { .. } if self.timers_running => {
                vec![Command::Send(ClientMessage::Poll)]
            }
            Event::HeartbeatTick { .. } | Event::PollTick { .. } => Vec::new(),
            Event::ReconnectDue { .. } => {
                if self.exhausted || !self.failed {
                    return Vec::new();
                }
                self.begin_attempt()
            }
        }
    }

    /// Tear down: every timer is cleared and the socket closed; later events
    /// are ignored. Calling it twice is a no-op.
    pub fn dispose(&mut self) -> Vec<Command> {
        if !self.active {
            return Vec::new();
        }
        self.active = false;
        self.timers_running = false;
        info!(generation = self.generation, "[MONITOR] disposed");
        vec![
            Command::StopTimers,
            Command::CancelReconnect,
            Command::CloseSocket,
        ]
    }

    fn begin_attempt(&mut self) -> Vec<Command> {
        self.generation += 1;
        self.opened = false;
        self.failed = false;
        self.timers_running = false;
        // mid-backoff attempts keep showing `degraded`
        if self.state != ConnectionState::Degraded {
            self.state = ConnectionState::Connecting;
        }
        info!(
            generation = self.generation,
            attempt = self.attempts,
            state = %self.state,
            "[MONITOR] opening socket"
        );
        vec![
            Command::StopTimers,
            Command::CancelReconnect,
            Command::CloseSocket,
            Command::Open {
                generation: self.generation,
            },
        ]
    }

    fn on_open(&mut self, generation: u64) -> Vec<Command> {
        if self.opened || self.failed {
            return Vec::new();
        }
        self.opened = true;
        self.timers_running = true;
        info!(generation, "[MONITOR] socket open; subscribing");
        vec![
            Command::Send(ClientMessage::Subscribe {
                channels: self.config.channels.clone(),
            }),
            Command::Send(ClientMessage::Resync),
            Command::StartTimers { generation },
        ]
    }

    fn on_frame(&mut self, text: &str) {
        if self.failed {
            return;
        }
        let message = match ServerMessage::decode(text) {
            Ok(m) => m,
            Err(e) => {
                debug!(error = %e, "[MONITOR] dropping malformed frame");
                return;
            }
        };
        match message {
            ServerMessage::Heartbeat => {
                if self.state != ConnectionState::Connected {
                    info!(generation = self.generation, "[MONITOR] connected");
                }
                self.state = ConnectionState::Connected;
                self.attempts = 0;
            }
            ServerMessage::Pong => {}
            ServerMessage::SignalsUpdate { payload, data } => {
                self.signals = merge_signals(&self.signals, data.items, payload.snapshot);
                self.signals_dirty = true;
            }
            ServerMessage::AlertsUpdate { data } => {
                self.alerts = replace_alerts(&self.alerts, data.items);
                self.alerts_dirty = true;
            }
            ServerMessage::Unknown => {
                debug!("[MONITOR] ignoring unrecognized message type");
            }
        }
    }

    fn on_failure(&mut self, generation: u64, reason: &str) -> Vec<Command> {
        if self.failed {
            return Vec::new();
        }
        self.failed = true;
        self.timers_running = false;
        self.state = ConnectionState::Degraded;
        self.attempts = self.attempts.saturating_add(1);

        if self.attempts > self.config.max_reconnect_attempts {
            self.exhausted = true;
            warn!(
                generation,
                attempts = self.attempts,
                reason,
                "[MONITOR] reconnect attempts exhausted; staying degraded"
            );
            return vec![Command::StopTimers, Command::CloseSocket];
        }

        let delay = backoff_delay(self.attempts);
        info!(
            generation,
            attempt = self.attempts,
            delay_ms = delay.as_millis() as u64,
            reason,
            "[MONITOR] connection lost; reconnect scheduled"
        );
        vec![
            Command::StopTimers,
            Command::CloseSocket,
            Command::ScheduleReconnect { generation, delay },
        ]
    }
}
