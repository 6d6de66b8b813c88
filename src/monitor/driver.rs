//! Tokio side of the monitor client.
//!
//! One driver task owns the [`Machine`] and receives every event through a
//! single queue, so handling is serialized. Each connection attempt runs in
//! its own socket task; heartbeat, poll and reconnect timers are spawned tasks
//! whose handles the driver aborts when the machine says so.

use crate::config::MonitorConfig;
use crate::models::{Alert, ConnectionState, Signal};
use crate::monitor::endpoint::socket_url;
use crate::monitor::machine::{Command, Event, Machine};
use crate::monitor::message::ClientMessage;
use crate::monitor::transport::{Socket, Transport};
use crate::utils::now_millis;
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Live views handed to consumers.
pub(crate) struct Publisher {
    pub state: watch::Sender<ConnectionState>,
    pub signals: watch::Sender<Vec<Signal>>,
    pub alerts: watch::Sender<Vec<Alert>>,
}

struct SocketHandle {
    generation: u64,
    outbound: mpsc::UnboundedSender<String>,
}

pub(crate) struct Driver<T: Transport> {
    machine: Machine,
    transport: T,
    heartbeat_interval: Duration,
    poll_interval: Duration,
    events: mpsc::UnboundedSender<Event>,
    socket: Option<SocketHandle>,
    heartbeat: Option<JoinHandle<()>>,
    poll: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    publisher: Publisher,
}

impl<T: Transport> Driver<T> {
    pub fn new(
        machine: Machine,
        transport: T,
        config: &MonitorConfig,
        events: mpsc::UnboundedSender<Event>,
        publisher: Publisher,
    ) -> Self {
        Self {
            machine,
            transport,
            heartbeat_interval: config.heartbeat_interval,
            poll_interval: config.poll_interval,
            events,
            socket: None,
            heartbeat: None,
            poll: None,
            reconnect: None,
            publisher,
        }
    }

    /// Run until `shutdown` fires or its sender is dropped, then tear down.
    pub async fn run(
        mut self,
        initial: Vec<Command>,
        mut events_rx: mpsc::UnboundedReceiver<Event>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        self.execute(initial);
        self.publish();

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                Some(event) = events_rx.recv() => {
                    let commands = self.machine.handle(event);
                    self.execute(commands);
                    self.publish();
                }
            }
        }

        let commands = self.machine.dispose();
        self.execute(commands);
    }

    fn execute(&mut self, commands: Vec<Command>) {
        for command in commands {
            match command {
                Command::StopTimers => {
                    abort(&mut self.heartbeat);
                    abort(&mut self.poll);
                }
                Command::CancelReconnect => abort(&mut self.reconnect),
                Command::CloseSocket => {
                    // dropping the outbound queue makes the socket task close quietly
                    if let Some(socket) = self.socket.take() {
                        debug!(generation = socket.generation, "[MONITOR] closing socket");
                    }
                }
                Command::Open { generation } => self.open(generation),
                Command::Send(message) => self.send(&message),
                Command::StartTimers { generation } => {
                    self.heartbeat = Some(spawn_ticker(
                        self.heartbeat_interval,
                        self.events.clone(),
                        Event::HeartbeatTick { generation },
                    ));
                    self.poll = Some(spawn_ticker(
                        self.poll_interval,
                        self.events.clone(),
                        Event::PollTick { generation },
                    ));
                }
                Command::ScheduleReconnect { generation, delay } => {
                    abort(&mut self.reconnect);
                    let events = self.events.clone();
                    self.reconnect = Some(tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = events.send(Event::ReconnectDue { generation });
                    }));
                }
            }
        }
    }

    fn open(&mut self, generation: u64) {
        let url = match socket_url(&self.transport.base_url()) {
            Ok(url) => url,
            Err(e) => {
                warn!(generation, error = %e, "[MONITOR] cannot derive socket url");
                let _ = self.events.send(Event::SocketFailed {
                    generation,
                    reason: e.to_string(),
                });
                return;
            }
        };
        debug!(generation, %url, "[MONITOR] connecting");
        let connecting = self.transport.connect(url);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_socket(
            generation,
            connecting,
            outbound_rx,
            self.events.clone(),
        ));
        self.socket = Some(SocketHandle {
            generation,
            outbound,
        });
    }

    /// Fire-and-forget; failures surface through the socket task instead.
    fn send(&self, message: &ClientMessage) {
        let Some(socket) = &self.socket else {
            debug!(kind = message.kind(), "[MONITOR] no socket; message dropped");
            return;
        };
        match message.encode(now_millis()) {
            Ok(text) => {
                if socket.outbound.send(text).is_err() {
                    debug!(kind = message.kind(), "[MONITOR] socket task gone; message dropped");
                }
            }
            Err(e) => warn!(kind = message.kind(), error = %e, "[MONITOR] encode failed"),
        }
    }

    fn publish(&mut self) {
        let state = self.machine.state();
        self.publisher.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if let Some(signals) = self.machine.take_signals() {
            self.publisher.signals.send_replace(signals);
        }
        if let Some(alerts) = self.machine.take_alerts() {
            self.publisher.alerts.send_replace(alerts);
        }
    }
}

fn abort(handle: &mut Option<JoinHandle<()>>) {
    if let Some(h) = handle.take() {
        h.abort();
    }
}

fn spawn_ticker(
    period: Duration,
    events: mpsc::UnboundedSender<Event>,
    tick: Event,
) -> JoinHandle<()> {
    let period = period.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if events.send(tick.clone()).is_err() {
                break;
            }
        }
    })
}

/// Pump one socket: inbound frames become events tagged with `generation`,
/// queued outbound text is written to the sink. Ends quietly when the driver
/// drops the outbound queue, or with a failure event when the socket breaks.
async fn run_socket(
    generation: u64,
    connecting: BoxFuture<'static, crate::errors::Result<Socket>>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<Event>,
) {
    let connected = tokio::select! {
        res = connecting => res,
        // abandoned before the handshake finished
        None = outbound.recv() => return,
    };
    let Socket {
        mut sink,
        mut stream,
    } = match connected {
        Ok(socket) => socket,
        Err(e) => {
            let _ = events.send(Event::SocketFailed {
                generation,
                reason: e.to_string(),
            });
            return;
        }
    };
    let _ = events.send(Event::SocketOpened { generation });

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(text)) => {
                    let _ = events.send(Event::Frame { generation, text });
                }
                Some(Err(e)) => {
                    let _ = events.send(Event::SocketFailed {
                        generation,
                        reason: e.to_string(),
                    });
                    break;
                }
                None => {
                    let _ = events.send(Event::SocketFailed {
                        generation,
                        reason: "socket closed".into(),
                    });
                    break;
                }
            },
            out = outbound.recv() => match out {
                Some(text) => {
                    if let Err(e) = sink.send(text).await {
                        debug!(generation, error = %e, "[MONITOR] send failed");
                    }
                }
                None => {
                    let _ = sink.close().await;
                    break;
                }
            },
        }
    }
}
