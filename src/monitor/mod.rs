//! Real-time monitor connection client.
//!
//! Responsibilities:
//! • Keep one live socket to the monitor push endpoint.
//! • Merge pushed signals and alerts into two observable collections.
//! • Reconnect with bounded exponential backoff, then settle on `degraded`
//!   so consumers know to poll the request layer instead.

use crate::config::MonitorConfig;
use crate::models::{Alert, ConnectionState, Signal};
use driver::{Driver, Publisher};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

mod driver;
pub mod endpoint;
pub mod machine;
pub mod message;
pub mod reducer;
pub mod transport;

pub use endpoint::{MONITOR_PATH, socket_url};
pub use machine::{Command, Event, Machine};
pub use message::{ClientMessage, ServerMessage};
pub use reducer::{backoff_delay, merge_signals, replace_alerts};
pub use transport::{Socket, Transport, WsTransport};

/// Handle to a running monitor client. Spawning activates it; disposing (or
/// dropping) it clears every timer and closes the socket.
pub struct MonitorClient {
    state: watch::Receiver<ConnectionState>,
    signals: watch::Receiver<Vec<Signal>>,
    alerts: watch::Receiver<Vec<Alert>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl MonitorClient {
    /// Start a client on the current tokio runtime.
    pub fn spawn<T: Transport>(config: MonitorConfig, transport: T) -> Self {
        let mut machine = Machine::new(config.clone());
        let initial = machine.start(transport.supports_sockets());

        let (state_tx, state) = watch::channel(machine.state());
        let (signals_tx, signals) = watch::channel(Vec::new());
        let (alerts_tx, alerts) = watch::channel(Vec::new());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let driver = Driver::new(
            machine,
            transport,
            &config,
            events_tx,
            Publisher {
                state: state_tx,
                signals: signals_tx,
                alerts: alerts_tx,
            },
        );
        let task = tokio::spawn(driver.run(initial, events_rx, shutdown_rx));

        Self {
            state,
            signals,
            alerts,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.signals.borrow().clone()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn watch_signals(&self) -> watch::Receiver<Vec<Signal>> {
        self.signals.clone()
    }

    pub fn watch_alerts(&self) -> watch::Receiver<Vec<Alert>> {
        self.alerts.clone()
    }

    /// Tear the client down and wait until its timers and socket are released.
    pub async fn dispose(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for MonitorClient {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{AppError, Result};
    use futures::channel::mpsc as fmpsc;
    use futures::future::{self, BoxFuture};
    use futures::{SinkExt, StreamExt};
    use serde_json::Value;
    use std::future::Future;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::Instant;
    use url::Url;

    /// Server end of one fake socket.
    struct FakeServer {
        from_client: fmpsc::UnboundedReceiver<String>,
        to_client: fmpsc::UnboundedSender<Result<String>>,
    }

    impl FakeServer {
        fn push(&self, text: &str) {
            let _ = self.to_client.unbounded_send(Ok(text.to_string()));
        }

        async fn next_type(&mut self) -> Option<String> {
            let text = self.from_client.next().await?;
            let v: Value = serde_json::from_str(&text).expect("client sends json");
            Some(v["type"].as_str().unwrap_or_default().to_string())
        }
    }

    #[derive(Clone)]
    struct FakeTransport {
        base_url: String,
        sockets: bool,
        refuse: bool,
        attempts: Arc<Mutex<Vec<(Url, Instant)>>>,
        servers: mpsc::UnboundedSender<FakeServer>,
    }

    impl FakeTransport {
        fn new() -> (Self, mpsc::UnboundedReceiver<FakeServer>) {
            let (servers, rx) = mpsc::unbounded_channel();
            let t = Self {
                base_url: "https://api.example.com".into(),
                sockets: true,
                refuse: false,
                attempts: Arc::new(Mutex::new(Vec::new())),
                servers,
            };
            (t, rx)
        }

        fn attempt_count(&self) -> usize {
            self.attempts.lock().expect("lock").len()
        }

        fn attempt_times(&self) -> Vec<Instant> {
            self.attempts.lock().expect("lock").iter().map(|(_, t)| *t).collect()
        }
    }

    impl Transport for FakeTransport {
        fn base_url(&self) -> String {
            self.base_url.clone()
        }

        fn supports_sockets(&self) -> bool {
            self.sockets
        }

        fn connect(&self, url: Url) -> BoxFuture<'static, Result<Socket>> {
            self.attempts.lock().expect("lock").push((url, Instant::now()));
            if self.refuse {
                return Box::pin(future::ready(Err::<Socket, _>(AppError::Other(
                    "refused".into(),
                ))));
            }
            let (client_tx, from_client) = fmpsc::unbounded::<String>();
            let (to_client, client_rx) = fmpsc::unbounded::<Result<String>>();
            let _ = self.servers.send(FakeServer {
                from_client,
                to_client,
            });
            let sink = client_tx.sink_map_err(|e| AppError::Other(e.to_string()));
            Box::pin(future::ready(Ok::<_, AppError>(Socket {
                sink: Box::pin(sink),
                stream: Box::pin(client_rx),
            })))
        }
    }

    async fn within<F: Future>(fut: F) -> F::Output {
        tokio::time::timeout(Duration::from_secs(300), fut)
            .await
            .expect("timed out")
    }

    async fn wait_state(client: &MonitorClient, want: ConnectionState) {
        let mut rx = client.watch_state();
        within(rx.wait_for(|s| *s == want)).await.expect("driver alive");
    }

    async fn next_server(rx: &mut mpsc::UnboundedReceiver<FakeServer>) -> FakeServer {
        within(rx.recv()).await.expect("socket attempt")
    }

    #[tokio::test(start_paused = true)]
    async fn connects_and_merges_signal_pushes() {
        let (transport, mut servers) = FakeTransport::new();
        let client = MonitorClient::spawn(MonitorConfig::default(), transport.clone());
        assert_eq!(client.connection_state(), ConnectionState::Connecting);

        let mut server = next_server(&mut servers).await;
        assert_eq!(server.next_type().await.as_deref(), Some("subscribe"));
        assert_eq!(server.next_type().await.as_deref(), Some("resync"));

        server.push(r#"{"type":"heartbeat"}"#);
        wait_state(&client, ConnectionState::Connected).await;

        let mut signals = client.watch_signals();
        server.push(
            r#"{"type":"signals_update","payload":{"snapshot":true},
                "data":{"items":[{"id":"s1","symbol":"AAPL"}]}}"#,
        );
        within(signals.wait_for(|s| s.len() == 1)).await.expect("signals");

        server.push(
            r#"{"type":"signals_update","payload":{"snapshot":false},
                "data":{"items":[{"id":"s1","symbol":"AAPL"},{"id":"s2","symbol":"TSLA"}]}}"#,
        );
        within(signals.wait_for(|s| s.len() == 2)).await.expect("signals");
        let signals = client.signals();
        let ids: Vec<_> = signals.iter().filter_map(|s| s.id()?.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2"]);

        let url = transport.attempts.lock().expect("lock")[0].0.to_string();
        assert_eq!(url, "wss://api.example.com/ws/monitor");
        client.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn alerts_are_replaced_on_push() {
        let (transport, mut servers) = FakeTransport::new();
        let client = MonitorClient::spawn(MonitorConfig::default(), transport);
        let server = next_server(&mut servers).await;

        let mut alerts = client.watch_alerts();
        server.push(r#"{"type":"alerts_update","data":{"items":[{"id":"a1"},{"id":"a2"}]}}"#);
        within(alerts.wait_for(|a| a.len() == 2)).await.expect("alerts");
        server.push(r#"{"type":"alerts_update","data":{"items":[{"id":"a3"}]}}"#);
        within(alerts.wait_for(|a| a.len() == 1)).await.expect("alerts");
        assert_eq!(client.alerts()[0].id(), Some(&serde_json::json!("a3")));
        client.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn sends_poll_and_ping_on_their_intervals() {
        let (transport, mut servers) = FakeTransport::new();
        let config = MonitorConfig::default()
            .with_heartbeat_interval(Duration::from_millis(1_000))
            .with_poll_interval(Duration::from_millis(400));
        let client = MonitorClient::spawn(config, transport);
        let mut server = next_server(&mut servers).await;
        assert_eq!(server.next_type().await.as_deref(), Some("subscribe"));
        assert_eq!(server.next_type().await.as_deref(), Some("resync"));

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(within(server.next_type()).await.expect("message"));
        }
        assert_eq!(seen, vec!["poll", "poll", "ping"]);
        client.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_close_reconnects_with_backoff() {
        let (transport, mut servers) = FakeTransport::new();
        let client = MonitorClient::spawn(MonitorConfig::default(), transport.clone());

        let first = next_server(&mut servers).await;
        drop(first);
        wait_state(&client, ConnectionState::Degraded).await;

        let second = next_server(&mut servers).await;
        // the retry keeps showing degraded until the server confirms
        assert_eq!(client.connection_state(), ConnectionState::Degraded);
        drop(second);
        let _third = next_server(&mut servers).await;

        let times = transport.attempt_times();
        assert_eq!(times.len(), 3);
        let gap1 = times[1] - times[0];
        let gap2 = times[2] - times[1];
        assert!(gap1 >= Duration::from_millis(500) && gap1 < Duration::from_millis(550));
        assert!(gap2 >= Duration::from_millis(1_000) && gap2 < Duration::from_millis(1_050));
        client.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_after_failures_restarts_backoff() {
        let (transport, mut servers) = FakeTransport::new();
        let client = MonitorClient::spawn(MonitorConfig::default(), transport.clone());

        drop(next_server(&mut servers).await);
        drop(next_server(&mut servers).await);
        let third = next_server(&mut servers).await;
        third.push(r#"{"type":"heartbeat"}"#);
        wait_state(&client, ConnectionState::Connected).await;
        drop(third);
        let _fourth = next_server(&mut servers).await;

        let times = transport.attempt_times();
        assert!(times[3] - times[2] < Duration::from_millis(550));
        client.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_pin_degraded() {
        let (mut transport, _servers) = FakeTransport::new();
        transport.refuse = true;
        let client = MonitorClient::spawn(MonitorConfig::default(), transport.clone());

        tokio::time::sleep(Duration::from_secs(120)).await;
        // initial attempt plus five retries
        assert_eq!(transport.attempt_count(), 6);
        assert_eq!(client.connection_state(), ConnectionState::Degraded);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(transport.attempt_count(), 6);
        assert_eq!(client.connection_state(), ConnectionState::Degraded);
        client.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_client_never_connects() {
        let (transport, _servers) = FakeTransport::new();
        let config = MonitorConfig::default().with_enabled(false);
        let client = MonitorClient::spawn(config, transport.clone());
        assert_eq!(client.connection_state(), ConnectionState::Offline);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.attempt_count(), 0);
        assert_eq!(client.connection_state(), ConnectionState::Offline);
        client.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn missing_socket_support_degrades_immediately() {
        let (mut transport, _servers) = FakeTransport::new();
        transport.sockets = false;
        let client = MonitorClient::spawn(MonitorConfig::default(), transport.clone());
        assert_eq!(client.connection_state(), ConnectionState::Degraded);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.attempt_count(), 0);
        client.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn bad_base_url_counts_as_a_failed_attempt() {
        let (mut transport, _servers) = FakeTransport::new();
        transport.base_url = "   ".into();
        let client = MonitorClient::spawn(MonitorConfig::default(), transport.clone());
        wait_state(&client, ConnectionState::Degraded).await;
        assert_eq!(transport.attempt_count(), 0);
        client.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_stops_sends_and_reconnects() {
        let (transport, mut servers) = FakeTransport::new();
        let config = MonitorConfig::default().with_poll_interval(Duration::from_millis(100));
        let client = MonitorClient::spawn(config, transport.clone());
        let mut server = next_server(&mut servers).await;
        assert_eq!(server.next_type().await.as_deref(), Some("subscribe"));
        assert_eq!(server.next_type().await.as_deref(), Some("resync"));

        client.dispose().await;
        // late push after disposal goes nowhere
        server.push(r#"{"type":"heartbeat"}"#);
        tokio::time::sleep(Duration::from_secs(60)).await;

        let mut leftover = Vec::new();
        while let Some(kind) = within(server.next_type()).await {
            leftover.push(kind);
        }
        assert!(leftover.is_empty(), "sent after dispose: {leftover:?}");
        assert_eq!(transport.attempt_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_client_tears_it_down() {
        let (transport, mut servers) = FakeTransport::new();
        let client = MonitorClient::spawn(MonitorConfig::default(), transport.clone());
        let mut server = next_server(&mut servers).await;
        drop(client);

        let mut count = 0;
        while within(server.from_client.next()).await.is_some() {
            count += 1;
        }
        assert!(count <= 2);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.attempt_count(), 1);
    }
}
