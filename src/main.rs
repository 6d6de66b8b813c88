use anyhow::Result;
use monitor_feed::{
    config::AppConfig,
    monitor::{MonitorClient, WsTransport, socket_url},
    reporter, utils,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    utils::init_logging();

    let config = AppConfig::load()?;
    let channels: Vec<&str> = config.monitor.channels.iter().map(|c| c.as_str()).collect();
    tracing::info!(
        base_url = %config.base_url,
        enabled = config.monitor.enabled,
        ?channels,
        max_reconnect_attempts = config.monitor.max_reconnect_attempts,
        "[INIT] monitor-feed starting"
    );
    if let Ok(url) = socket_url(&config.base_url) {
        tracing::info!(%url, "[INIT] push endpoint");
    }

    let client = MonitorClient::spawn(config.monitor.clone(), WsTransport::new(&config.base_url));
    let reporter = reporter::spawn_status_reporter(
        client.watch_state(),
        client.watch_signals(),
        client.watch_alerts(),
        config.report_interval,
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("[INIT] shutdown requested");
    client.dispose().await;
    let _ = reporter.await;
    Ok(())
}
