use alpha_data::{
    config::MonitorConfig,
    error::PipelineError,
    monitor::{Monitor, MonitorReport},
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{broadcast, watch},
    time::{MissedTickBehavior, interval},
};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

const DEFAULT_WS_PORT: u16 = 9002;
const DEFAULT_POLL_SECS: u64 = 60;
const DEFAULT_BUFFER_SIZE: usize = 16;

/// Messages pushed to WebSocket clients, tagged by `type`.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage<'a> {
    Welcome {
        message: &'static str,
        timestamp: DateTime<Utc>,
    },
    Report(&'a MonitorReport),
    Error {
        kind: &'static str,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl ServerMessage<'_> {
    fn to_json(&self) -> Option<Arc<str>> {
        match serde_json::to_string(self) {
            Ok(json) => Some(Arc::from(json)),
            Err(error) => {
                error!(%error, "failed to serialise server message");
                None
            }
        }
    }
}

fn error_kind(error: &PipelineError) -> &'static str {
    match error {
        PipelineError::MarketUnavailable(_) => "market_unavailable",
        PipelineError::MarketSnapshotInvalid(_) => "market_snapshot_invalid",
    }
}

#[tokio::main]
async fn main() {
    // Initialize logging
    init_logging();

    info!("Starting alpha-data WebSocket server");

    let config = match MonitorConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            error!(%error, "invalid monitor configuration");
            return;
        }
    };
    info!(
        quote_asset = %config.quote_asset,
        universe = %config.universe,
        fuzzy_mode = %config.fuzzy_mode,
        order = %config.ranking.order,
        min_volume_millions = %config.ranking.min_volume_millions,
        "monitor configured"
    );

    // Configurable via MONITOR_POLL_SECS env var (default: 60)
    let poll_every = Duration::from_secs(
        std::env::var("MONITOR_POLL_SECS")
            .ok()
            .and_then(|secs| secs.parse().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_POLL_SECS),
    );

    // Configurable via WS_BUFFER_SIZE env var (default: 16)
    let buffer_size = std::env::var("WS_BUFFER_SIZE")
        .ok()
        .and_then(|size| size.parse().ok())
        .filter(|size| *size > 0)
        .unwrap_or(DEFAULT_BUFFER_SIZE);

    let (tx, _rx) = broadcast::channel::<Arc<str>>(buffer_size);
    let (latest_tx, latest_rx) = watch::channel::<Option<Arc<str>>>(None);

    // Configurable via WS_ADDR env var (default: 0.0.0.0:9002)
    let server_addr = std::env::var("WS_ADDR")
        .ok()
        .and_then(|addr| match addr.parse::<SocketAddr>() {
            Ok(addr) => Some(addr),
            Err(error) => {
                warn!(%addr, %error, "invalid WS_ADDR, using default");
                None
            }
        })
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], DEFAULT_WS_PORT)));

    let listener = match TcpListener::bind(&server_addr).await {
        Ok(listener) => listener,
        Err(error) => {
            error!(%server_addr, %error, "failed to bind WebSocket server");
            return;
        }
    };
    info!("WebSocket server listening on ws://{}", server_addr);

    tokio::spawn(start_websocket_server(listener, tx.clone(), latest_rx));

    let monitor = Monitor::new(config);

    tokio::select! {
        _ = poll_monitor(monitor, poll_every, tx, latest_tx) => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(error) = result {
                error!(%error, "failed to listen for shutdown signal");
            }
            info!("Shutting down alpha-data WebSocket server");
        }
    }
}

/// Run a [`Monitor`] cycle every `poll_every`, broadcasting each outcome.
async fn poll_monitor(
    monitor: Monitor,
    poll_every: Duration,
    tx: broadcast::Sender<Arc<str>>,
    latest_tx: watch::Sender<Option<Arc<str>>>,
) {
    let mut timer = interval(poll_every);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        timer.tick().await;

        let message = match monitor.run_cycle().await {
            Ok(report) => {
                log_report(&report);
                let message = ServerMessage::Report(&report).to_json();
                if let Some(json) = &message {
                    latest_tx.send_replace(Some(Arc::clone(json)));
                }
                message
            }
            Err(error) => {
                warn!(%error, "monitor cycle failed");
                ServerMessage::Error {
                    kind: error_kind(&error),
                    message: error.to_string(),
                    timestamp: Utc::now(),
                }
                .to_json()
            }
        };

        // Ignore errors if no receivers
        if let Some(json) = message {
            match tx.send(json) {
                Ok(receivers) => debug!(receivers, "broadcast cycle outcome"),
                Err(_) => debug!("no WebSocket clients connected"),
            }
        }
    }
}

fn log_report(report: &MonitorReport) {
    let top = report
        .records
        .iter()
        .take(5)
        .map(|ranked| {
            format!(
                "{} {}% {}M",
                ranked.symbol(),
                ranked.metrics.volatility_pct.round_dp(2),
                ranked.metrics.volume_millions.round_dp(2)
            )
        })
        .collect::<Vec<_>>();

    info!(
        records = report.records.len(),
        unmatched = report.unmatched.len(),
        enrichment_failures = report.enrichment_failures.len(),
        below_volume = report.stats.below_volume,
        elapsed_ms = report.stats.elapsed_ms,
        ?top,
        "report ready"
    );

    if let Some(error) = &report.allowlist_error {
        warn!(%error, "report built without allowlist");
    }
}

/// Accept WebSocket clients until the listener fails.
async fn start_websocket_server(
    listener: TcpListener,
    tx: broadcast::Sender<Arc<str>>,
    latest_rx: watch::Receiver<Option<Arc<str>>>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                info!("New WebSocket connection from {}", peer_addr);
                tokio::spawn(handle_client(
                    stream,
                    peer_addr,
                    tx.subscribe(),
                    latest_rx.clone(),
                ));
            }
            Err(error) => {
                error!(%error, "WebSocket listener failed");
                break;
            }
        }
    }
}

/// Handle individual WebSocket client connection
async fn handle_client(
    stream: TcpStream,
    peer_addr: SocketAddr,
    mut rx: broadcast::Receiver<Arc<str>>,
    latest_rx: watch::Receiver<Option<Arc<str>>>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", peer_addr, e);
            return;
        }
    };

    info!("WebSocket handshake completed for {}", peer_addr);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Send welcome message, then the latest report if one exists
    let welcome = ServerMessage::Welcome {
        message: "Connected to alpha-data volatility feed",
        timestamp: Utc::now(),
    }
    .to_json();
    let latest = latest_rx.borrow().clone();

    for json in [welcome, latest].into_iter().flatten() {
        if ws_sender.send(Message::Text(json.to_string().into())).await.is_err() {
            return;
        }
    }

    // Spawn task to send reports to this client
    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json.to_string().into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Client {} lagged, skipped {} messages", peer_addr, skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Broadcast channel closed for {}", peer_addr);
                    break;
                }
            }
        }
    });

    // Handle incoming messages from client (e.g., ping/pong)
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_)) => {
                    debug!("Received ping from {}", peer_addr);
                }
                Ok(Message::Text(text)) => {
                    debug!("Received text from {}: {}", peer_addr, text);
                }
                Err(e) => {
                    error!("WebSocket error for {}: {}", peer_addr, e);
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
    }

    info!("WebSocket connection closed for {}", peer_addr);
}

/// Initialize logging
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
