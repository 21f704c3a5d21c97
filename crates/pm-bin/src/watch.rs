//! Live viewer: keeps a query cache in step with the control plane.

use pm_config_and_utils::Config;
use push_relay::{ConnectionEvent, RelayConfig};
use query_sync_bridge::{ControlPlaneClient, Query, QueryCache, QueryFetcher, SyncBridge};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// How often stale watched queries are re-read.
const REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Queries shown by the viewer.
pub fn watched() -> Vec<Query> {
    vec![
        Query::Projects,
        Query::Sessions,
        Query::Activities,
        Query::DashboardOverview,
        Query::Trends { days: 30 },
        Query::AgentStats { days: 30 },
    ]
}

/// One-line description of a query result.
pub fn summarize(query: &Query, value: &Value) -> String {
    match value {
        Value::Array(items) => format!("{}: {} items", query, items.len()),
        Value::Object(fields) => {
            let mut keys: Vec<&str> = fields.keys().map(String::as_str).collect();
            keys.sort_unstable();
            format!("{}: {{{}}}", query, keys.join(", "))
        }
        other => format!("{}: {}", query, other),
    }
}

/// Human-readable line for a connection event.
pub fn describe(event: &ConnectionEvent) -> String {
    match event {
        ConnectionEvent::Connected => "connected".to_string(),
        ConnectionEvent::Disconnected { reason } => format!("disconnected: {}", reason),
        ConnectionEvent::ReconnectScheduled { attempt, delay } => {
            format!("reconnecting in {:?} (attempt {})", delay, attempt)
        }
        ConnectionEvent::ReconnectExhausted => {
            "gave up reconnecting; live updates stopped until restart".to_string()
        }
        ConnectionEvent::Closed => "closed".to_string(),
    }
}

/// Re-read every stale or missing query and print what changed.
async fn refresh(cache: &QueryCache, fetcher: &dyn QueryFetcher, queries: &[Query]) {
    for query in queries {
        if cache.is_stale(query) == Some(false) {
            continue;
        }
        match cache.read(query, fetcher).await {
            Ok(value) => println!("{}", summarize(query, &value)),
            Err(e) => warn!(query = %query, error = %e, "Read failed"),
        }
    }
}

/// Run until Ctrl-C.
pub async fn run(config: &Config) -> anyhow::Result<()> {
    let client = ControlPlaneClient::new(
        &config.api_url,
        Duration::from_millis(config.batch.request_timeout_ms),
    )?;
    let cache = Arc::new(QueryCache::new());
    let manager = push_relay::shared(RelayConfig::from_settings(&config.ws_url, &config.relay));
    let mut events = manager.subscribe();

    let bridge = SyncBridge::mount(manager, cache.clone());
    info!(api_url = %config.api_url, ws_url = %config.ws_url, "Viewer started");

    let queries = watched();
    refresh(&cache, &client, &queries).await;

    let mut ticker = tokio::time::interval(REFRESH_INTERVAL);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    if event == ConnectionEvent::ReconnectExhausted {
                        warn!("Reconnect attempts exhausted");
                    } else {
                        info!(event = ?event, "Connection event");
                    }
                    println!("[relay] {}", describe(&event));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Connection events lagged");
                }
                Err(RecvError::Closed) => break,
            },
            _ = ticker.tick() => refresh(&cache, &client, &queries).await,
        }
    }

    bridge.unmount().await;
    Ok(())
}
