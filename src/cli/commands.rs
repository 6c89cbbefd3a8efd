//! CLI command implementations

use anyhow::{Context, Result};
use serde::Deserialize;
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::alert::{AlertSink, LogAlertSink, WebhookAlertSink};
use crate::config::Config;
use crate::engine::{Engine, Probes};
use crate::outcomes::OutcomeEngine;
use crate::probes::{DexScreenerClient, RetryPolicy, SolanaRpcClient};
use crate::vip::load_watch_list;

/// One mention fed to the engine
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MentionEvent {
    #[serde(alias = "ca", alias = "mint")]
    pub entity_id: String,
    pub channel: String,
}

/// Accepts `{"entity_id": ..., "channel": ...}` or `<entity_id> <channel>`
pub fn parse_mention_line(line: &str) -> Option<MentionEvent> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    if line.starts_with('{') {
        return serde_json::from_str(line).ok();
    }
    let mut parts = line.split_whitespace();
    let entity_id = parts.next()?.to_string();
    let channel = parts.collect::<Vec<_>>().join(" ");
    if channel.is_empty() {
        return None;
    }
    Some(MentionEvent { entity_id, channel })
}

fn alert_sink(config: &Config, dry_run: bool) -> Result<Arc<dyn AlertSink>> {
    if dry_run || config.alerts.dry_run {
        warn!("Running in DRY-RUN mode - alerts are only logged");
        return Ok(Arc::new(LogAlertSink));
    }
    match config.alerts.webhook_url.as_deref().filter(|u| !u.is_empty()) {
        Some(url) => {
            info!("Delivering alerts to webhook");
            let sink = WebhookAlertSink::new(url, Duration::from_secs(config.http.timeout_secs))?;
            Ok(Arc::new(sink))
        }
        None => {
            info!("No alert webhook configured, alerts are logged");
            Ok(Arc::new(LogAlertSink))
        }
    }
}

/// Run the engine, reading mentions from stdin until ctrl-c
pub async fn start(config: &Config, dry_run: bool) -> Result<()> {
    info!("Starting consensus engine...");
    info!(
        "T1 needs {} unique channels in {}m; retention {}m",
        config.social.min_unique_channels_t1,
        config.social.overlap_window_min,
        config.social.retention_min
    );

    let retry = RetryPolicy::from_config(&config.http);
    let market = Arc::new(
        DexScreenerClient::new(&config.market, retry).context("Failed to create market client")?,
    );
    let rpc = Arc::new(SolanaRpcClient::new(&config.rpc, retry).context("Failed to create RPC client")?);
    info!("RPC endpoints: {} (max {} req/s)", config.rpc.endpoints.len(), config.rpc.max_rps);

    let probes = Probes {
        market,
        safety: rpc.clone(),
        holders: rpc.clone(),
        balances: rpc,
    };

    let outcomes = if config.stats.enabled {
        let outcomes = OutcomeEngine::open(&config.stats, &config.forwarding, &config.http)
            .context("Failed to open analytics store")?;
        Some(outcomes)
    } else {
        info!("Outcome analytics disabled");
        None
    };

    let engine = Arc::new(Engine::new(
        config.clone(),
        probes,
        load_watch_list(&config.vip),
        alert_sink(config, dry_run)?,
        outcomes,
    ));
    engine.restore_state().await;

    let cancel = CancellationToken::new();
    let handles = engine.spawn_background(cancel.clone());

    let (event_tx, mut event_rx) = mpsc::channel::<MentionEvent>(1024);
    spawn_stdin_reader(event_tx);

    info!("Engine started. Reading mentions from stdin...");

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                let engine = engine.clone();
                tokio::spawn(async move {
                    if let Err(e) = engine.process_mention(&event.entity_id, &event.channel).await {
                        warn!(entity = %event.entity_id, "Mention rejected: {}", e);
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    cancel.cancel();
    for handle in handles {
        if let Err(e) = handle.await {
            error!("Background loop ended abnormally: {}", e);
        }
    }
    engine.shutdown().await;

    Ok(())
}

/// Blocking stdin reads run on a dedicated thread
fn spawn_stdin_reader(tx: mpsc::Sender<MentionEvent>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => match parse_mention_line(&line) {
                    Some(event) => {
                        if tx.blocking_send(event).is_err() {
                            return;
                        }
                    }
                    None => debug!("Ignoring unparseable mention line"),
                },
                Err(e) => {
                    error!("Failed to read mention input: {}", e);
                    return;
                }
            }
        }
        info!("Mention input closed; background loops keep running");
    });
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}
