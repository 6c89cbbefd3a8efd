//! Outcome analytics
//!
//! Signals are logged the moment a tier is accepted. Market snapshots keep
//! flowing in from the snapshot loop, and ROI at each configured horizon is
//! derived lazily once a snapshot past `signal + horizon` exists. Each
//! (entity, horizon) outcome is written at most once.

pub mod forward;
pub mod jsonl;
pub mod store;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ForwardingConfig, HttpConfig, StatsConfig};
use crate::error::Result;
use crate::ledger::MentionAggregates;
use crate::tier::Tier;
use crate::types::{HoldersSnapshot, MarketSnapshot};

pub use forward::{EventKind, WebhookForwarder};
pub use jsonl::JsonlLog;
pub use store::{StatsStore, Table};

/// Immutable record of an accepted tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub id: Uuid,
    pub ts: DateTime<Utc>,
    pub entity_id: String,
    pub symbol: Option<String>,
    pub classification: Tier,
    pub source_channels: Vec<String>,
    pub unique_channels: usize,
    pub mentions_total: usize,
    pub liquidity_usd: f64,
    pub volume24_usd: f64,
    pub market_cap_usd: f64,
    pub txns_h1: u64,
    pub buy_sell_ratio_h1: f64,
    pub price_change_m15: f64,
    pub price_usd: Option<f64>,
}

impl SignalEvent {
    pub fn new(
        entity_id: &str,
        tier: Tier,
        aggregates: &MentionAggregates,
        market: &MarketSnapshot,
        ts: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ts,
            entity_id: entity_id.to_string(),
            symbol: market.symbol.clone(),
            classification: tier,
            source_channels: aggregates.source_channels.clone(),
            unique_channels: aggregates.unique_channels,
            mentions_total: aggregates.mentions_total,
            liquidity_usd: market.liquidity_usd,
            volume24_usd: market.volume24_usd,
            market_cap_usd: market.market_cap_usd,
            txns_h1: market.txns_h1(),
            buy_sell_ratio_h1: market.buy_sell_ratio_h1,
            price_change_m15: market.price_change_m15,
            price_usd: market.live_price(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    /// Timestamp of the snapshot that closed the horizon
    pub ts: DateTime<Utc>,
    pub entity_id: String,
    pub horizon_min: u32,
    pub roi_pct: f64,
    pub start_price: f64,
    pub end_price: f64,
}

pub fn roi_pct(start: f64, end: f64) -> f64 {
    (end - start) / start * 100.0
}

pub struct OutcomeEngine {
    store: StatsStore,
    signals_log: JsonlLog,
    outcomes_log: JsonlLog,
    forwarder: Option<WebhookForwarder>,
    horizons_min: Vec<u32>,
    /// First positive signal price per entity
    baseline: DashMap<String, f64>,
}

impl OutcomeEngine {
    pub fn open(stats: &StatsConfig, forwarding: &ForwardingConfig, http: &HttpConfig) -> Result<Self> {
        let store = StatsStore::open(&stats.db_path)?;
        let forwarder =
            WebhookForwarder::from_config(forwarding, StdDuration::from_secs(http.timeout_secs))?;
        if forwarder.is_some() {
            info!("Forwarding signals and outcomes to analytics webhook");
        }
        Ok(Self::with_store(store, stats, forwarder))
    }

    pub fn with_store(
        store: StatsStore,
        stats: &StatsConfig,
        forwarder: Option<WebhookForwarder>,
    ) -> Self {
        let log = |name: &str| {
            JsonlLog::new(stats.dir.join(name), stats.jsonl_max_bytes, stats.max_jsonl_files)
        };
        let mut horizons_min = stats.roi_horizons_min.clone();
        horizons_min.sort_unstable();
        horizons_min.dedup();

        Self {
            store,
            signals_log: log("signals.jsonl"),
            outcomes_log: log("outcomes.jsonl"),
            forwarder,
            horizons_min,
            baseline: DashMap::new(),
        }
    }

    pub fn store(&self) -> &StatsStore {
        &self.store
    }

    pub fn baseline_price(&self, entity_id: &str) -> Option<f64> {
        self.baseline.get(entity_id).map(|p| *p)
    }

    pub async fn record_signal(&self, event: &SignalEvent) -> Result<()> {
        if let Some(price) = event.price_usd.filter(|p| *p > 0.0) {
            self.baseline.entry(event.entity_id.clone()).or_insert(price);
        }

        self.signals_log.append(event).await?;
        self.store.insert_signal(event)?;
        debug!(entity = %event.entity_id, tier = %event.classification, "Recorded signal");

        self.forward(EventKind::Signal, event).await;
        Ok(())
    }

    /// Snapshot row plus the coins directory entry
    pub fn record_snapshot(&self, snapshot: &MarketSnapshot, ts: DateTime<Utc>) -> Result<()> {
        let ts = ts.timestamp();
        self.store.upsert_coin(
            &snapshot.entity_id,
            snapshot.symbol.as_deref(),
            snapshot.pair_created_at.map(|t| t.timestamp()),
            ts,
        )?;
        self.store.insert_snapshot(snapshot, ts)?;
        Ok(())
    }

    pub fn record_mention(&self, entity_id: &str, channel: &str, ts: DateTime<Utc>) -> Result<()> {
        self.store.insert_mention(ts.timestamp(), entity_id, channel)?;
        Ok(())
    }

    pub fn record_holders(&self, holders: &HoldersSnapshot, ts: DateTime<Utc>) -> Result<()> {
        self.store.insert_holders(ts.timestamp(), holders)
    }

    pub fn record_vip_holder(&self, entity_id: &str, wallet: &str, ts: DateTime<Utc>) -> Result<()> {
        self.store.insert_vip_holder(ts.timestamp(), entity_id, wallet)?;
        Ok(())
    }

    fn start_price(&self, entity_id: &str, base_ts: i64) -> Result<Option<f64>> {
        if let Some(price) = self.baseline_price(entity_id) {
            return Ok(Some(price));
        }
        if let Some(price) = self.store.earliest_signal_price(entity_id)? {
            return Ok(Some(price));
        }
        self.store.snapshot_price_at_or_before(entity_id, base_ts)
    }

    /// Derive every horizon outcome that has become computable; returns the new records
    pub async fn maybe_derive_outcomes(&self, entity_id: &str) -> Result<Vec<OutcomeRecord>> {
        let Some(base_ts) = self.store.earliest_signal_ts(entity_id)? else {
            return Ok(Vec::new());
        };
        let Some(start) = self.start_price(entity_id, base_ts)? else {
            debug!(entity = %entity_id, "No start price, skipping outcome derivation");
            return Ok(Vec::new());
        };

        let mut derived = Vec::new();
        for &horizon in &self.horizons_min {
            if self.store.outcome_exists(entity_id, horizon)? {
                continue;
            }
            let target = base_ts + Duration::minutes(horizon as i64).num_seconds();
            let Some((end_ts, end)) = self.store.first_snapshot_at_or_after(entity_id, target)? else {
                continue;
            };

            let record = OutcomeRecord {
                ts: DateTime::from_timestamp(end_ts, 0).unwrap_or_else(Utc::now),
                entity_id: entity_id.to_string(),
                horizon_min: horizon,
                roi_pct: roi_pct(start, end),
                start_price: start,
                end_price: end,
            };
            if !self.store.insert_outcome(&record)? {
                continue;
            }

            info!(
                entity = %entity_id,
                horizon_min = horizon,
                roi_pct = record.roi_pct,
                "Outcome recorded"
            );
            if let Err(e) = self.outcomes_log.append(&record).await {
                warn!(entity = %entity_id, "Failed to append outcome log: {}", e);
            }
            self.forward(EventKind::Outcome, &record).await;
            derived.push(record);
        }
        Ok(derived)
    }

    async fn forward<T: Serialize>(&self, kind: EventKind, data: &T) {
        if let Some(forwarder) = &self.forwarder {
            if let Err(e) = forwarder.forward(kind, data).await {
                warn!(kind = ?kind, "Analytics forward failed: {}", e);
            }
        }
    }
}
