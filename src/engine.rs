//! Consensus engine
//!
//! Wires the ledger, caches, classifier, gate and analytics together. The
//! ingestion path is [`Engine::process_mention`]; everything else runs in
//! background loops started by [`Engine::spawn_background`] and stopped by
//! cancelling the shared token.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::alert::{format_alert, AlertSink, AlertView};
use crate::cache::{MarketSnapshotCache, SafetyCache};
use crate::classifier::{check_holders, EntityAge, EvaluationInput, HolderCheck, TierClassifier};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::gate::{AlertGate, Upgrade};
use crate::ledger::{Mention, MentionLedger};
use crate::outcomes::{OutcomeEngine, SignalEvent};
use crate::probes::{BalanceProbe, HolderProbe, MarketDataProvider, SafetyProbe};
use crate::state::StateStore;
use crate::tier::Tier;
use crate::vip::VipWatcher;

const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Extra time past the longest horizon before an alerted entity stops being snapshotted
const OUTCOME_GRACE_MIN: i64 = 30;

/// The external services the engine depends on
#[derive(Clone)]
pub struct Probes {
    pub market: Arc<dyn MarketDataProvider>,
    pub safety: Arc<dyn SafetyProbe>,
    pub holders: Arc<dyn HolderProbe>,
    pub balances: Arc<dyn BalanceProbe>,
}

/// Counters reported by the heartbeat
#[derive(Debug, Default)]
pub struct EngineStats {
    pub mentions: AtomicU64,
    pub alerts_sent: AtomicU64,
    pub alerts_failed: AtomicU64,
    pub upgrades_rejected: AtomicU64,
    pub snapshots: AtomicU64,
    pub outcomes: AtomicU64,
}

pub struct Engine {
    config: Config,
    ledger: MentionLedger,
    safety: SafetyCache,
    market: MarketSnapshotCache,
    holder_probe: Arc<dyn HolderProbe>,
    classifier: TierClassifier,
    gate: AlertGate,
    state: StateStore,
    outcomes: Option<OutcomeEngine>,
    vip: VipWatcher,
    sink: Arc<dyn AlertSink>,
    /// Alerted entities still waiting for horizon snapshots, with their first signal time
    pending_outcomes: DashMap<String, DateTime<Utc>>,
    /// Held from gate acceptance through delivery, so one entity's alerts leave in rank order
    alert_locks: DashMap<String, Arc<Mutex<()>>>,
    stats: EngineStats,
}

impl Engine {
    pub fn new(
        config: Config,
        probes: Probes,
        vip_wallets: Vec<String>,
        sink: Arc<dyn AlertSink>,
        outcomes: Option<OutcomeEngine>,
    ) -> Self {
        Self {
            ledger: MentionLedger::new(&config.social),
            safety: SafetyCache::new(probes.safety, &config.safety),
            market: MarketSnapshotCache::new(probes.market, &config.market),
            holder_probe: probes.holders,
            classifier: TierClassifier::new(&config),
            gate: AlertGate::new(),
            state: StateStore::new(&config.state.path),
            vip: VipWatcher::new(vip_wallets, probes.balances, &config.vip),
            outcomes,
            sink,
            pending_outcomes: DashMap::new(),
            alert_locks: DashMap::new(),
            stats: EngineStats::default(),
            config,
        }
    }

    pub fn gate(&self) -> &AlertGate {
        &self.gate
    }

    pub fn ledger(&self) -> &MentionLedger {
        &self.ledger
    }

    pub fn outcomes(&self) -> Option<&OutcomeEngine> {
        self.outcomes.as_ref()
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Load persisted gate state so nothing already alerted is alerted again
    pub async fn restore_state(&self) {
        let state = self.state.load().await;
        self.gate.restore(&state);
    }

    pub async fn persist(&self) -> Result<()> {
        self.state.save(&self.gate.snapshot()).await
    }

    pub async fn process_mention(&self, entity_id: &str, channel: &str) -> Result<Option<Tier>> {
        self.process_mention_at(entity_id, channel, Utc::now()).await
    }

    /// Ingest one mention observed at `now`; returns the tier alerted, if any
    pub async fn process_mention_at(
        &self,
        entity_id: &str,
        channel: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Tier>> {
        let entity_id = entity_id.trim();
        if entity_id.is_empty() {
            return Err(Error::InvalidAddress("empty entity id".into()));
        }
        self.stats.mentions.fetch_add(1, Ordering::Relaxed);

        let first_seen = self.gate.note_first_seen(entity_id, now);
        self.ledger.append(entity_id, Mention::new(channel, now));
        if let Some(outcomes) = &self.outcomes {
            if let Err(e) = outcomes.record_mention(entity_id, channel, now) {
                warn!(entity = %entity_id, "Failed to record mention: {}", e);
            }
        }

        let aggregates = self.ledger.aggregates(entity_id, now);
        let safety = self.safety.get_or_compute_at(entity_id, now).await.value.result;
        let market = self.market.get_or_refresh(entity_id, now).await;
        let peak_liquidity = self.gate.observe_liquidity(entity_id, market.liquidity_usd);
        let age = EntityAge::resolve(market.pair_created_at, Some(first_seen), now);

        let holders = if self.classifier.market_tiers_reachable(&safety, &age) {
            let check =
                check_holders(self.holder_probe.as_ref(), entity_id, self.classifier.holders_config()).await;
            if let (Some(snapshot), Some(outcomes)) = (check.snapshot(), &self.outcomes) {
                if let Err(e) = outcomes.record_holders(snapshot, now) {
                    warn!(entity = %entity_id, "Failed to record holders: {}", e);
                }
            }
            check
        } else {
            HolderCheck::Skipped
        };

        let record = self.gate.record(entity_id).unwrap_or_default();
        let vip_holders = self.vip.holder_count(entity_id);
        let decision = self.classifier.evaluate(&EvaluationInput {
            aggregates: &aggregates,
            safety,
            market: &market,
            holders: &holders,
            vip_holders,
            age,
            peak_liquidity,
            tier1_reference_price: record.tier1_reference_price,
        });

        for (tier, reasons) in &decision.blocked {
            debug!(entity = %entity_id, tier = %tier, "Not reached: {}", reasons.join("; "));
        }
        let Some(tier) = decision.tier else {
            return Ok(None);
        };

        let lock = self.alert_lock(entity_id);
        let _delivering = lock.lock().await;
        match self.gate.try_upgrade(entity_id, tier, market.live_price()) {
            Upgrade::Rejected { .. } => {
                self.stats.upgrades_rejected.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
            Upgrade::Accepted { previous } => {
                info!(
                    entity = %entity_id,
                    tier = %tier,
                    previous = ?previous,
                    unique_channels = aggregates.unique_channels,
                    age_min = ?age.minutes,
                    age_source = ?age.source,
                    "Tier accepted"
                );
            }
        }

        let body = format_alert(&AlertView {
            entity_id,
            tier,
            aggregates: &aggregates,
            overlap_window_min: self.config.social.overlap_window_min,
            vip_holders,
            market: &market,
            safety,
        });
        match self.sink.send_alert(entity_id, tier, &body).await {
            Ok(()) => {
                self.stats.alerts_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats.alerts_failed.fetch_add(1, Ordering::Relaxed);
                error!(entity = %entity_id, tier = %tier, "Alert delivery failed: {}", e);
            }
        }

        if let Some(outcomes) = &self.outcomes {
            let event = SignalEvent::new(entity_id, tier, &aggregates, &market, now);
            if let Err(e) = outcomes.record_signal(&event).await {
                warn!(entity = %entity_id, "Failed to record signal: {}", e);
            }
            self.pending_outcomes.entry(entity_id.to_string()).or_insert(now);
        }

        Ok(Some(tier))
    }

    fn alert_lock(&self, entity_id: &str) -> Arc<Mutex<()>> {
        self.alert_locks
            .entry(entity_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Entities the snapshot loop follows: the ledger's plus alerted ones awaiting outcomes
    fn snapshot_targets(&self, now: DateTime<Utc>) -> Vec<String> {
        let longest = self
            .config
            .stats
            .roi_horizons_min
            .iter()
            .copied()
            .max()
            .unwrap_or(0) as i64;
        let expiry = ChronoDuration::minutes(longest + OUTCOME_GRACE_MIN);
        self.pending_outcomes.retain(|_, signalled| now - *signalled <= expiry);

        let mut targets = self.ledger.tracked_entities();
        for entry in self.pending_outcomes.iter() {
            if !targets.contains(entry.key()) {
                targets.push(entry.key().clone());
            }
        }
        targets
    }

    /// Refresh market data for followed entities, record snapshots and derive outcomes
    pub async fn snapshot_cycle(&self, now: DateTime<Utc>) {
        for entity_id in self.snapshot_targets(now) {
            let market = self.market.get_or_refresh(&entity_id, now).await;
            self.gate.observe_liquidity(&entity_id, market.liquidity_usd);

            let Some(outcomes) = &self.outcomes else {
                continue;
            };
            if !market.is_empty() {
                match outcomes.record_snapshot(&market, now) {
                    Ok(()) => {
                        self.stats.snapshots.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => warn!(entity = %entity_id, "Failed to record snapshot: {}", e),
                }
            }
            match outcomes.maybe_derive_outcomes(&entity_id).await {
                Ok(derived) => {
                    self.stats.outcomes.fetch_add(derived.len() as u64, Ordering::Relaxed);
                }
                Err(e) => warn!(entity = %entity_id, "Outcome derivation failed: {}", e),
            }
        }
    }

    /// One VIP pass over tracked entities
    pub async fn vip_cycle(&self, cancel: &CancellationToken) {
        let now = Utc::now();
        for entity_id in self.ledger.tracked_entities() {
            if cancel.is_cancelled() {
                return;
            }
            let new_holders = self.vip.reconcile_entity(&entity_id).await;
            if let Some(outcomes) = &self.outcomes {
                for wallet in &new_holders {
                    if let Err(e) = outcomes.record_vip_holder(&entity_id, wallet, now) {
                        warn!(entity = %entity_id, "Failed to record VIP holder: {}", e);
                    }
                }
            }
        }
    }

    pub fn prune_cycle(&self, now: DateTime<Utc>) {
        let emptied = self.ledger.prune(now);
        // only idle locks are dropped
        self.alert_locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        let trimmed = self.ledger.trim(
            self.config.social.max_tracked_entities,
            self.config.social.retain_after_trim,
        );
        if emptied + trimmed > 0 {
            debug!(emptied, trimmed, tracked = self.ledger.len(), "Pruned mention ledger");
        }
    }

    pub fn log_heartbeat(&self) {
        info!(
            mentions = self.stats.mentions.load(Ordering::Relaxed),
            alerts = self.stats.alerts_sent.load(Ordering::Relaxed),
            alert_failures = self.stats.alerts_failed.load(Ordering::Relaxed),
            rejected = self.stats.upgrades_rejected.load(Ordering::Relaxed),
            snapshots = self.stats.snapshots.load(Ordering::Relaxed),
            outcomes = self.stats.outcomes.load(Ordering::Relaxed),
            tracked = self.ledger.len(),
            gated = self.gate.len(),
            safety_hit_rate = self.safety.stats().hit_rate(),
            market_hit_rate = self.market.stats().hit_rate(),
            "Heartbeat"
        );
    }

    /// Start every background loop; each stops when `cancel` fires
    pub fn spawn_background(self: &Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let engine = Arc::clone(self);
        handles.push(spawn_periodic(
            "snapshot",
            Duration::from_secs(self.config.stats.snapshot_interval_secs.max(1)),
            cancel.clone(),
            move || {
                let engine = engine.clone();
                async move { engine.snapshot_cycle(Utc::now()).await }
            },
        ));

        if self.vip.wallets().is_empty() {
            info!("No VIP wallets configured; VIP watcher idle");
        } else {
            info!(
                "VIP wallets loaded: {} (poll {}s)",
                self.vip.wallets().len(),
                self.vip.poll_interval().as_secs()
            );
            let engine = Arc::clone(self);
            let token = cancel.clone();
            handles.push(spawn_periodic(
                "vip",
                self.vip.poll_interval(),
                cancel.clone(),
                move || {
                    let engine = engine.clone();
                    let token = token.clone();
                    async move { engine.vip_cycle(&token).await }
                },
            ));
        }

        let engine = Arc::clone(self);
        handles.push(spawn_periodic(
            "persist",
            Duration::from_secs(self.config.state.save_interval_secs.max(1)),
            cancel.clone(),
            move || {
                let engine = engine.clone();
                async move {
                    if let Err(e) = engine.persist().await {
                        warn!("Failed to persist state: {}", e);
                    }
                }
            },
        ));

        let engine = Arc::clone(self);
        handles.push(spawn_periodic(
            "heartbeat",
            Duration::from_secs(self.config.health.log_secs.max(1)),
            cancel.clone(),
            move || {
                let engine = engine.clone();
                async move { engine.log_heartbeat() }
            },
        ));

        let engine = Arc::clone(self);
        handles.push(spawn_periodic("prune", PRUNE_INTERVAL, cancel, move || {
            let engine = engine.clone();
            async move { engine.prune_cycle(Utc::now()) }
        }));

        handles
    }

    /// Final state save after the loops have stopped
    pub async fn shutdown(&self) {
        match self.persist().await {
            Ok(()) => info!("State saved to {}", self.state.path().display()),
            Err(e) => error!("Failed to save state on shutdown: {}", e),
        }
        self.log_heartbeat();
    }
}

/// Run `tick` every `period` until `cancel` fires. The first tick waits one full period.
fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!("{} loop started ({}s)", name, period.as_secs());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("{} loop stopped", name);
                    break;
                }
                _ = interval.tick() => tick().await,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StatsConfig;
    use crate::outcomes::Table;
    use crate::types::{MarketSnapshot, SafetyResult};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Market stub; `confirmed` reports T2-grade liquidity, flow and a 45 minute old pair
    struct StubMarket {
        price: Mutex<f64>,
        confirmed: bool,
    }

    #[async_trait]
    impl MarketDataProvider for StubMarket {
        async fn fetch_metrics(&self, entity_id: &str) -> Result<MarketSnapshot> {
            let mut s = MarketSnapshot::empty(entity_id, Utc::now());
            s.symbol = Some("CAT".into());
            s.price_usd = Some(*self.price.lock().unwrap());
            if self.confirmed {
                s.liquidity_usd = 60_000.0;
                s.volume24_usd = 300_000.0;
                s.market_cap_usd = 200_000.0;
                s.buys_h1 = 400;
                s.sells_h1 = 200;
                s.buy_sell_ratio_h1 = 2.0;
                s.price_change_m15 = 1.0;
                s.pair_created_at = Some(Utc::now() - ChronoDuration::minutes(45));
            } else {
                s.liquidity_usd = 20_000.0;
                s.volume24_usd = 50_000.0;
            }
            Ok(s)
        }
    }

    struct StubSafety(SafetyResult);

    #[async_trait]
    impl SafetyProbe for StubSafety {
        async fn fetch_safety(&self, _entity_id: &str) -> Result<SafetyResult> {
            Ok(self.0)
        }
    }

    /// 100 equal holders of a 1M supply when `spread`, otherwise a failing probe
    struct StubHolders {
        spread: bool,
    }

    #[async_trait]
    impl HolderProbe for StubHolders {
        async fn fetch_supply_and_largest_holders(&self, _entity_id: &str) -> Result<(f64, Vec<f64>)> {
            if self.spread {
                Ok((1_000_000.0, vec![1_000.0; 100]))
            } else {
                Err(Error::ProbeFailure("not expected".into()))
            }
        }
    }

    struct StubBalance(f64);

    #[async_trait]
    impl BalanceProbe for StubBalance {
        async fn fetch_balance(&self, _wallet: &str, _entity_id: &str) -> Result<f64> {
            Ok(self.0)
        }
    }

    /// Records alerts in delivery order; T1 deliveries take `t1_delay`
    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(String, Tier, String)>>,
        t1_delay: Duration,
    }

    impl RecordingSink {
        fn tiers(&self) -> Vec<Tier> {
            self.sent.lock().unwrap().iter().map(|(_, tier, _)| *tier).collect()
        }
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        async fn send_alert(&self, entity_id: &str, tier: Tier, body: &str) -> Result<()> {
            if tier == Tier::T1 && !self.t1_delay.is_zero() {
                tokio::time::sleep(self.t1_delay).await;
            }
            self.sent
                .lock()
                .unwrap()
                .push((entity_id.to_string(), tier, body.to_string()));
            Ok(())
        }
    }

    struct Harness {
        engine: Engine,
        market: Arc<StubMarket>,
        sink: Arc<RecordingSink>,
        _dir: tempfile::TempDir,
    }

    const VIP_WALLET: &str = "So11111111111111111111111111111111111111112";

    fn harness() -> Harness {
        harness_with(false, Duration::ZERO)
    }

    /// `confirmed` makes every T2 gate pass once a VIP wallet holds the entity
    fn harness_with(confirmed: bool, t1_delay: Duration) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.state.path = dir.path().join("state.json");
        config.stats = StatsConfig {
            dir: dir.path().join("stats"),
            db_path: dir.path().join("stats").join("stats.db"),
            roi_horizons_min: vec![15],
            ..StatsConfig::default()
        };
        config.vip.chunk_pause_ms = 0;

        let market = Arc::new(StubMarket {
            price: Mutex::new(1.0),
            confirmed,
        });
        let safety = if confirmed {
            SafetyResult {
                mint_authority_revoked: true,
                freeze_authority_revoked: true,
            }
        } else {
            SafetyResult::FAIL_CLOSED
        };
        let probes = Probes {
            market: market.clone(),
            safety: Arc::new(StubSafety(safety)),
            holders: Arc::new(StubHolders { spread: confirmed }),
            balances: Arc::new(StubBalance(if confirmed { 5.0 } else { 0.0 })),
        };
        let vip_wallets = if confirmed {
            vec![VIP_WALLET.to_string()]
        } else {
            Vec::new()
        };
        let sink = Arc::new(RecordingSink {
            t1_delay,
            ..Default::default()
        });
        let outcomes = OutcomeEngine::open(&config.stats, &config.forwarding, &config.http).unwrap();
        let engine = Engine::new(config, probes, vip_wallets, sink.clone(), Some(outcomes));

        Harness {
            engine,
            market,
            sink,
            _dir: dir,
        }
    }

    const CA: &str = "7GCihgDB8fe6KNjn2MYtkzZcRjQy3t9GHdC8uHYmW2hr";

    async fn mention_four_channels(engine: &Engine, t0: DateTime<Utc>) -> Vec<Option<Tier>> {
        let mut results = Vec::new();
        for (i, channel) in ["a", "b", "c", "d"].iter().enumerate() {
            let at = t0 - ChronoDuration::minutes(3 - i as i64);
            results.push(engine.process_mention_at(CA, channel, at).await.unwrap());
        }
        results
    }

    #[tokio::test]
    async fn test_four_channels_alert_t1() {
        let h = harness();
        let t0 = Utc::now();

        let results = mention_four_channels(&h.engine, t0).await;
        assert_eq!(results, vec![None, None, None, Some(Tier::T1)]);

        let sent = h.sink.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, Tier::T1);
        assert!(sent[0].2.starts_with("Consensus T1 - $CAT"));

        assert_eq!(h.engine.gate().last_sent_tier(CA), Some(Tier::T1));
        assert_eq!(h.engine.gate().tier1_reference_price(CA), Some(1.0));
        let outcomes = h.engine.outcomes().unwrap();
        assert_eq!(outcomes.store().count(Table::Signals).unwrap(), 1);
        assert_eq!(outcomes.baseline_price(CA), Some(1.0));

        // a fifth channel does not re-alert
        let again = h.engine.process_mention_at(CA, "e", t0).await.unwrap();
        assert_eq!(again, None);
        assert_eq!(h.sink.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_t1_after_t2_is_rejected() {
        let h = harness();
        assert!(h.engine.gate().try_upgrade(CA, Tier::T2, None).is_accepted());

        let results = mention_four_channels(&h.engine, Utc::now()).await;
        assert!(results.iter().all(Option::is_none));
        assert!(h.sink.sent.lock().unwrap().is_empty());
        assert_eq!(h.engine.gate().last_sent_tier(CA), Some(Tier::T2));
        assert_eq!(h.engine.gate().tier1_reference_price(CA), None);
        assert_eq!(h.engine.stats().upgrades_rejected.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_snapshot_cycle_derives_outcome() {
        let h = harness();
        let t0 = Utc::now();
        mention_four_channels(&h.engine, t0).await;

        *h.market.price.lock().unwrap() = 1.5;
        h.engine.snapshot_cycle(t0 + ChronoDuration::minutes(15)).await;

        let outcomes = h.engine.outcomes().unwrap();
        assert_eq!(outcomes.store().count(Table::Outcomes).unwrap(), 1);
        assert_eq!(h.engine.stats().outcomes.load(Ordering::Relaxed), 1);

        h.engine.snapshot_cycle(t0 + ChronoDuration::minutes(16)).await;
        assert_eq!(outcomes.store().count(Table::Outcomes).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let h = harness();
        mention_four_channels(&h.engine, Utc::now()).await;
        h.engine.shutdown().await;

        let restored = AlertGate::new();
        restored.restore(&StateStore::new(&h.engine.config.state.path).load().await);
        assert_eq!(restored.last_sent_tier(CA), Some(Tier::T1));
        assert!(!restored.try_upgrade(CA, Tier::T1, Some(2.0)).is_accepted());
    }

    #[tokio::test]
    async fn test_confirmed_entity_upgrades_to_t2() {
        let h = harness_with(true, Duration::ZERO);
        let t0 = Utc::now();

        let results = mention_four_channels(&h.engine, t0).await;
        assert_eq!(results, vec![None, None, None, Some(Tier::T1)]);

        // T2 waits for a VIP holder
        h.engine.vip_cycle(&CancellationToken::new()).await;
        let upgraded = h.engine.process_mention_at(CA, "e", t0).await.unwrap();
        assert_eq!(upgraded, Some(Tier::T2));

        assert_eq!(h.sink.tiers(), vec![Tier::T1, Tier::T2]);
        assert!(h.sink.sent.lock().unwrap()[1].2.starts_with("UPGRADE: T2 - $CAT"));
        assert_eq!(h.engine.gate().last_sent_tier(CA), Some(Tier::T2));
        assert_eq!(h.engine.gate().tier1_reference_price(CA), Some(1.0));

        let store = h.engine.outcomes().unwrap().store();
        assert_eq!(store.count(Table::Signals).unwrap(), 2);
        assert_eq!(store.count(Table::VipHolders).unwrap(), 1);
        assert!(store.count(Table::Holders).unwrap() >= 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_alerts_delivered_in_rank_order() {
        let Harness {
            engine, sink, _dir, ..
        } = harness_with(true, Duration::from_millis(300));
        let engine = Arc::new(engine);
        let t0 = Utc::now();

        for (i, channel) in ["a", "b", "c"].iter().enumerate() {
            let at = t0 - ChronoDuration::minutes(3 - i as i64);
            assert_eq!(engine.process_mention_at(CA, channel, at).await.unwrap(), None);
        }
        let slow = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.process_mention_at(CA, "d", t0).await })
        };

        // T1 accepted, its delivery still in flight
        tokio::time::timeout(Duration::from_secs(5), async {
            while engine.gate().last_sent_tier(CA) != Some(Tier::T1) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        engine.vip_cycle(&CancellationToken::new()).await;
        let upgraded = engine.process_mention_at(CA, "e", t0).await.unwrap();
        assert_eq!(upgraded, Some(Tier::T2));
        assert_eq!(slow.await.unwrap().unwrap(), Some(Tier::T1));

        assert_eq!(sink.tiers(), vec![Tier::T1, Tier::T2]);
    }

    #[tokio::test]
    async fn test_idle_alert_locks_are_pruned() {
        let h = harness();
        mention_four_channels(&h.engine, Utc::now()).await;
        assert_eq!(h.engine.alert_locks.len(), 1);
        h.engine.prune_cycle(Utc::now());
        assert!(h.engine.alert_locks.is_empty());
    }

    #[tokio::test]
    async fn test_empty_entity_rejected() {
        let h = harness();
        assert!(h.engine.process_mention("  ", "a").await.is_err());
    }

    #[tokio::test]
    async fn test_background_loops_stop_on_cancel() {
        let h = harness();
        let engine = Arc::new(h.engine);
        let cancel = CancellationToken::new();
        let handles = engine.spawn_background(cancel.clone());
        assert!(!handles.is_empty());

        cancel.cancel();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .unwrap()
                .unwrap();
        }
    }
}
