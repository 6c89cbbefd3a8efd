//! Tier classification
//!
//! Evaluates T3, then T2, then T1; the first tier whose gates all pass wins.
//! The classifier is pure: every external fact arrives through
//! [`EvaluationInput`], gathered by the engine beforehand. Forward-only
//! movement between tiers is enforced separately by the alert gate.

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::config::{Config, HoldersConfig, SocialConfig, T2Config, T3Config};
use crate::ledger::MentionAggregates;
use crate::probes::HolderProbe;
use crate::tier::Tier;
use crate::types::{HoldersSnapshot, MarketSnapshot, SafetyResult};

/// Outcome of the holder/whale concentration check
#[derive(Debug, Clone, PartialEq)]
pub enum HolderCheck {
    Pass(HoldersSnapshot),
    Fail(String),
    /// Not evaluated because no holder-gated tier was reachable
    Skipped,
}

impl HolderCheck {
    pub fn passed(&self) -> bool {
        matches!(self, HolderCheck::Pass(_))
    }

    pub fn snapshot(&self) -> Option<&HoldersSnapshot> {
        match self {
            HolderCheck::Pass(s) => Some(s),
            _ => None,
        }
    }
}

/// Judge an already fetched holder summary
pub fn judge_holders(snapshot: HoldersSnapshot, config: &HoldersConfig) -> HolderCheck {
    if snapshot.approx_unique_holders < config.threshold {
        return HolderCheck::Fail(format!(
            "{} holders < {}",
            snapshot.approx_unique_holders, config.threshold
        ));
    }
    if snapshot.largest_holder_pct > config.largest_wallet_max_pct {
        return HolderCheck::Fail(format!(
            "largest holder {:.1}% > {:.1}%",
            snapshot.largest_holder_pct, config.largest_wallet_max_pct
        ));
    }
    HolderCheck::Pass(snapshot)
}

/// Fetch supply and top balances and judge them. Any fetch error fails closed.
pub async fn check_holders(probe: &dyn HolderProbe, entity_id: &str, config: &HoldersConfig) -> HolderCheck {
    match probe.fetch_supply_and_largest_holders(entity_id).await {
        Ok((supply, balances)) => match HoldersSnapshot::from_balances(entity_id, supply, &balances) {
            Some(snapshot) => judge_holders(snapshot, config),
            None => HolderCheck::Fail(format!("non-positive supply {}", supply)),
        },
        Err(e) => {
            warn!(entity = %entity_id, "Holders/whale check failed: {}", e);
            HolderCheck::Fail(format!("probe error: {}", e))
        }
    }
}

/// Where an entity's age came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeSource {
    /// Minutes since the market pair was created
    Listing,
    /// Minutes since the first mention was seen
    Detection,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityAge {
    pub minutes: Option<f64>,
    pub source: AgeSource,
}

impl EntityAge {
    /// Listing age when the pair creation time is known, otherwise detection age
    pub fn resolve(
        pair_created_at: Option<DateTime<Utc>>,
        first_seen: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        let minutes_since = |t: DateTime<Utc>| ((now - t).num_seconds() as f64 / 60.0).max(0.0);
        match (pair_created_at, first_seen) {
            (Some(created), _) => Self {
                minutes: Some(minutes_since(created)),
                source: AgeSource::Listing,
            },
            (None, Some(seen)) => Self {
                minutes: Some(minutes_since(seen)),
                source: AgeSource::Detection,
            },
            (None, None) => Self {
                minutes: None,
                source: AgeSource::Unknown,
            },
        }
    }

    fn within(&self, min: f64, max: f64) -> bool {
        self.minutes.is_some_and(|m| m >= min && m <= max)
    }
}

/// Percentage decline from `peak`; zero without a positive peak
pub fn drawdown_pct(peak: f64, current: f64) -> f64 {
    if peak <= 0.0 {
        return 0.0;
    }
    ((peak - current) / peak * 100.0).max(0.0)
}

/// Everything the classifier looks at for one evaluation
#[derive(Debug, Clone)]
pub struct EvaluationInput<'a> {
    pub aggregates: &'a MentionAggregates,
    pub safety: SafetyResult,
    pub market: &'a MarketSnapshot,
    pub holders: &'a HolderCheck,
    pub vip_holders: usize,
    pub age: EntityAge,
    pub peak_liquidity: f64,
    pub tier1_reference_price: Option<f64>,
}

/// Classification result with the reasons higher tiers were not reached
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub tier: Option<Tier>,
    pub blocked: Vec<(Tier, Vec<String>)>,
}

pub struct TierClassifier {
    social: SocialConfig,
    holders: HoldersConfig,
    t2: T2Config,
    t3: T3Config,
    liquidity_floor: f64,
    safety_required: bool,
}

impl TierClassifier {
    pub fn new(config: &Config) -> Self {
        Self {
            social: config.social.clone(),
            holders: config.holders.clone(),
            t2: config.t2.clone(),
            t3: config.t3.clone(),
            liquidity_floor: config.market.liquidity_min_usd,
            safety_required: config.safety.mint_safety_required,
        }
    }

    pub fn holders_config(&self) -> &HoldersConfig {
        &self.holders
    }

    pub fn safety_ok(&self, safety: &SafetyResult) -> bool {
        !self.safety_required || safety.is_safe()
    }

    /// Whether T2 or T3 could pass on safety and age alone; the holder probe is skipped otherwise
    pub fn market_tiers_reachable(&self, safety: &SafetyResult, age: &EntityAge) -> bool {
        self.safety_ok(safety)
            && (age.within(self.t2.age_min_min, self.t2.age_max_min)
                || age.within(self.t3.age_min_min, self.t3.age_max_min))
    }

    pub fn evaluate(&self, input: &EvaluationInput<'_>) -> Decision {
        let mut blocked = Vec::new();

        let t3 = self.t3_blockers(input);
        if t3.is_empty() {
            return Decision {
                tier: Some(Tier::T3),
                blocked,
            };
        }
        blocked.push((Tier::T3, t3));

        let t2 = self.t2_blockers(input);
        if t2.is_empty() {
            return Decision {
                tier: Some(Tier::T2),
                blocked,
            };
        }
        blocked.push((Tier::T2, t2));

        let t1 = self.t1_blockers(input);
        if t1.is_empty() {
            return Decision {
                tier: Some(Tier::T1),
                blocked,
            };
        }
        blocked.push((Tier::T1, t1));

        Decision { tier: None, blocked }
    }

    fn t3_blockers(&self, input: &EvaluationInput<'_>) -> Vec<String> {
        let cfg = &self.t3;
        let m = input.market;
        let mut reasons = Vec::new();

        if !self.safety_ok(&input.safety) {
            reasons.push("safety".to_string());
        }
        if !input.age.within(cfg.age_min_min, cfg.age_max_min) {
            reasons.push(format!("age {:?}", input.age.minutes));
        }
        if m.market_cap_usd < cfg.market_cap_min_usd {
            reasons.push(format!("market cap {:.0}", m.market_cap_usd));
        }
        if m.volume24_usd < cfg.volume24_min_usd {
            reasons.push(format!("volume24 {:.0}", m.volume24_usd));
        }
        if let (Some(reference), Some(price)) = (input.tier1_reference_price, m.live_price()) {
            if reference > 0.0 {
                let multiple = price / reference;
                if !(multiple >= cfg.price_min_x && multiple < cfg.price_max_x) {
                    reasons.push(format!("price multiple {:.2}x", multiple));
                }
            }
        }
        if cfg.positive_trend_required && m.price_change_m15 <= 0.0 {
            reasons.push(format!("trend {:.2}%", m.price_change_m15));
        }
        if !input.holders.passed() {
            reasons.push("holders".to_string());
        }
        reasons
    }

    fn t2_blockers(&self, input: &EvaluationInput<'_>) -> Vec<String> {
        let cfg = &self.t2;
        let m = input.market;
        let mut reasons = Vec::new();

        if !self.safety_ok(&input.safety) {
            reasons.push("safety".to_string());
        }
        if !input.age.within(cfg.age_min_min, cfg.age_max_min) {
            reasons.push(format!("age {:?}", input.age.minutes));
        }
        if !input.holders.passed() {
            reasons.push("holders".to_string());
        }
        let floor = self.liquidity_floor.max(cfg.liquidity_min_usd);
        if m.liquidity_usd < floor {
            reasons.push(format!("liquidity {:.0} < {:.0}", m.liquidity_usd, floor));
        }
        let drawdown = drawdown_pct(input.peak_liquidity, m.liquidity_usd);
        if drawdown > cfg.drawdown_max_pct {
            reasons.push(format!("drawdown {:.1}%", drawdown));
        }
        if m.txns_h1() < cfg.txns_h1_min {
            reasons.push(format!("txns {}", m.txns_h1()));
        }
        if m.buy_sell_ratio_h1 < cfg.buy_sell_ratio_min {
            reasons.push(format!("buy/sell {:.2}", m.buy_sell_ratio_h1));
        }
        if input.vip_holders == 0 {
            reasons.push("no vip holder".to_string());
        }
        reasons
    }

    fn t1_blockers(&self, input: &EvaluationInput<'_>) -> Vec<String> {
        let unique = input.aggregates.unique_channels;
        if unique >= self.social.min_unique_channels_t1 {
            Vec::new()
        } else {
            vec![format!(
                "{} unique channels < {}",
                unique, self.social.min_unique_channels_t1
            )]
        }
    }
}
