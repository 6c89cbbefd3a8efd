//! Monotonic alert gate
//!
//! Holds the per-entity classification state that must survive restarts:
//! the last tier alerted, the tier-1 reference price, the first-seen time and
//! the liquidity high-water mark. Every mutation happens under the entity's
//! map-entry guard, which makes `try_upgrade` a compare-and-set: of two
//! concurrent evaluations proposing the same tier, only one is accepted.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info};

use crate::state::PersistedState;
use crate::tier::Tier;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityRecord {
    pub last_sent_tier: Option<Tier>,
    /// Latched on the first accepted T1 with a live price; never overwritten
    pub tier1_reference_price: Option<f64>,
    pub first_seen: Option<DateTime<Utc>>,
    pub peak_liquidity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upgrade {
    Accepted { previous: Option<Tier> },
    Rejected { current: Option<Tier> },
}

impl Upgrade {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Upgrade::Accepted { .. })
    }
}

#[derive(Default)]
pub struct AlertGate {
    records: DashMap<String, EntityRecord>,
}

impl AlertGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `proposed` iff it ranks above the last tier sent; rejection leaves state untouched
    pub fn try_upgrade(&self, entity_id: &str, proposed: Tier, live_price: Option<f64>) -> Upgrade {
        let mut record = self.records.entry(entity_id.to_string()).or_default();
        let current = record.last_sent_tier;

        if proposed.rank() <= Tier::rank_of(current) {
            debug!(entity = %entity_id, proposed = %proposed, current = ?current, "Upgrade rejected");
            return Upgrade::Rejected { current };
        }

        record.last_sent_tier = Some(proposed);
        if proposed == Tier::T1 && record.tier1_reference_price.is_none() {
            if let Some(price) = live_price.filter(|p| *p > 0.0) {
                record.tier1_reference_price = Some(price);
                info!(entity = %entity_id, price, "Latched tier-1 reference price");
            }
        }
        Upgrade::Accepted { previous: current }
    }

    /// Raise the liquidity high-water mark if `liquidity` exceeds it; returns the peak
    pub fn observe_liquidity(&self, entity_id: &str, liquidity: f64) -> f64 {
        let mut record = self.records.entry(entity_id.to_string()).or_default();
        if liquidity > record.peak_liquidity {
            record.peak_liquidity = liquidity;
        }
        record.peak_liquidity
    }

    /// Record the first time an entity was seen; later calls keep the original time
    pub fn note_first_seen(&self, entity_id: &str, ts: DateTime<Utc>) -> DateTime<Utc> {
        let mut record = self.records.entry(entity_id.to_string()).or_default();
        *record.first_seen.get_or_insert(ts)
    }

    pub fn record(&self, entity_id: &str) -> Option<EntityRecord> {
        self.records.get(entity_id).map(|r| r.value().clone())
    }

    pub fn last_sent_tier(&self, entity_id: &str) -> Option<Tier> {
        self.records.get(entity_id).and_then(|r| r.last_sent_tier)
    }

    pub fn tier1_reference_price(&self, entity_id: &str) -> Option<f64> {
        self.records.get(entity_id).and_then(|r| r.tier1_reference_price)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Durable projection of every record
    pub fn snapshot(&self) -> PersistedState {
        let mut state = PersistedState::default();
        for entry in self.records.iter() {
            let (id, r) = (entry.key(), entry.value());
            if let Some(tier) = r.last_sent_tier {
                state.last_sent_tier.insert(id.clone(), tier);
            }
            if let Some(price) = r.tier1_reference_price {
                state.tier1_reference_price.insert(id.clone(), price);
            }
            if let Some(ts) = r.first_seen {
                state.first_seen_ts.insert(id.clone(), ts.timestamp());
            }
            if r.peak_liquidity > 0.0 {
                state.peak_liquidity.insert(id.clone(), r.peak_liquidity);
            }
        }
        state
    }

    /// Merge persisted state into the gate. Ranks and peaks only move up; latched values are kept.
    pub fn restore(&self, state: &PersistedState) {
        for (id, tier) in &state.last_sent_tier {
            let mut r = self.records.entry(id.clone()).or_default();
            if tier.rank() > Tier::rank_of(r.last_sent_tier) {
                r.last_sent_tier = Some(*tier);
            }
        }
        for (id, price) in &state.tier1_reference_price {
            let mut r = self.records.entry(id.clone()).or_default();
            if r.tier1_reference_price.is_none() && *price > 0.0 {
                r.tier1_reference_price = Some(*price);
            }
        }
        for (id, ts) in &state.first_seen_ts {
            if let Some(ts) = DateTime::from_timestamp(*ts, 0) {
                let mut r = self.records.entry(id.clone()).or_default();
                r.first_seen = Some(r.first_seen.map_or(ts, |seen| seen.min(ts)));
            }
        }
        for (id, peak) in &state.peak_liquidity {
            let mut r = self.records.entry(id.clone()).or_default();
            r.peak_liquidity = r.peak_liquidity.max(*peak);
        }
        info!("Restored alert state for {} entities", self.records.len());
    }
}
