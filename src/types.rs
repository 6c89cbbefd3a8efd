//! Shared data types for probes, caches and the classifier

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time market metrics for an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub entity_id: String,
    pub timestamp: DateTime<Utc>,
    pub symbol: Option<String>,
    pub price_usd: Option<f64>,
    pub liquidity_usd: f64,
    pub volume24_usd: f64,
    pub volume1h_usd: f64,
    pub market_cap_usd: f64,
    pub buys_h1: u64,
    pub sells_h1: u64,
    pub buy_sell_ratio_h1: f64,
    pub price_change_m5: f64,
    pub price_change_m15: f64,
    pub price_change_h1: f64,
    pub pair_created_at: Option<DateTime<Utc>>,
    pub trending: bool,
}

impl MarketSnapshot {
    /// Zeroed snapshot used when the provider has nothing (or failed)
    pub fn empty(entity_id: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            timestamp,
            symbol: None,
            price_usd: None,
            liquidity_usd: 0.0,
            volume24_usd: 0.0,
            volume1h_usd: 0.0,
            market_cap_usd: 0.0,
            buys_h1: 0,
            sells_h1: 0,
            buy_sell_ratio_h1: 0.0,
            price_change_m5: 0.0,
            price_change_m15: 0.0,
            price_change_h1: 0.0,
            pair_created_at: None,
            trending: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.price_usd.is_none() && self.liquidity_usd <= 0.0 && self.volume24_usd <= 0.0
    }

    pub fn txns_h1(&self) -> u64 {
        self.buys_h1 + self.sells_h1
    }

    /// Price only when strictly positive
    pub fn live_price(&self) -> Option<f64> {
        self.price_usd.filter(|p| *p > 0.0)
    }
}

/// `buys / sells`, or `buys` when nothing was sold
pub fn buy_sell_ratio(buys: u64, sells: u64) -> f64 {
    if sells == 0 {
        buys as f64
    } else {
        buys as f64 / sells as f64
    }
}

/// Mint authority state of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyResult {
    pub mint_authority_revoked: bool,
    pub freeze_authority_revoked: bool,
}

impl SafetyResult {
    /// Conservative result used when the probe gives no answer
    pub const FAIL_CLOSED: SafetyResult = SafetyResult {
        mint_authority_revoked: false,
        freeze_authority_revoked: false,
    };

    pub fn is_safe(&self) -> bool {
        self.mint_authority_revoked && self.freeze_authority_revoked
    }
}

/// Supply and concentration summary derived from the largest holders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldersSnapshot {
    pub entity_id: String,
    pub supply: f64,
    pub largest_holder_pct: f64,
    pub approx_unique_holders: usize,
}

impl HoldersSnapshot {
    /// Summarize raw holder balances. Returns `None` for a non-positive supply.
    pub fn from_balances(entity_id: &str, supply: f64, balances: &[f64]) -> Option<Self> {
        if supply <= 0.0 {
            return None;
        }
        let unique = balances.iter().filter(|b| **b > 0.0).count();
        let largest = balances.iter().copied().fold(0.0_f64, f64::max);
        Some(Self {
            entity_id: entity_id.to_string(),
            supply,
            largest_holder_pct: largest / supply * 100.0,
            approx_unique_holders: unique,
        })
    }
}
