// DexScreener market data client
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::retry::{with_retries, RetryPolicy};
use super::{status_error, MarketDataProvider};
use crate::config::MarketConfig;
use crate::error::{Error, Result};
use crate::types::{buy_sell_ratio, MarketSnapshot};

#[derive(Debug, Clone, Deserialize)]
pub struct PriceChange {
    pub m5: Option<f64>,
    pub h1: Option<f64>,
    pub h6: Option<f64>,
    pub h24: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Txns {
    pub m5: Option<TxnCount>,
    pub h1: Option<TxnCount>,
    pub h24: Option<TxnCount>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TxnCount {
    pub buys: u64,
    pub sells: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Liquidity {
    pub usd: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Volume {
    pub h1: Option<f64>,
    pub h24: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BaseToken {
    pub address: String,
    pub symbol: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Boosts {
    pub active: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DexPair {
    #[serde(rename = "chainId")]
    pub chain_id: String,
    #[serde(rename = "pairAddress")]
    pub pair_address: String,
    #[serde(rename = "baseToken")]
    pub base_token: BaseToken,
    #[serde(rename = "priceUsd")]
    pub price_usd: Option<String>,
    #[serde(rename = "priceChange")]
    pub price_change: Option<PriceChange>,
    pub txns: Option<Txns>,
    pub volume: Option<Volume>,
    pub liquidity: Option<Liquidity>,
    #[serde(rename = "marketCap")]
    pub market_cap: Option<f64>,
    pub fdv: Option<f64>,
    #[serde(rename = "pairCreatedAt")]
    pub pair_created_at: Option<i64>,
    pub boosts: Option<Boosts>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenPairsResponse {
    pub pairs: Option<Vec<DexPair>>,
}

/// Pick the pair on the preferred chain, otherwise the first one listed
pub fn select_pair<'a>(pairs: &'a [DexPair], preferred_chain: &str) -> Option<&'a DexPair> {
    pairs
        .iter()
        .find(|p| p.chain_id == preferred_chain)
        .or_else(|| pairs.first())
}

/// Flatten a pair into the snapshot shape used everywhere else
pub fn snapshot_from_pair(entity_id: &str, pair: &DexPair, now: DateTime<Utc>) -> MarketSnapshot {
    let price_usd = pair
        .price_usd
        .as_deref()
        .and_then(|p| p.parse::<f64>().ok())
        .filter(|p| *p > 0.0);

    let (buys_h1, sells_h1) = pair
        .txns
        .as_ref()
        .and_then(|t| t.h1.as_ref())
        .map(|c| (c.buys, c.sells))
        .unwrap_or((0, 0));

    let change = pair.price_change.as_ref();
    let m5 = change.and_then(|c| c.m5);
    let h1 = change.and_then(|c| c.h1);

    MarketSnapshot {
        entity_id: entity_id.to_string(),
        timestamp: now,
        symbol: pair.base_token.symbol.clone(),
        price_usd,
        liquidity_usd: pair.liquidity.as_ref().and_then(|l| l.usd).unwrap_or(0.0),
        volume24_usd: pair.volume.as_ref().and_then(|v| v.h24).unwrap_or(0.0),
        volume1h_usd: pair.volume.as_ref().and_then(|v| v.h1).unwrap_or(0.0),
        market_cap_usd: pair.market_cap.or(pair.fdv).unwrap_or(0.0),
        buys_h1,
        sells_h1,
        buy_sell_ratio_h1: buy_sell_ratio(buys_h1, sells_h1),
        price_change_m5: m5.unwrap_or(0.0),
        // No 15m bucket upstream: the 5m change is the closest short-term trend, then 1h
        price_change_m15: m5.or(h1).unwrap_or(0.0),
        price_change_h1: h1.unwrap_or(0.0),
        pair_created_at: pair
            .pair_created_at
            .and_then(DateTime::from_timestamp_millis),
        trending: pair
            .boosts
            .as_ref()
            .and_then(|b| b.active)
            .is_some_and(|a| a > 0),
    }
}

/// DexScreener API client
pub struct DexScreenerClient {
    client: Client,
    base_url: String,
    preferred_chain: String,
    retry: RetryPolicy,
}

impl DexScreenerClient {
    pub fn new(config: &MarketConfig, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(retry.timeout + Duration::from_secs(1))
            .user_agent("consensus-tiers/0.1")
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.dexscreener_url.trim_end_matches('/').to_string(),
            preferred_chain: config.preferred_chain.clone(),
            retry,
        })
    }

    /// Get all pairs listed for a token
    pub async fn get_token_pairs(&self, mint: &str) -> Result<Vec<DexPair>> {
        let url = format!("{}/latest/dex/tokens/{}", self.base_url, mint);

        with_retries(&self.retry, "dexscreener", || async {
            let response = self
                .client
                .get(&url)
                .header("accept", "application/json")
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(status_error(status, &body));
            }

            let data: TokenPairsResponse = response.json().await?;
            Ok(data.pairs.unwrap_or_default())
        })
        .await
    }
}

#[async_trait]
impl MarketDataProvider for DexScreenerClient {
    async fn fetch_metrics(&self, entity_id: &str) -> Result<MarketSnapshot> {
        let now = Utc::now();
        let pairs = self.get_token_pairs(entity_id).await?;
        match select_pair(&pairs, &self.preferred_chain) {
            Some(pair) => Ok(snapshot_from_pair(entity_id, pair, now)),
            None => {
                debug!("No DexScreener pairs for {}", entity_id);
                Ok(MarketSnapshot::empty(entity_id, now))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAIRS_JSON: &str = r#"{
        "pairs": [
            {
                "chainId": "base",
                "pairAddress": "0xabc",
                "baseToken": {"address": "Mint111", "symbol": "WRONG"},
                "priceUsd": "9.0"
            },
            {
                "chainId": "solana",
                "pairAddress": "Pair111",
                "baseToken": {"address": "Mint111", "symbol": "CAT"},
                "priceUsd": "0.0042",
                "priceChange": {"m5": 3.5, "h1": -2.0, "h6": 10.0, "h24": 40.0},
                "txns": {"h1": {"buys": 450, "sells": 150}},
                "volume": {"h1": 12000.5, "h24": 250000.0},
                "liquidity": {"usd": 64000.0},
                "marketCap": 420000.0,
                "pairCreatedAt": 1700000000000,
                "boosts": {"active": 2}
            }
        ]
    }"#;

    #[test]
    fn test_select_prefers_chain() {
        let data: TokenPairsResponse = serde_json::from_str(PAIRS_JSON).unwrap();
        let pairs = data.pairs.unwrap();
        let pair = select_pair(&pairs, "solana").unwrap();
        assert_eq!(pair.pair_address, "Pair111");

        let fallback = select_pair(&pairs, "ethereum").unwrap();
        assert_eq!(fallback.pair_address, "0xabc");
        assert!(select_pair(&[], "solana").is_none());
    }

    #[test]
    fn test_snapshot_from_pair() {
        let data: TokenPairsResponse = serde_json::from_str(PAIRS_JSON).unwrap();
        let pairs = data.pairs.unwrap();
        let now = Utc::now();
        let snap = snapshot_from_pair("Mint111", &pairs[1], now);

        assert_eq!(snap.symbol.as_deref(), Some("CAT"));
        assert_eq!(snap.price_usd, Some(0.0042));
        assert_eq!(snap.liquidity_usd, 64000.0);
        assert_eq!(snap.volume24_usd, 250000.0);
        assert_eq!(snap.txns_h1(), 600);
        assert_eq!(snap.buy_sell_ratio_h1, 3.0);
        assert_eq!(snap.price_change_m15, 3.5);
        assert_eq!(snap.price_change_h1, -2.0);
        assert_eq!(
            snap.pair_created_at,
            DateTime::<Utc>::from_timestamp(1_700_000_000, 0)
        );
        assert!(snap.trending);
    }

    #[test]
    fn test_sparse_pair_defaults_to_zero() {
        let data: TokenPairsResponse = serde_json::from_str(PAIRS_JSON).unwrap();
        let pairs = data.pairs.unwrap();
        let snap = snapshot_from_pair("Mint111", &pairs[0], Utc::now());
        assert_eq!(snap.liquidity_usd, 0.0);
        assert_eq!(snap.txns_h1(), 0);
        assert_eq!(snap.pair_created_at, None);
        assert!(!snap.trending);
    }
}
