//! External telemetry probes
//!
//! Every probe is an async trait so the engine can be driven by the bundled
//! HTTP/RPC clients in production and by stubs in tests. Concrete clients
//! route their calls through [`retry::with_retries`], which applies the
//! shared timeout and linear backoff policy.

pub mod dexscreener;
pub mod retry;
pub mod rpc;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::error::{Error, Result};
use crate::types::{MarketSnapshot, SafetyResult};

pub use dexscreener::DexScreenerClient;
pub use retry::{with_retries, LinearBackoff, RetryPolicy};
pub use rpc::SolanaRpcClient;

/// Market data for an entity. A provider with no data returns an empty snapshot.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fetch_metrics(&self, entity_id: &str) -> Result<MarketSnapshot>;
}

/// Mint/freeze authority status
#[async_trait]
pub trait SafetyProbe: Send + Sync {
    async fn fetch_safety(&self, entity_id: &str) -> Result<SafetyResult>;
}

/// Total supply plus the balances of the largest holders
#[async_trait]
pub trait HolderProbe: Send + Sync {
    async fn fetch_supply_and_largest_holders(&self, entity_id: &str) -> Result<(f64, Vec<f64>)>;
}

/// Balance of `entity_id` held by `wallet`
#[async_trait]
pub trait BalanceProbe: Send + Sync {
    async fn fetch_balance(&self, wallet: &str, entity_id: &str) -> Result<f64>;
}

/// Map a non-success HTTP status to an error, retryable for throttling and server faults
pub(crate) fn status_error(status: StatusCode, body: &str) -> Error {
    let body: String = body.chars().take(200).collect();
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Error::TransientFetch(format!("HTTP {}: {}", status, body))
    } else {
        Error::ProbeFailure(format!("HTTP {}: {}", status, body))
    }
}
