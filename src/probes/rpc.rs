//! Solana JSON-RPC client for safety, holder and wallet-balance probes
//!
//! Calls are spread round-robin over the configured endpoints and share one
//! token-bucket limiter, so every probe together stays under `rpc.max_rps`.

use async_trait::async_trait;
use base64::Engine as _;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use solana_sdk::pubkey::Pubkey;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::retry::{with_retries, RetryPolicy};
use super::{status_error, BalanceProbe, HolderProbe, SafetyProbe};
use crate::config::RpcConfig;
use crate::error::{Error, Result};
use crate::types::SafetyResult;

/// Size of an SPL token mint account
pub const MINT_ACCOUNT_LEN: usize = 82;

// Mint layout: mint_authority COption<Pubkey> (4 + 32), supply u64, decimals u8,
// is_initialized bool, freeze_authority COption<Pubkey> (4 + 32)
const MINT_AUTHORITY_TAG: std::ops::Range<usize> = 0..4;
const FREEZE_AUTHORITY_TAG: std::ops::Range<usize> = 46..50;

/// Read the authority option tags of a mint account. A zero tag means the authority is revoked.
pub fn parse_mint_safety(data: &[u8]) -> Result<SafetyResult> {
    if data.len() < MINT_ACCOUNT_LEN {
        return Err(Error::ProbeFailure(format!(
            "Mint account data too short: {} bytes",
            data.len()
        )));
    }
    let tag = |range: std::ops::Range<usize>| -> u32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&data[range]);
        u32::from_le_bytes(bytes)
    };

    Ok(SafetyResult {
        mint_authority_revoked: tag(MINT_AUTHORITY_TAG) == 0,
        freeze_authority_revoked: tag(FREEZE_AUTHORITY_TAG) == 0,
    })
}

pub(crate) fn parse_pubkey(address: &str) -> Result<Pubkey> {
    Pubkey::from_str(address).map_err(|e| Error::InvalidAddress(format!("{}: {}", address, e)))
}

// Invalid request / invalid params: retrying cannot help
const NON_RETRYABLE_RPC_CODES: [i64; 2] = [-32600, -32602];

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct WithContext<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
struct AccountInfo {
    data: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UiTokenAmount {
    ui_amount: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct KeyedTokenAccount {
    account: serde_json::Value,
}

/// JSON-RPC client with endpoint rotation and a shared rate limiter
pub struct SolanaRpcClient {
    client: Client,
    endpoints: Vec<String>,
    next_endpoint: AtomicUsize,
    limiter: Arc<DefaultDirectRateLimiter>,
    retry: RetryPolicy,
}

impl SolanaRpcClient {
    pub fn new(config: &RpcConfig, retry: RetryPolicy) -> Result<Self> {
        if config.endpoints.is_empty() {
            return Err(Error::Config("No Solana RPC endpoints configured".to_string()));
        }
        let client = Client::builder()
            .timeout(retry.timeout + Duration::from_secs(1))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        let rps = NonZeroU32::new(config.max_rps).unwrap_or(NonZeroU32::MIN);
        let limiter = Arc::new(RateLimiter::direct(Quota::per_second(rps)));

        Ok(Self {
            client,
            endpoints: config.endpoints.clone(),
            next_endpoint: AtomicUsize::new(0),
            limiter,
            retry,
        })
    }

    fn endpoint(&self) -> &str {
        let idx = self.next_endpoint.fetch_add(1, Ordering::Relaxed) % self.endpoints.len();
        &self.endpoints[idx]
    }

    /// Issue one JSON-RPC call under the retry policy
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: serde_json::Value) -> Result<T> {
        with_retries(&self.retry, method, || self.call_once(method, params.clone())).await
    }

    async fn call_once<T: DeserializeOwned>(&self, method: &str, params: serde_json::Value) -> Result<T> {
        self.limiter.until_ready().await;

        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(self.endpoint())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let body: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("Failed to parse {} response: {}", method, e)))?;

        if let Some(err) = body.error {
            let msg = format!("{} failed ({}): {}", method, err.code, err.message);
            return Err(if NON_RETRYABLE_RPC_CODES.contains(&err.code) {
                Error::ProbeFailure(msg)
            } else {
                Error::Rpc(msg)
            });
        }

        body.result
            .ok_or_else(|| Error::ProbeFailure(format!("{} returned no result", method)))
    }

    /// Raw mint account bytes
    pub async fn get_mint_account(&self, mint: &str) -> Result<Vec<u8>> {
        parse_pubkey(mint)?;
        let result: WithContext<Option<AccountInfo>> = self
            .call(
                "getAccountInfo",
                serde_json::json!([mint, {"encoding": "base64"}]),
            )
            .await?;

        let account = result
            .value
            .ok_or_else(|| Error::ProbeFailure(format!("Mint account not found: {}", mint)))?;
        let encoded = account
            .data
            .first()
            .ok_or_else(|| Error::ProbeFailure("Account data missing".to_string()))?;

        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| Error::Serialization(format!("Invalid base64 account data: {}", e)))
    }
}

#[async_trait]
impl SafetyProbe for SolanaRpcClient {
    async fn fetch_safety(&self, entity_id: &str) -> Result<SafetyResult> {
        let data = self.get_mint_account(entity_id).await?;
        let result = parse_mint_safety(&data)?;
        debug!(
            entity = %entity_id,
            mint_revoked = result.mint_authority_revoked,
            freeze_revoked = result.freeze_authority_revoked,
            "Safety probe"
        );
        Ok(result)
    }
}

#[async_trait]
impl HolderProbe for SolanaRpcClient {
    async fn fetch_supply_and_largest_holders(&self, entity_id: &str) -> Result<(f64, Vec<f64>)> {
        parse_pubkey(entity_id)?;

        let supply: WithContext<UiTokenAmount> = self
            .call("getTokenSupply", serde_json::json!([entity_id]))
            .await?;
        let supply = supply.value.ui_amount.unwrap_or(0.0);

        let largest: WithContext<Vec<UiTokenAmount>> = self
            .call(
                "getTokenLargestAccounts",
                serde_json::json!([entity_id, {"commitment": "confirmed"}]),
            )
            .await?;
        let balances = largest
            .value
            .into_iter()
            .map(|a| a.ui_amount.unwrap_or(0.0))
            .collect();

        Ok((supply, balances))
    }
}

#[async_trait]
impl BalanceProbe for SolanaRpcClient {
    async fn fetch_balance(&self, wallet: &str, entity_id: &str) -> Result<f64> {
        parse_pubkey(wallet)?;
        parse_pubkey(entity_id)?;

        let accounts: WithContext<Vec<KeyedTokenAccount>> = self
            .call(
                "getTokenAccountsByOwner",
                serde_json::json!([wallet, {"mint": entity_id}, {"encoding": "jsonParsed"}]),
            )
            .await?;

        Ok(accounts
            .value
            .iter()
            .filter_map(|a| {
                a.account
                    .pointer("/data/parsed/info/tokenAmount/uiAmount")
                    .and_then(|v| v.as_f64())
            })
            .filter(|amount| *amount > 0.0)
            .sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mint_data(mint_tag: u32, freeze_tag: u32) -> Vec<u8> {
        let mut data = vec![0u8; MINT_ACCOUNT_LEN];
        data[0..4].copy_from_slice(&mint_tag.to_le_bytes());
        data[44] = 6; // decimals
        data[45] = 1; // is_initialized
        data[46..50].copy_from_slice(&freeze_tag.to_le_bytes());
        data
    }

    #[test]
    fn test_parse_mint_safety() {
        let revoked = parse_mint_safety(&mint_data(0, 0)).unwrap();
        assert!(revoked.is_safe());

        let live_mint = parse_mint_safety(&mint_data(1, 0)).unwrap();
        assert!(!live_mint.mint_authority_revoked);
        assert!(live_mint.freeze_authority_revoked);

        let live_freeze = parse_mint_safety(&mint_data(0, 1)).unwrap();
        assert!(live_freeze.mint_authority_revoked);
        assert!(!live_freeze.freeze_authority_revoked);
    }

    #[test]
    fn test_short_account_is_probe_failure() {
        let err = parse_mint_safety(&[0u8; 40]).unwrap_err();
        assert!(matches!(err, Error::ProbeFailure(_)));
    }

    #[test]
    fn test_parse_pubkey() {
        assert!(parse_pubkey("So11111111111111111111111111111111111111112").is_ok());
        assert!(matches!(
            parse_pubkey("not-a-key"),
            Err(Error::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_token_account_amounts() {
        let raw = serde_json::json!({
            "value": [
                {"pubkey": "a", "account": {"data": {"parsed": {"info": {"tokenAmount": {"uiAmount": 12.5}}}}}},
                {"pubkey": "b", "account": {"data": {"parsed": {"info": {"tokenAmount": {"uiAmount": 0.0}}}}}}
            ]
        });
        let parsed: WithContext<Vec<KeyedTokenAccount>> = serde_json::from_value(raw).unwrap();
        let total: f64 = parsed
            .value
            .iter()
            .filter_map(|a| a.account.pointer("/data/parsed/info/tokenAmount/uiAmount").and_then(|v| v.as_f64()))
            .sum();
        assert_eq!(total, 12.5);
    }

    #[test]
    fn test_rejects_empty_endpoints() {
        let config = RpcConfig {
            endpoints: vec![],
            max_rps: 10,
        };
        assert!(SolanaRpcClient::new(&config, RetryPolicy::default()).is_err());
    }
}
