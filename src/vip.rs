//! VIP wallet reconciliation
//!
//! A curated list of wallets is checked against every tracked entity. Any
//! wallet holding a positive balance counts as corroborating evidence for
//! T2. Holder sets only grow: a wallet that later sells stays counted.

use dashmap::DashMap;
use futures::future::join_all;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::VipConfig;
use crate::probes::rpc::parse_pubkey;
use crate::probes::BalanceProbe;

/// Inline wallets plus the optional JSON file, deduplicated in order and capped
pub fn load_watch_list(config: &VipConfig) -> Vec<String> {
    let mut candidates: Vec<String> = config.wallets.clone();

    if let Some(path) = &config.wallets_file {
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<Value>(&content) {
                Ok(value) => candidates.extend(wallets_from_json(&value)),
                Err(e) => warn!("Invalid VIP wallets file {}: {}", path.display(), e),
            },
            Err(e) => warn!("Failed to read VIP wallets file {}: {}", path.display(), e),
        }
    }

    let mut seen = HashSet::new();
    let mut wallets = Vec::new();
    for wallet in candidates {
        let wallet = wallet.trim().to_string();
        if wallet.is_empty() || !seen.insert(wallet.clone()) {
            continue;
        }
        if let Err(e) = parse_pubkey(&wallet) {
            warn!("Dropping VIP wallet: {}", e);
            continue;
        }
        wallets.push(wallet);
    }
    if config.max_wallets > 0 {
        wallets.truncate(config.max_wallets);
    }
    wallets
}

/// Array of address strings or objects carrying `trackedWalletAddress` / `address`
fn wallets_from_json(value: &Value) -> Vec<String> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Object(obj) => obj
                .get("trackedWalletAddress")
                .or_else(|| obj.get("address"))
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
        .collect()
}

pub struct VipWatcher {
    wallets: Vec<String>,
    probe: Arc<dyn BalanceProbe>,
    holders: DashMap<String, HashSet<String>>,
    wallets_per_chunk: usize,
    chunk_pause: Duration,
    poll_interval: Duration,
}

impl VipWatcher {
    pub fn new(wallets: Vec<String>, probe: Arc<dyn BalanceProbe>, config: &VipConfig) -> Self {
        Self {
            wallets,
            probe,
            holders: DashMap::new(),
            wallets_per_chunk: config.wallets_per_chunk.max(1),
            chunk_pause: Duration::from_millis(config.chunk_pause_ms),
            poll_interval: Duration::from_secs(config.poll_secs.max(1)),
        }
    }

    pub fn wallets(&self) -> &[String] {
        &self.wallets
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn holder_count(&self, entity_id: &str) -> usize {
        self.holders.get(entity_id).map(|h| h.len()).unwrap_or(0)
    }

    /// Query every watched wallet for `entity_id`; returns wallets not seen as holders before
    pub async fn reconcile_entity(&self, entity_id: &str) -> Vec<String> {
        let mut found = Vec::new();
        let chunks: Vec<&[String]> = self.wallets.chunks(self.wallets_per_chunk).collect();

        for (i, chunk) in chunks.iter().enumerate() {
            let balances = join_all(
                chunk
                    .iter()
                    .map(|wallet| self.probe.fetch_balance(wallet, entity_id)),
            )
            .await;

            for (wallet, balance) in chunk.iter().zip(balances) {
                match balance {
                    Ok(amount) if amount > 0.0 => found.push(wallet.clone()),
                    Ok(_) => {}
                    Err(e) => debug!(entity = %entity_id, wallet = %wallet, "Balance query failed: {}", e),
                }
            }

            if i + 1 < chunks.len() && !self.chunk_pause.is_zero() {
                tokio::time::sleep(self.chunk_pause).await;
            }
        }

        let mut set = self.holders.entry(entity_id.to_string()).or_default();
        let new_holders: Vec<String> = found.into_iter().filter(|w| set.insert(w.clone())).collect();
        if !new_holders.is_empty() {
            info!(
                entity = %entity_id,
                new = new_holders.len(),
                total = set.len(),
                "VIP holders detected"
            );
        }
        new_holders
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::io::Write;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    const W1: &str = "So11111111111111111111111111111111111111112";
    const W2: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
    const W3: &str = "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCE8BenwNYB";

    #[derive(Default)]
    struct StubBalances {
        balances: Mutex<HashMap<String, f64>>,
        failing: HashSet<String>,
        calls: AtomicU32,
    }

    impl StubBalances {
        fn set(&self, wallet: &str, amount: f64) {
            self.balances.lock().unwrap().insert(wallet.to_string(), amount);
        }
    }

    #[async_trait]
    impl BalanceProbe for StubBalances {
        async fn fetch_balance(&self, wallet: &str, _entity_id: &str) -> Result<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.contains(wallet) {
                return Err(Error::TransientFetch("rpc down".into()));
            }
            Ok(*self.balances.lock().unwrap().get(wallet).unwrap_or(&0.0))
        }
    }

    fn config(per_chunk: usize) -> VipConfig {
        VipConfig {
            wallets_per_chunk: per_chunk,
            chunk_pause_ms: 0,
            ..VipConfig::default()
        }
    }

    #[test]
    fn test_watch_list_merges_and_dedupes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"["{W2}", {{"trackedWalletAddress": "{W3}"}}, {{"address": "{W1}"}}, 42]"#
        )
        .unwrap();

        let config = VipConfig {
            wallets: vec![W1.into(), "not-a-key".into(), W1.into()],
            wallets_file: Some(file.path().to_path_buf()),
            max_wallets: 2,
            ..VipConfig::default()
        };
        assert_eq!(load_watch_list(&config), vec![W1.to_string(), W2.to_string()]);
    }

    #[test]
    fn test_missing_file_keeps_inline_wallets() {
        let config = VipConfig {
            wallets: vec![W3.into()],
            wallets_file: Some("/nonexistent/vip.json".into()),
            ..VipConfig::default()
        };
        assert_eq!(load_watch_list(&config), vec![W3.to_string()]);
    }

    #[tokio::test]
    async fn test_reconcile_in_chunks() {
        let probe = Arc::new(StubBalances {
            failing: HashSet::from([W2.to_string()]),
            ..Default::default()
        });
        probe.set(W1, 10.0);
        probe.set(W3, 0.0);

        let wallets = vec![W1.to_string(), W2.to_string(), W3.to_string()];
        let watcher = VipWatcher::new(wallets, probe.clone(), &config(2));

        assert_eq!(watcher.reconcile_entity("E").await, vec![W1.to_string()]);
        assert_eq!(watcher.holder_count("E"), 1);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_holder_set_only_grows() {
        let probe = Arc::new(StubBalances::default());
        probe.set(W1, 5.0);
        let watcher = VipWatcher::new(vec![W1.into(), W2.into()], probe.clone(), &config(1));

        watcher.reconcile_entity("E").await;
        probe.set(W1, 0.0);
        probe.set(W2, 1.0);

        assert_eq!(watcher.reconcile_entity("E").await, vec![W2.to_string()]);
        assert_eq!(watcher.holder_count("E"), 2);
        // already known holders are not reported again
        assert!(watcher.reconcile_entity("E").await.is_empty());
        assert_eq!(watcher.holder_count("F"), 0);
    }
}
