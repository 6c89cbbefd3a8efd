//! Short-lived market snapshot cache

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::warn;

use super::{CacheStats, TtlCache};
use crate::config::MarketConfig;
use crate::probes::MarketDataProvider;
use crate::types::MarketSnapshot;

pub struct MarketSnapshotCache {
    provider: Arc<dyn MarketDataProvider>,
    cache: TtlCache<MarketSnapshot>,
    ttl: Duration,
}

impl MarketSnapshotCache {
    pub fn new(provider: Arc<dyn MarketDataProvider>, config: &MarketConfig) -> Self {
        Self {
            provider,
            cache: TtlCache::new(config.cache_capacity),
            ttl: Duration::seconds(config.cache_ttl_secs as i64),
        }
    }

    /// Cached snapshot while younger than the TTL, else a fresh fetch.
    /// A failed fetch yields (and caches) a zeroed snapshot.
    pub async fn get_or_refresh(&self, entity_id: &str, now: DateTime<Utc>) -> MarketSnapshot {
        self.cache
            .get_or_insert_with(entity_id, now, || async {
                let snapshot = match self.provider.fetch_metrics(entity_id).await {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        warn!(entity = %entity_id, "Market fetch failed: {}", e);
                        MarketSnapshot::empty(entity_id, now)
                    }
                };
                (snapshot, Some(self.ttl))
            })
            .await
            .value
    }

    /// Last cached snapshot regardless of age
    pub async fn latest(&self, entity_id: &str) -> Option<MarketSnapshot> {
        self.cache.peek(entity_id).await.map(|e| e.value)
    }

    pub fn stats(&self) -> &CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingProvider {
        calls: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl MarketDataProvider for CountingProvider {
        async fn fetch_metrics(&self, entity_id: &str) -> Result<MarketSnapshot> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::TransientFetch("timeout".into()));
            }
            let mut s = MarketSnapshot::empty(entity_id, Utc::now());
            s.liquidity_usd = 1000.0 * (n + 1) as f64;
            s.price_usd = Some(1.0);
            Ok(s)
        }
    }

    #[tokio::test]
    async fn test_ttl_refresh() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicU32::new(0),
            fail: false,
        });
        let cache = MarketSnapshotCache::new(provider.clone(), &MarketConfig::default());
        let now = Utc::now();

        assert_eq!(cache.get_or_refresh("E", now).await.liquidity_usd, 1000.0);
        assert_eq!(
            cache.get_or_refresh("E", now + Duration::seconds(30)).await.liquidity_usd,
            1000.0
        );
        assert_eq!(
            cache.get_or_refresh("E", now + Duration::seconds(61)).await.liquidity_usd,
            2000.0
        );
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_yields_empty_snapshot() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicU32::new(0),
            fail: true,
        });
        let cache = MarketSnapshotCache::new(provider.clone(), &MarketConfig::default());
        let now = Utc::now();

        let snap = cache.get_or_refresh("E", now).await;
        assert!(snap.is_empty());
        assert_eq!(snap.entity_id, "E");
        // no retry loop inside the TTL
        cache.get_or_refresh("E", now + Duration::seconds(10)).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert!(cache.latest("E").await.is_some());
    }
}
