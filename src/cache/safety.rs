//! Memoized mint-safety results

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::warn;

use super::{CacheEntry, CacheStats, TtlCache};
use crate::config::{SafetyConfig, SafetyFailurePolicy};
use crate::probes::SafetyProbe;
use crate::types::SafetyResult;

/// Whether a cached safety answer came from the probe or from the fail-closed policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetySource {
    Probe,
    FailClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedSafety {
    pub result: SafetyResult,
    pub source: SafetySource,
}

pub struct SafetyCache {
    probe: Arc<dyn SafetyProbe>,
    cache: TtlCache<CachedSafety>,
    ttl: Option<Duration>,
    failure_ttl: Option<Duration>,
}

impl SafetyCache {
    pub fn new(probe: Arc<dyn SafetyProbe>, config: &SafetyConfig) -> Self {
        let ttl = (config.ttl_secs > 0).then(|| Duration::seconds(config.ttl_secs as i64));
        let failure_ttl = match config.failure_policy {
            SafetyFailurePolicy::Memoize => ttl,
            SafetyFailurePolicy::RetryAfter => Some(Duration::seconds(config.failure_retry_secs as i64)),
        };

        Self {
            probe,
            cache: TtlCache::new(config.cache_capacity),
            ttl,
            failure_ttl,
        }
    }

    /// Cached result, or one probe call whose outcome (success or fail-closed) is cached
    pub async fn get_or_compute(&self, entity_id: &str) -> SafetyResult {
        self.get_or_compute_at(entity_id, Utc::now()).await.value.result
    }

    pub async fn get_or_compute_at(&self, entity_id: &str, now: DateTime<Utc>) -> CacheEntry<CachedSafety> {
        self.cache
            .get_or_insert_with(entity_id, now, || async {
                match self.probe.fetch_safety(entity_id).await {
                    Ok(result) => (
                        CachedSafety {
                            result,
                            source: SafetySource::Probe,
                        },
                        self.ttl,
                    ),
                    Err(e) => {
                        warn!(entity = %entity_id, "Safety check failed, failing closed: {}", e);
                        (
                            CachedSafety {
                                result: SafetyResult::FAIL_CLOSED,
                                source: SafetySource::FailClosed,
                            },
                            self.failure_ttl,
                        )
                    }
                }
            })
            .await
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

    /// Fails the first `failures` calls, then reports both authorities revoked
    struct FlakyProbe {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl SafetyProbe for FlakyProbe {
        async fn fetch_safety(&self, _entity_id: &str) -> Result<SafetyResult> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(Error::TransientFetch("rpc down".into()))
            } else {
                Ok(SafetyResult {
                    mint_authority_revoked: true,
                    freeze_authority_revoked: true,
                })
            }
        }
    }

    fn probe(failures: u32) -> Arc<FlakyProbe> {
        Arc::new(FlakyProbe {
            failures,
            calls: AtomicU32::new(0),
        })
    }

    #[tokio::test]
    async fn test_success_is_memoized() {
        let p = probe(0);
        let cache = SafetyCache::new(p.clone(), &SafetyConfig::default());
        assert!(cache.get_or_compute("E").await.is_safe());
        assert!(cache.get_or_compute("E").await.is_safe());
        assert_eq!(p.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_memoize_policy_keeps_failure() {
        let p = probe(1);
        let config = SafetyConfig {
            failure_policy: SafetyFailurePolicy::Memoize,
            ..Default::default()
        };
        let cache = SafetyCache::new(p.clone(), &config);
        let now = Utc::now();

        let first = cache.get_or_compute_at("E", now).await;
        assert_eq!(first.value.source, SafetySource::FailClosed);
        assert!(!first.value.result.is_safe());

        let much_later = cache.get_or_compute_at("E", now + Duration::days(1)).await;
        assert_eq!(much_later.value.source, SafetySource::FailClosed);
        assert_eq!(p.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_after_policy_reprobes() {
        let p = probe(1);
        let config = SafetyConfig {
            failure_policy: SafetyFailurePolicy::RetryAfter,
            failure_retry_secs: 300,
            ..Default::default()
        };
        let cache = SafetyCache::new(p.clone(), &config);
        let now = Utc::now();

        assert!(!cache.get_or_compute_at("E", now).await.value.result.is_safe());
        // still inside the failure window
        assert!(!cache
            .get_or_compute_at("E", now + Duration::seconds(299))
            .await
            .value
            .result
            .is_safe());
        assert_eq!(p.calls.load(Ordering::SeqCst), 1);

        let retried = cache.get_or_compute_at("E", now + Duration::seconds(300)).await;
        assert_eq!(retried.value.source, SafetySource::Probe);
        assert!(retried.value.result.is_safe());
        // success is kept for the process lifetime by default
        let later = cache.get_or_compute_at("E", now + Duration::days(7)).await;
        assert_eq!(later.generation, retried.generation);
        assert_eq!(p.calls.load(Ordering::SeqCst), 2);
    }
}
