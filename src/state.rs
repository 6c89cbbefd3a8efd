//! Durable alert state
//!
//! The gate's per-entity records are projected into a single JSON document
//! and written atomically (temp file + rename). A missing or corrupt file
//! never stops the engine: it starts from an empty state instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::tier::Tier;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    pub last_sent_tier: HashMap<String, Tier>,
    pub tier1_reference_price: HashMap<String, f64>,
    /// Unix seconds
    pub first_seen_ts: HashMap<String, i64>,
    pub peak_liquidity: HashMap<String, f64>,
    pub saved_at: Option<DateTime<Utc>>,
}

impl PersistedState {
    pub fn entity_count(&self) -> usize {
        self.last_sent_tier.len()
    }
}

pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load state from disk, falling back to the empty state
    pub async fn load(&self) -> PersistedState {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No state file at {}, starting fresh", self.path.display());
                return PersistedState::default();
            }
            Err(e) => {
                warn!("Failed to read state file {}: {}", self.path.display(), e);
                return PersistedState::default();
            }
        };

        match serde_json::from_str::<PersistedState>(&content) {
            Ok(state) => {
                info!(
                    "Loaded state for {} alerted entities from {}",
                    state.entity_count(),
                    self.path.display()
                );
                state
            }
            Err(e) => {
                warn!("Corrupt state file {}: {}", self.path.display(), e);
                PersistedState::default()
            }
        }
    }

    /// Atomically replace the state file
    pub async fn save(&self, state: &PersistedState) -> Result<()> {
        let mut state = state.clone();
        state.saved_at = Some(Utc::now());

        let json = serde_json::to_string_pretty(&state)
            .map_err(|e| Error::Storage(format!("Failed to serialize state: {}", e)))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Storage(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| Error::Storage(format!("Failed to write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            Error::Storage(format!("Failed to replace {}: {}", self.path.display(), e))
        })?;

        debug!("Saved state for {} entities", state.entity_count());
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_is_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        assert_eq!(store.load().await, PersistedState::default());
    }

    #[tokio::test]
    async fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("nested").join("state.json"));

        let mut state = PersistedState::default();
        state.last_sent_tier.insert("E".into(), Tier::T2);
        state.tier1_reference_price.insert("E".into(), 0.25);
        state.first_seen_ts.insert("E".into(), 1_700_000_000);
        state.peak_liquidity.insert("E".into(), 64_000.0);

        store.save(&state).await.unwrap();
        assert!(!store.tmp_path().exists());

        let loaded = store.load().await;
        assert_eq!(loaded.last_sent_tier.get("E"), Some(&Tier::T2));
        assert_eq!(loaded.tier1_reference_price.get("E"), Some(&0.25));
        assert_eq!(loaded.first_seen_ts.get("E"), Some(&1_700_000_000));
        assert_eq!(loaded.peak_liquidity.get("E"), Some(&64_000.0));
        assert!(loaded.saved_at.is_some());
    }

    #[tokio::test]
    async fn test_corrupt_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = StateStore::new(&path);
        assert_eq!(store.load().await, PersistedState::default());
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let state: PersistedState =
            serde_json::from_str(r#"{"last_sent_tier": {"E": "T1"}}"#).unwrap();
        assert_eq!(state.last_sent_tier.get("E"), Some(&Tier::T1));
        assert!(state.peak_liquidity.is_empty());
    }
}
