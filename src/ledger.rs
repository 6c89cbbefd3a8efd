//! Mention ledger
//!
//! Per-entity, time-ordered mention history bounded to a retention window.
//! Aggregates are computed on demand: distinct channels inside the overlap
//! window, velocity counts over short windows and a decay-weighted score.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::{HashSet, VecDeque};

use crate::config::SocialConfig;

/// One observation of an entity in a source channel
#[derive(Debug, Clone, PartialEq)]
pub struct Mention {
    pub timestamp: DateTime<Utc>,
    pub channel: String,
    pub weight: f64,
}

impl Mention {
    pub fn new(channel: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            channel: channel.into(),
            weight: 1.0,
        }
    }
}

/// Velocity count for one window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Velocity {
    pub window_min: u64,
    pub count: usize,
}

/// Snapshot of the ledger for one entity at a point in time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MentionAggregates {
    /// Mentions still inside the retention window
    pub mentions_total: usize,
    /// Distinct channels inside the overlap window
    pub unique_channels: usize,
    /// First distinct channel names (arrival order), at most three
    pub leading_channels: Vec<String>,
    /// Every distinct channel inside the retention window
    pub source_channels: Vec<String>,
    pub velocity: Vec<Velocity>,
    pub decayed_score: f64,
}

impl MentionAggregates {
    /// Velocity count for a window, zero if the window is not configured
    pub fn velocity_for(&self, window_min: u64) -> usize {
        self.velocity
            .iter()
            .find(|v| v.window_min == window_min)
            .map(|v| v.count)
            .unwrap_or(0)
    }
}

/// `2^(-age/half_life)`; ages at or below zero are not decayed
pub fn decay_multiplier(age_min: f64, half_life_min: f64) -> f64 {
    if age_min <= 0.0 {
        return 1.0;
    }
    let half_life = half_life_min.max(1.0);
    (-(age_min / half_life) * std::f64::consts::LN_2).exp()
}

pub struct MentionLedger {
    retention: Duration,
    overlap_window: Duration,
    velocity_windows_min: Vec<u64>,
    half_life_min: f64,
    entries: DashMap<String, VecDeque<Mention>>,
}

impl MentionLedger {
    pub fn new(config: &SocialConfig) -> Self {
        Self {
            retention: Duration::minutes(config.retention_min as i64),
            overlap_window: Duration::minutes(config.overlap_window_min as i64),
            velocity_windows_min: config.velocity_windows_min.clone(),
            half_life_min: config.decay_half_life_min,
            entries: DashMap::new(),
        }
    }

    /// Insert a mention, then drop everything older than the retention window
    pub fn append(&self, entity: &str, mention: Mention) {
        let cutoff = mention.timestamp - self.retention;
        let mut history = self.entries.entry(entity.to_string()).or_default();

        // Late arrivals keep the deque ordered
        let at = history.partition_point(|m| m.timestamp <= mention.timestamp);
        history.insert(at, mention);

        while let Some(front) = history.front() {
            if front.timestamp < cutoff {
                history.pop_front();
            } else {
                break;
            }
        }
    }

    /// Aggregates for `entity` as seen at `now`. Unknown entities yield empty aggregates.
    pub fn aggregates(&self, entity: &str, now: DateTime<Utc>) -> MentionAggregates {
        let Some(history) = self.entries.get(entity) else {
            return MentionAggregates {
                velocity: self
                    .velocity_windows_min
                    .iter()
                    .map(|w| Velocity {
                        window_min: *w,
                        count: 0,
                    })
                    .collect(),
                ..Default::default()
            };
        };

        let retention_cutoff = now - self.retention;
        let overlap_cutoff = now - self.overlap_window;

        let mut total = 0usize;
        let mut decayed = 0.0;
        let mut overlap_channels: HashSet<&str> = HashSet::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut source_channels = Vec::new();
        let mut velocity: Vec<Velocity> = self
            .velocity_windows_min
            .iter()
            .map(|w| Velocity {
                window_min: *w,
                count: 0,
            })
            .collect();

        for m in history.iter().filter(|m| m.timestamp >= retention_cutoff) {
            total += 1;
            let age_min = (now - m.timestamp).num_milliseconds() as f64 / 60_000.0;
            decayed += m.weight * decay_multiplier(age_min, self.half_life_min);

            if m.timestamp >= overlap_cutoff {
                overlap_channels.insert(m.channel.as_str());
            }
            for v in velocity.iter_mut() {
                if m.timestamp >= now - Duration::minutes(v.window_min as i64) {
                    v.count += 1;
                }
            }
            if seen.insert(m.channel.as_str()) {
                source_channels.push(m.channel.clone());
            }
        }

        MentionAggregates {
            mentions_total: total,
            unique_channels: overlap_channels.len(),
            leading_channels: source_channels.iter().take(3).cloned().collect(),
            source_channels,
            velocity,
            decayed_score: decayed,
        }
    }

    /// Entities currently holding at least one mention
    pub fn tracked_entities(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| !e.value().is_empty())
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired mentions everywhere and forget entities left empty
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.retention;
        for mut entry in self.entries.iter_mut() {
            let history = entry.value_mut();
            while history.front().is_some_and(|m| m.timestamp < cutoff) {
                history.pop_front();
            }
        }
        let before = self.entries.len();
        self.entries.retain(|_, history| !history.is_empty());
        before - self.entries.len()
    }

    /// When more than `max` entities are tracked, keep the `keep` most recently mentioned
    pub fn trim(&self, max: usize, keep: usize) -> usize {
        if self.entries.len() <= max {
            return 0;
        }
        let mut latest: Vec<(String, Option<DateTime<Utc>>)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().back().map(|m| m.timestamp)))
            .collect();
        latest.sort_by(|a, b| b.1.cmp(&a.1));

        let mut removed = 0;
        for (entity, _) in latest.into_iter().skip(keep) {
            if self.entries.remove(&entity).is_some() {
                removed += 1;
            }
        }
        removed
    }
}
