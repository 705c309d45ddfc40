//! Time-bounded sample storage
//!
//! Keeps one FIFO per (target, metric, label set) series. Samples older than
//! the retention window are evicted on every ingestion cycle, and each series
//! is capped so a noisy source cannot grow it without bound.

use super::{Labels, ScalingMetric};
use crate::span;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// Default retention window (1 hour)
const DEFAULT_RETENTION_SECS: u64 = 60 * 60;

/// Default per-series sample cap
const DEFAULT_MAX_SAMPLES: usize = 10_000;

/// Configuration for the metric store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricStoreConfig {
    /// Samples older than this are dropped
    pub retention_secs: u64,
    /// Maximum number of samples kept per series
    pub max_samples_per_series: usize,
}

impl Default for MetricStoreConfig {
    fn default() -> Self {
        Self {
            retention_secs: DEFAULT_RETENTION_SECS,
            max_samples_per_series: DEFAULT_MAX_SAMPLES,
        }
    }
}

/// Identity of a metric series
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesKey {
    pub target_id: String,
    pub metric: String,
    pub labels: Labels,
}

impl SeriesKey {
    fn of(sample: &ScalingMetric) -> Self {
        Self {
            target_id: sample.target_id.clone(),
            metric: sample.name.clone(),
            labels: sample.labels.clone(),
        }
    }
}

/// Append-only store of metric samples keyed by series
pub struct MetricStore {
    series: DashMap<SeriesKey, VecDeque<ScalingMetric>>,
    config: MetricStoreConfig,
}

impl Default for MetricStore {
    fn default() -> Self {
        Self::new(MetricStoreConfig::default())
    }
}

impl MetricStore {
    pub fn new(config: MetricStoreConfig) -> Self {
        Self {
            series: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &MetricStoreConfig {
        &self.config
    }

    /// Record a single sample
    pub fn record(&self, sample: ScalingMetric) {
        let mut entry = self.series.entry(SeriesKey::of(&sample)).or_default();
        let buffer = entry.value_mut();

        // Late samples are inserted in order; the common case is an append.
        match buffer.back() {
            Some(last) if last.timestamp > sample.timestamp => {
                let pos = buffer.partition_point(|m| m.timestamp <= sample.timestamp);
                buffer.insert(pos, sample);
            }
            _ => buffer.push_back(sample),
        }

        while buffer.len() > self.config.max_samples_per_series {
            buffer.pop_front();
        }
    }

    /// Record a batch of samples, returning how many were stored
    pub fn record_batch(&self, samples: impl IntoIterator<Item = ScalingMetric>) -> usize {
        let mut count = 0;
        for sample in samples {
            self.record(sample);
            count += 1;
        }
        count
    }

    /// Samples for `(target, metric)` with `timestamp >= since`, oldest first.
    ///
    /// Without `labels`, every label set of the metric is merged.
    pub fn query(
        &self,
        target_id: &str,
        metric: &str,
        labels: Option<&Labels>,
        since: DateTime<Utc>,
    ) -> Vec<ScalingMetric> {
        let mut samples: Vec<ScalingMetric> = self
            .series
            .iter()
            .filter(|entry| {
                let key = entry.key();
                key.target_id == target_id
                    && key.metric == metric
                    && labels.map_or(true, |l| &key.labels == l)
            })
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|m| m.timestamp >= since)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();

        samples.sort_by_key(|m| m.timestamp);
        samples
    }

    /// Values for `(target, metric)` with `start < timestamp <= end`
    pub fn values_between(
        &self,
        target_id: &str,
        metric: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<(DateTime<Utc>, f64)> {
        self.query(target_id, metric, None, start)
            .into_iter()
            .filter(|m| m.timestamp > start && m.timestamp <= end)
            .map(|m| (m.timestamp, m.value))
            .collect()
    }

    /// Every stored sample, optionally filtered by target and metric
    pub fn snapshot(
        &self,
        target_id: Option<&str>,
        metric: Option<&str>,
        since: DateTime<Utc>,
    ) -> Vec<ScalingMetric> {
        let mut samples: Vec<ScalingMetric> = self
            .series
            .iter()
            .filter(|entry| {
                let key = entry.key();
                target_id.map_or(true, |t| key.target_id == t)
                    && metric.map_or(true, |m| key.metric == m)
            })
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|m| m.timestamp >= since)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        samples.sort_by_key(|m| m.timestamp);
        samples
    }

    /// Most recent sample for `(target, metric)` across label sets
    pub fn latest(&self, target_id: &str, metric: &str) -> Option<ScalingMetric> {
        self.series
            .iter()
            .filter(|entry| entry.key().target_id == target_id && entry.key().metric == metric)
            .filter_map(|entry| entry.value().back().cloned())
            .max_by_key(|m| m.timestamp)
    }

    /// Drop samples older than the retention window. Returns the number evicted.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let Some(cutoff) = span::before(now, self.config.retention_secs) else {
            return 0;
        };
        let mut evicted = 0;

        for mut entry in self.series.iter_mut() {
            let buffer = entry.value_mut();
            while let Some(front) = buffer.front() {
                if front.timestamp < cutoff {
                    buffer.pop_front();
                    evicted += 1;
                } else {
                    break;
                }
            }
        }
        self.series.retain(|_, buffer| !buffer.is_empty());

        if evicted > 0 {
            debug!(evicted = evicted, "Evicted expired metric samples");
        }
        evicted
    }

    /// Remove every series belonging to a target
    pub fn remove_target(&self, target_id: &str) -> usize {
        let before = self.series.len();
        self.series.retain(|key, _| key.target_id != target_id);
        before - self.series.len()
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    pub fn sample_count(&self) -> usize {
        self.series.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn clear(&self) {
        self.series.clear();
    }
}
