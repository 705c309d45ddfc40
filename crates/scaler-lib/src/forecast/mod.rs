//! Short-horizon trend forecasting
//!
//! This module provides:
//! - Linear-trend extrapolation per (target, metric) from stored samples
//! - Per-minute predictions with confidence decaying toward a 0.5 floor
//! - Fit accuracy (R²) of the trend over the lookback window

mod trend;

pub use trend::{linear_regression_slope, r_squared};

use crate::metrics::MetricStore;
use crate::span;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// Minimum number of samples before a forecast is produced
pub const MIN_SAMPLES: usize = 10;

/// Confidence never decays below this value
pub const CONFIDENCE_FLOOR: f64 = 0.5;

/// Confidence lost per predicted minute
const CONFIDENCE_DECAY_PER_STEP: f64 = 0.02;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// How far back samples feed the trend
    pub lookback_secs: u64,
    pub min_samples: usize,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            lookback_secs: 3600,
            min_samples: MIN_SAMPLES,
        }
    }
}

/// What to forecast; derived from predictive policies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForecastSpec {
    pub target_id: String,
    pub metric: String,
    pub look_ahead_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceForecast {
    pub target_id: String,
    pub metric: String,
    /// Ordered by timestamp, one per minute
    pub predictions: Vec<Prediction>,
    pub accuracy: f64,
    pub last_updated: DateTime<Utc>,
}

impl ResourceForecast {
    /// Highest predicted value at or above `min_confidence` strictly after `now`
    pub fn peak(&self, min_confidence: f64, now: DateTime<Utc>) -> Option<f64> {
        self.predictions
            .iter()
            .filter(|p| p.timestamp > now && p.confidence >= min_confidence)
            .map(|p| p.value)
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
    }
}

/// Build a forecast from chronologically ordered values
pub fn extrapolate(
    target_id: &str,
    metric: &str,
    values: &[f64],
    look_ahead_minutes: u32,
    now: DateTime<Utc>,
) -> Option<ResourceForecast> {
    let last = *values.last()?;
    let slope = linear_regression_slope(values);

    let predictions = (1..=look_ahead_minutes)
        .map_while(|i| {
            let step = f64::from(i);
            Some(Prediction {
                timestamp: span::after(now, u64::from(i) * 60)?,
                value: (last + slope * step).max(0.0),
                confidence: (1.0 - CONFIDENCE_DECAY_PER_STEP * step).max(CONFIDENCE_FLOOR),
            })
        })
        .collect();

    Some(ResourceForecast {
        target_id: target_id.to_string(),
        metric: metric.to_string(),
        predictions,
        accuracy: r_squared(values, slope),
        last_updated: now,
    })
}

/// Holds the latest forecast per (target, metric)
pub struct Forecaster {
    config: ForecastConfig,
    forecasts: RwLock<HashMap<(String, String), ResourceForecast>>,
}

impl Default for Forecaster {
    fn default() -> Self {
        Self::new(ForecastConfig::default())
    }
}

impl Forecaster {
    pub fn new(config: ForecastConfig) -> Self {
        Self {
            config,
            forecasts: RwLock::new(HashMap::new()),
        }
    }

    /// Recompute forecasts for every spec with enough history.
    ///
    /// Each produced forecast replaces the previous one for its key. Specs
    /// without enough samples keep whatever forecast they had.
    pub fn update(
        &self,
        store: &MetricStore,
        specs: &[ForecastSpec],
        now: DateTime<Utc>,
    ) -> Vec<ResourceForecast> {
        let since = span::before(now, self.config.lookback_secs).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut updated = Vec::new();

        for spec in specs {
            let values: Vec<f64> = store
                .values_between(&spec.target_id, &spec.metric, since, now)
                .into_iter()
                .map(|(_, v)| v)
                .collect();

            if values.len() < self.config.min_samples {
                debug!(
                    target_id = %spec.target_id,
                    metric = %spec.metric,
                    samples = values.len(),
                    required = self.config.min_samples,
                    "Insufficient samples for forecast"
                );
                continue;
            }

            if let Some(forecast) =
                extrapolate(&spec.target_id, &spec.metric, &values, spec.look_ahead_minutes, now)
            {
                self.forecasts
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert((spec.target_id.clone(), spec.metric.clone()), forecast.clone());
                updated.push(forecast);
            }
        }

        updated
    }

    pub fn get(&self, target_id: &str, metric: &str) -> Option<ResourceForecast> {
        self.forecasts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(target_id.to_string(), metric.to_string()))
            .cloned()
    }

    pub fn list(&self, target_id: Option<&str>) -> Vec<ResourceForecast> {
        let mut forecasts: Vec<ResourceForecast> = self
            .forecasts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|f| target_id.map_or(true, |t| f.target_id == t))
            .cloned()
            .collect();
        forecasts.sort_by(|a, b| (&a.target_id, &a.metric).cmp(&(&b.target_id, &b.metric)));
        forecasts
    }

    pub fn remove_target(&self, target_id: &str) -> usize {
        let mut forecasts = self.forecasts.write().unwrap_or_else(PoisonError::into_inner);
        let before = forecasts.len();
        forecasts.retain(|(t, _), _| t != target_id);
        before - forecasts.len()
    }

    pub fn count(&self) -> usize {
        self.forecasts.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn clear(&self) {
        self.forecasts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ScalingMetric;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn rising_store(samples: usize) -> MetricStore {
        let store = MetricStore::default();
        for i in 0..samples {
            store.record(ScalingMetric::new(
                "web",
                "cpu",
                40.0 + i as f64,
                now() - Duration::seconds(60 * (samples - i) as i64),
            ));
        }
        store
    }

    fn spec(look_ahead: u32) -> ForecastSpec {
        ForecastSpec {
            target_id: "web".into(),
            metric: "cpu".into(),
            look_ahead_minutes: look_ahead,
        }
    }

    #[test]
    fn test_positive_trend_rises_while_confidence_decays() {
        let store = rising_store(20);
        let forecaster = Forecaster::default();

        let updated = forecaster.update(&store, &[spec(40)], now());
        assert_eq!(updated.len(), 1);

        let forecast = forecaster.get("web", "cpu").unwrap();
        assert_eq!(forecast.predictions.len(), 40);
        assert!((forecast.accuracy - 1.0).abs() < 1e-9);

        for pair in forecast.predictions.windows(2) {
            assert!(pair[1].value > pair[0].value);
            assert!(pair[1].timestamp > pair[0].timestamp);
            if pair[0].confidence > CONFIDENCE_FLOOR {
                assert!(pair[1].confidence < pair[0].confidence);
            } else {
                assert_eq!(pair[1].confidence, CONFIDENCE_FLOOR);
            }
        }
        // 1 - 0.02 * 25 reaches the floor
        assert_eq!(forecast.predictions[24].confidence, CONFIDENCE_FLOOR);
        assert_eq!(forecast.predictions[39].confidence, CONFIDENCE_FLOOR);
        // last sample 59, slope 1
        assert!((forecast.predictions[0].value - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_predictions_never_negative() {
        let values: Vec<f64> = (0..10).map(|i| 9.0 - i as f64 * 3.0).map(|v| v.max(0.0)).collect();
        let forecast = extrapolate("web", "cpu", &values, 10, now()).unwrap();
        assert!(forecast.predictions.iter().all(|p| p.value >= 0.0));
    }

    #[test]
    fn test_insufficient_history_keeps_previous() {
        let forecaster = Forecaster::default();
        assert!(forecaster.update(&rising_store(9), &[spec(5)], now()).is_empty());
        assert_eq!(forecaster.count(), 0);

        forecaster.update(&rising_store(12), &[spec(5)], now());
        let first = forecaster.get("web", "cpu").unwrap();

        let later = now() + Duration::hours(3);
        assert!(forecaster.update(&rising_store(12), &[spec(5)], later).is_empty());
        assert_eq!(forecaster.get("web", "cpu").unwrap(), first);
    }

    #[test]
    fn test_peak_respects_confidence_and_time() {
        let values: Vec<f64> = (0..10).map(|i| i as f64 * 10.0).collect();
        let forecast = extrapolate("web", "cpu", &values, 30, now()).unwrap();

        // confidence >= 0.89 covers minutes 1..=5
        assert!((forecast.peak(0.89, now()).unwrap() - 140.0).abs() < 1e-9);
        assert_eq!(forecast.peak(0.99, now() + Duration::hours(1)), None);
    }

    #[test]
    fn test_remove_target() {
        let forecaster = Forecaster::default();
        forecaster.update(&rising_store(12), &[spec(5)], now());
        assert_eq!(forecaster.list(Some("web")).len(), 1);
        assert_eq!(forecaster.remove_target("web"), 1);
        assert!(forecaster.list(None).is_empty());
    }
}
