use crate::span;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Forecast-driven scale-out settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictiveConfig {
    pub metric: String,
    /// Per-instance value the target should stay under
    pub target_value: f64,
    #[serde(default = "default_look_ahead")]
    pub look_ahead_minutes: u32,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

fn default_look_ahead() -> u32 {
    15
}

fn default_min_confidence() -> f64 {
    0.7
}

/// Policy that lets demand and forecasts scale a target outside of rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingPolicy {
    pub id: String,
    pub target_id: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Resource type whose unmet demand triggers a scale-up
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default = "default_adjustment")]
    pub scale_up_adjustment: u32,
    #[serde(default)]
    pub cooldown_secs: u64,
    #[serde(default)]
    pub last_triggered: Option<DateTime<Utc>>,
    #[serde(default)]
    pub predictive: Option<PredictiveConfig>,
}

fn default_enabled() -> bool {
    true
}

fn default_adjustment() -> u32 {
    1
}

impl ScalingPolicy {
    pub fn new(id: impl Into<String>, target_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            target_id: target_id.into(),
            enabled: true,
            resource_type: None,
            scale_up_adjustment: 1,
            cooldown_secs: 0,
            last_triggered: None,
            predictive: None,
        }
    }

    pub fn for_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    pub fn with_adjustment(mut self, adjustment: u32) -> Self {
        self.scale_up_adjustment = adjustment;
        self
    }

    pub fn with_cooldown(mut self, secs: u64) -> Self {
        self.cooldown_secs = secs;
        self
    }

    pub fn with_predictive(mut self, predictive: PredictiveConfig) -> Self {
        self.predictive = Some(predictive);
        self
    }

    pub fn covers(&self, resource_type: &str) -> bool {
        self.enabled && self.resource_type.as_deref() == Some(resource_type)
    }

    pub fn is_cooling_down(&self, now: DateTime<Utc>) -> bool {
        self.last_triggered
            .map_or(false, |last| !span::has_elapsed(last, now, self.cooldown_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_defaults_from_json() {
        let json = r#"{
            "id": "p1",
            "target_id": "web",
            "resource_type": "cpu",
            "predictive": {"metric": "cpu", "target_value": 70.0}
        }"#;
        let policy: ScalingPolicy = serde_json::from_str(json).unwrap();
        assert!(policy.enabled);
        assert_eq!(policy.scale_up_adjustment, 1);
        assert!(policy.covers("cpu"));
        assert!(!policy.covers("memory"));

        let predictive = policy.predictive.unwrap();
        assert_eq!(predictive.look_ahead_minutes, 15);
        assert_eq!(predictive.min_confidence, 0.7);
    }

    #[test]
    fn test_cooldown_with_huge_value() {
        let t0 = Utc::now();
        let mut policy = ScalingPolicy::new("p", "web").with_cooldown(60);
        policy.last_triggered = Some(t0);
        assert!(policy.is_cooling_down(t0 + chrono::Duration::seconds(59)));
        assert!(!policy.is_cooling_down(t0 + chrono::Duration::seconds(60)));

        policy.cooldown_secs = u64::MAX;
        assert!(policy.is_cooling_down(t0 + chrono::Duration::days(36_500)));
    }

    #[test]
    fn test_disabled_policy_covers_nothing() {
        let mut policy = ScalingPolicy::new("p", "web").for_resource_type("gpu");
        policy.enabled = false;
        assert!(!policy.covers("gpu"));
    }
}
