//! Startup seed file
//!
//! A JSON document listing the targets, rules, policies, scheduled actions,
//! resources and pools the controller starts with. Every section is optional.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use scaler_lib::resources::Resource;
use scaler_lib::scaling::{ScalingPolicy, ScalingRule, ScalingTarget, ScheduledAction};
use scaler_lib::CapacityController;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct PoolSeed {
    pub id: String,
    pub name: String,
    pub resource_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Seed {
    pub targets: Vec<ScalingTarget>,
    pub rules: Vec<ScalingRule>,
    pub policies: Vec<ScalingPolicy>,
    pub scheduled_actions: Vec<ScheduledAction>,
    pub resources: Vec<Resource>,
    pub pools: Vec<PoolSeed>,
}

impl Seed {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading seed file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parsing seed file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Register everything with the controller. Targets and resources go
    /// first since rules, policies and pools refer to them.
    pub fn apply(self, controller: &CapacityController, now: DateTime<Utc>) -> Result<()> {
        for target in self.targets {
            let id = target.id.clone();
            controller
                .add_target(target)
                .with_context(|| format!("seeding target {}", id))?;
        }
        for resource in self.resources {
            let id = resource.id.clone();
            controller
                .add_resource(resource)
                .with_context(|| format!("seeding resource {}", id))?;
        }
        for pool in self.pools {
            controller
                .create_resource_pool(pool.id.clone(), pool.name, pool.resource_ids, now)
                .with_context(|| format!("seeding pool {}", pool.id))?;
        }
        for rule in self.rules {
            let id = rule.id.clone();
            controller
                .add_rule(rule)
                .with_context(|| format!("seeding rule {}", id))?;
        }
        for policy in self.policies {
            let id = policy.id.clone();
            controller
                .add_policy(policy)
                .with_context(|| format!("seeding policy {}", id))?;
        }
        for action in self.scheduled_actions {
            let id = action.id.clone();
            controller
                .add_scheduled_action(action)
                .with_context(|| format!("seeding scheduled action {}", id))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scaler_lib::scaling::ScalingEffector;
    use scaler_lib::ControllerConfig;
    use std::sync::Arc;

    struct NoopEffector;

    #[async_trait::async_trait]
    impl ScalingEffector for NoopEffector {
        async fn scale_target(&self, _target_id: &str, _desired: u32) -> anyhow::Result<bool> {
            Ok(true)
        }
    }

    const SEED: &str = r#"{
        "targets": [
            {"id": "web", "current_instances": 2, "min_instances": 1, "max_instances": 10}
        ],
        "resources": [
            {"id": "cpu-1", "type": "cpu", "capacity_total": 16, "unit": "cores",
             "attributes": {"zone": "us-east-1a"}}
        ],
        "pools": [
            {"id": "east", "name": "East compute", "resource_ids": ["cpu-1"]}
        ],
        "rules": [
            {
                "id": "cpu-high",
                "target_id": "web",
                "conditions": [
                    {"metric": "cpu", "statistic": "average", "threshold": 80,
                     "comparison_operator": "greater-than", "period_secs": 60,
                     "evaluation_periods": 2, "data_points_to_alarm": 2}
                ],
                "actions": [
                    {"type": "change-capacity", "adjustment_type": "absolute", "value": 2}
                ],
                "cooldown_secs": 300
            }
        ],
        "policies": [
            {"id": "web-cpu", "target_id": "web", "resource_type": "cpu"}
        ]
    }"#;

    #[test]
    fn test_seed_registers_everything() {
        let controller = CapacityController::new(ControllerConfig::default(), Arc::new(NoopEffector));
        let seed = Seed::parse(SEED).unwrap();
        seed.apply(&controller, Utc::now()).unwrap();

        let stats = controller.get_stats();
        assert_eq!(stats.targets, 1);
        assert_eq!(stats.resources, 1);
        assert_eq!(stats.pools, 1);
        assert_eq!(stats.rules, 1);
        assert_eq!(stats.policies, 1);
        assert_eq!(controller.get_resource("cpu-1").unwrap().available, 16.0);
    }

    #[test]
    fn test_rule_for_unknown_target_fails() {
        let controller = CapacityController::new(ControllerConfig::default(), Arc::new(NoopEffector));
        let seed = Seed::parse(
            r#"{"rules": [{"id": "r", "target_id": "ghost",
                "conditions": [{"metric": "cpu", "statistic": "max", "threshold": 1,
                    "comparison_operator": "less-than", "period_secs": 60,
                    "evaluation_periods": 1, "data_points_to_alarm": 1}],
                "actions": []}]}"#,
        )
        .unwrap();

        let err = seed.apply(&controller, Utc::now()).unwrap_err();
        assert!(err.to_string().contains("seeding rule r"));
    }

    #[test]
    fn test_empty_seed() {
        let seed = Seed::parse("{}").unwrap();
        assert!(seed.targets.is_empty());
        assert!(seed.pools.is_empty());
    }
}
