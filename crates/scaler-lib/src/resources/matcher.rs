//! Candidate filtering and ranking for a single requirement
//!
//! Candidates must match the requirement type, have enough free capacity,
//! be allocatable and satisfy every hard constraint. Survivors are ranked by
//! the sum of satisfied preference weights (`weight / cost` for cost
//! preferences), highest first.

use super::{AttributeValue, Requirement, Resource};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Comparison used by constraints and match preferences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConstraintOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
    MatchesRegex,
    /// Resource tags must include every tag in the value
    Affinity,
    /// Resource tags must include none of the tags in the value
    AntiAffinity,
}

/// A filter a candidate must satisfy to be eligible
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    /// Well-known field (`id`, `type`, `unit`, `status`, `available`,
    /// `capacity`, `allocated`) or attribute key. Ignored by tag operators.
    #[serde(default)]
    pub field: String,
    pub operator: ConstraintOperator,
    pub value: AttributeValue,
}

impl Constraint {
    pub fn new(
        field: impl Into<String>,
        operator: ConstraintOperator,
        value: impl Into<AttributeValue>,
    ) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn affinity(tags: impl Into<AttributeValue>) -> Self {
        Self::new("tags", ConstraintOperator::Affinity, tags)
    }

    pub fn anti_affinity(tags: impl Into<AttributeValue>) -> Self {
        Self::new("tags", ConstraintOperator::AntiAffinity, tags)
    }

    /// Evaluate against a resource. Missing fields only satisfy `not-equals`.
    pub fn evaluate(&self, resource: &Resource) -> bool {
        match self.operator {
            ConstraintOperator::Affinity => {
                self.value.as_set().iter().all(|tag| resource.tags.contains(tag))
            }
            ConstraintOperator::AntiAffinity => {
                !self.value.as_set().iter().any(|tag| resource.tags.contains(tag))
            }
            _ => {
                let actual = match field_value(resource, &self.field) {
                    Some(v) => v,
                    None => return self.operator == ConstraintOperator::NotEquals,
                };
                compare(&actual, self.operator, &self.value)
            }
        }
    }
}

fn field_value(resource: &Resource, field: &str) -> Option<AttributeValue> {
    match field {
        "id" => Some(AttributeValue::Text(resource.id.clone())),
        "type" => Some(AttributeValue::Text(resource.resource_type.clone())),
        "unit" => Some(AttributeValue::Text(resource.unit.clone())),
        "status" => Some(AttributeValue::Text(resource.status.to_string())),
        "available" => Some(AttributeValue::Number(resource.available)),
        "capacity" => Some(AttributeValue::Number(resource.capacity_total)),
        "allocated" => Some(AttributeValue::Number(resource.allocated)),
        "tags" => Some(AttributeValue::Set(resource.tags.clone())),
        key => resource.attributes.get(key).cloned(),
    }
}

fn compare(actual: &AttributeValue, op: ConstraintOperator, expected: &AttributeValue) -> bool {
    match op {
        ConstraintOperator::Equals => actual.loosely_equals(expected),
        ConstraintOperator::NotEquals => !actual.loosely_equals(expected),
        ConstraintOperator::GreaterThan => match (actual.as_number(), expected.as_number()) {
            (Some(a), Some(b)) => a > b,
            _ => false,
        },
        ConstraintOperator::LessThan => match (actual.as_number(), expected.as_number()) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        },
        ConstraintOperator::Contains => match actual {
            AttributeValue::Text(s) => expected.as_text().map_or(false, |needle| s.contains(needle)),
            AttributeValue::Set(set) => expected.as_set().is_subset(set),
            _ => false,
        },
        ConstraintOperator::MatchesRegex => {
            let (Some(text), Some(pattern)) = (actual.as_text(), expected.as_text()) else {
                return false;
            };
            match Regex::new(pattern) {
                Ok(re) => re.is_match(text),
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "Invalid constraint regex");
                    false
                }
            }
        }
        // Tag operators are handled before field lookup
        ConstraintOperator::Affinity | ConstraintOperator::AntiAffinity => false,
    }
}

/// How a preference scores a candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PreferenceRule {
    /// Adds the full weight when the constraint holds
    Match(Constraint),
    /// Adds `weight / cost`, where cost is a positive numeric attribute
    Cost { attribute: String },
}

/// A weighted soft criterion used to rank eligible candidates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preference {
    pub rule: PreferenceRule,
    pub weight: f64,
}

impl Preference {
    pub fn matching(constraint: Constraint, weight: f64) -> Self {
        Self {
            rule: PreferenceRule::Match(constraint),
            weight,
        }
    }

    pub fn lowest_cost(attribute: impl Into<String>, weight: f64) -> Self {
        Self {
            rule: PreferenceRule::Cost {
                attribute: attribute.into(),
            },
            weight,
        }
    }

    pub fn score(&self, resource: &Resource) -> f64 {
        match &self.rule {
            PreferenceRule::Match(constraint) => {
                if constraint.evaluate(resource) {
                    self.weight
                } else {
                    0.0
                }
            }
            PreferenceRule::Cost { attribute } => match resource
                .attributes
                .get(attribute)
                .and_then(AttributeValue::as_number)
            {
                Some(cost) if cost > 0.0 => self.weight / cost,
                _ => 0.0,
            },
        }
    }
}

/// An eligible resource with its preference score and grantable amount
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub resource_id: String,
    pub score: f64,
    pub amount: f64,
}

/// Filter and rank candidates for one requirement, best first.
///
/// A scalable requirement that no resource can serve in full falls back to
/// the largest grant in `[min, max]` each resource can offer.
pub fn rank_candidates<'a>(
    resources: impl Iterator<Item = &'a Resource> + Clone,
    requirement: &Requirement,
    constraints: &[Constraint],
    preferences: &[Preference],
) -> Vec<Candidate> {
    let eligible = |resource: &&Resource| {
        resource.resource_type == requirement.resource_type
            && resource.status.is_allocatable()
            && constraints.iter().all(|c| c.evaluate(resource))
    };

    let mut candidates: Vec<Candidate> = resources
        .clone()
        .filter(eligible)
        .filter(|r| r.available >= requirement.amount)
        .map(|r| Candidate {
            resource_id: r.id.clone(),
            score: score(r, preferences),
            amount: requirement.amount,
        })
        .collect();

    if candidates.is_empty() && requirement.scalable {
        let min = requirement.min.unwrap_or(0.0);
        let max = requirement.max.unwrap_or(requirement.amount);
        candidates = resources
            .filter(eligible)
            .filter_map(|r| {
                let amount = r.available.min(max);
                (amount > 0.0 && amount >= min).then(|| Candidate {
                    resource_id: r.id.clone(),
                    score: score(r, preferences),
                    amount,
                })
            })
            .collect();
    }

    // Stable sort keeps registry order among equal scores
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    candidates
}

fn score(resource: &Resource, preferences: &[Preference]) -> f64 {
    preferences.iter().map(|p| p.score(resource)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ResourceStatus;

    fn gpu(id: &str, available: f64) -> Resource {
        Resource::new(id, "gpu", 8.0, "cards").with_allocated(8.0 - available)
    }

    #[test]
    fn test_filters_by_type_capacity_and_status() {
        let resources = vec![
            gpu("g1", 1.0),
            gpu("g2", 4.0),
            gpu("g3", 8.0).with_status(ResourceStatus::Offline),
            Resource::new("c1", "cpu", 16.0, "cores"),
        ];
        let req = Requirement::new("gpu", 2.0, "cards");

        let ranked = rank_candidates(resources.iter(), &req, &[], &[]);
        let ids: Vec<&str> = ranked.iter().map(|c| c.resource_id.as_str()).collect();
        assert_eq!(ids, vec!["g2"]);
    }

    #[test]
    fn test_hard_constraints() {
        let resources = vec![
            gpu("g1", 8.0).with_attribute("zone", "us-east-1a"),
            gpu("g2", 8.0).with_attribute("zone", "eu-west-1b"),
        ];
        let req = Requirement::new("gpu", 1.0, "cards");

        let regex = Constraint::new("zone", ConstraintOperator::MatchesRegex, "^us-");
        let ranked = rank_candidates(resources.iter(), &req, &[regex], &[]);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].resource_id, "g1");

        let missing = Constraint::new("rack", ConstraintOperator::Equals, "r1");
        assert!(rank_candidates(resources.iter(), &req, &[missing], &[]).is_empty());

        let not_missing = Constraint::new("rack", ConstraintOperator::NotEquals, "r1");
        assert_eq!(rank_candidates(resources.iter(), &req, &[not_missing], &[]).len(), 2);
    }

    #[test]
    fn test_numeric_and_contains_constraints() {
        let r = gpu("g1", 6.0)
            .with_attribute("memory_gb", 80.0)
            .with_attribute("features", ["nvlink", "mig"]);

        assert!(Constraint::new("memory_gb", ConstraintOperator::GreaterThan, 40.0).evaluate(&r));
        assert!(!Constraint::new("memory_gb", ConstraintOperator::LessThan, 40.0).evaluate(&r));
        assert!(Constraint::new("available", ConstraintOperator::GreaterThan, 5.0).evaluate(&r));
        assert!(Constraint::new("features", ConstraintOperator::Contains, "mig").evaluate(&r));
        assert!(!Constraint::new("features", ConstraintOperator::Contains, "sxm").evaluate(&r));
    }

    #[test]
    fn test_affinity_and_anti_affinity() {
        let r = gpu("g1", 8.0).with_tag("prod").with_tag("ssd");

        assert!(Constraint::affinity(["prod", "ssd"]).evaluate(&r));
        assert!(!Constraint::affinity(["prod", "spot"]).evaluate(&r));
        assert!(Constraint::anti_affinity("spot").evaluate(&r));
        assert!(!Constraint::anti_affinity(["spot", "ssd"]).evaluate(&r));
    }

    #[test]
    fn test_preferences_rank_candidates() {
        let resources = vec![
            gpu("cheap", 8.0).with_attribute("cost", 4.0),
            gpu("pricey", 8.0).with_attribute("cost", 1.0).with_tag("fast"),
            gpu("plain", 8.0),
        ];
        let req = Requirement::new("gpu", 1.0, "cards");

        let prefs = vec![Preference::lowest_cost("cost", 2.0)];
        let ranked = rank_candidates(resources.iter(), &req, &[], &prefs);
        assert_eq!(ranked[0].resource_id, "pricey");
        assert!((ranked[0].score - 2.0).abs() < 1e-9);
        assert!((ranked[1].score - 0.5).abs() < 1e-9);
        assert_eq!(ranked[2].resource_id, "plain");

        let prefs = vec![
            Preference::lowest_cost("cost", 1.0),
            Preference::matching(Constraint::new("id", ConstraintOperator::Equals, "plain"), 5.0),
        ];
        let ranked = rank_candidates(resources.iter(), &req, &[], &prefs);
        assert_eq!(ranked[0].resource_id, "plain");
    }

    #[test]
    fn test_scalable_requirement_takes_partial_grant() {
        let resources = vec![gpu("g1", 3.0), gpu("g2", 1.0)];
        let req = Requirement::new("gpu", 4.0, "cards").scalable(2.0, 4.0);

        let ranked = rank_candidates(resources.iter(), &req, &[], &[]);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].resource_id, "g1");
        assert_eq!(ranked[0].amount, 3.0);

        let strict = Requirement::new("gpu", 4.0, "cards");
        assert!(rank_candidates(resources.iter(), &strict, &[], &[]).is_empty());
    }
}
