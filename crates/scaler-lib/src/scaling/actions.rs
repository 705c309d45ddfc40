use super::rules::{ActionKind, AdjustmentType};
use super::ScalingEventType;

impl ActionKind {
    /// Candidate instance count before clamping.
    ///
    /// `measured` is the value of the rule's first condition. Step and
    /// target-tracking actions yield `None` when no value is available, when
    /// no step matches, or when the ratio would be undefined.
    pub fn desired(&self, current: u32, measured: Option<f64>) -> Option<i64> {
        let current_i = i64::from(current);
        match self {
            ActionKind::ChangeCapacity {
                adjustment_type,
                value,
            } => {
                if !value.is_finite() {
                    return None;
                }
                Some(match adjustment_type {
                    AdjustmentType::Absolute => current_i + value.round() as i64,
                    AdjustmentType::Percentage => {
                        current_i + (f64::from(current) * value / 100.0).ceil() as i64
                    }
                    AdjustmentType::Exact => value.round() as i64,
                })
            }
            ActionKind::SetCapacity { capacity } => Some(i64::from(*capacity)),
            ActionKind::StepScaling { steps } => {
                let measured = measured?;
                steps
                    .iter()
                    .find(|s| s.contains(measured))
                    .map(|s| current_i + s.adjustment)
            }
            ActionKind::TargetTracking { target_value } => {
                let measured = measured?;
                if measured <= 0.0 || *target_value <= 0.0 {
                    return None;
                }
                let ratio = measured / target_value;
                Some((f64::from(current) / ratio).ceil() as i64)
            }
        }
    }

    /// Event type for a change from `previous` to `next`
    pub fn event_type(&self, previous: u32, next: u32) -> ScalingEventType {
        match self {
            ActionKind::SetCapacity { .. }
            | ActionKind::ChangeCapacity {
                adjustment_type: AdjustmentType::Exact,
                ..
            } => ScalingEventType::ScaleTo,
            _ => direction(previous, next),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ActionKind::ChangeCapacity {
                adjustment_type,
                value,
            } => format!("change-capacity {:?} {}", adjustment_type, value).to_lowercase(),
            ActionKind::SetCapacity { capacity } => format!("set-capacity {}", capacity),
            ActionKind::StepScaling { steps } => format!("step-scaling ({} steps)", steps.len()),
            ActionKind::TargetTracking { target_value } => {
                format!("target-tracking toward {}", target_value)
            }
        }
    }
}

pub(crate) fn direction(previous: u32, next: u32) -> ScalingEventType {
    if next >= previous {
        ScalingEventType::ScaleUp
    } else {
        ScalingEventType::ScaleDown
    }
}

/// Clamp a candidate count into `[min, max]`
pub fn clamp_instances(candidate: i64, min: u32, max: u32) -> u32 {
    let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
    candidate.clamp(i64::from(lo), i64::from(hi)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scaling::StepAdjustment;

    fn change(adjustment_type: AdjustmentType, value: f64) -> ActionKind {
        ActionKind::ChangeCapacity {
            adjustment_type,
            value,
        }
    }

    #[test]
    fn test_change_capacity() {
        assert_eq!(change(AdjustmentType::Absolute, 2.0).desired(2, None), Some(4));
        assert_eq!(change(AdjustmentType::Absolute, -3.0).desired(2, None), Some(-1));
        // ceil(3 * 50 / 100) = 2
        assert_eq!(change(AdjustmentType::Percentage, 50.0).desired(3, None), Some(5));
        // ceil(-1.5) = -1
        assert_eq!(change(AdjustmentType::Percentage, -50.0).desired(3, None), Some(2));
        assert_eq!(change(AdjustmentType::Exact, 7.0).desired(3, None), Some(7));
        assert_eq!(ActionKind::SetCapacity { capacity: 6 }.desired(1, None), Some(6));
    }

    #[test]
    fn test_step_scaling_picks_containing_band() {
        let action = ActionKind::StepScaling {
            steps: vec![
                StepAdjustment {
                    lower_bound: Some(70.0),
                    upper_bound: Some(85.0),
                    adjustment: 1,
                },
                StepAdjustment {
                    lower_bound: Some(85.0),
                    upper_bound: None,
                    adjustment: 3,
                },
            ],
        };
        assert_eq!(action.desired(4, Some(75.0)), Some(5));
        assert_eq!(action.desired(4, Some(85.0)), Some(7));
        assert_eq!(action.desired(4, Some(10.0)), None);
        assert_eq!(action.desired(4, None), None);
    }

    #[test]
    fn test_target_tracking() {
        let action = ActionKind::TargetTracking { target_value: 50.0 };
        // ratio 2 halves the count
        assert_eq!(action.desired(4, Some(100.0)), Some(2));
        // ratio 0.4: ceil(4 / 0.4) = 10
        assert_eq!(action.desired(4, Some(20.0)), Some(10));
        assert_eq!(action.desired(4, Some(0.0)), None);
        assert_eq!(ActionKind::TargetTracking { target_value: 0.0 }.desired(4, Some(10.0)), None);
    }

    #[test]
    fn test_clamp_and_event_type() {
        assert_eq!(clamp_instances(15, 1, 10), 10);
        assert_eq!(clamp_instances(-2, 1, 10), 1);
        assert_eq!(clamp_instances(5, 1, 10), 5);

        assert_eq!(
            change(AdjustmentType::Absolute, 1.0).event_type(2, 3),
            ScalingEventType::ScaleUp
        );
        assert_eq!(
            change(AdjustmentType::Absolute, -1.0).event_type(3, 2),
            ScalingEventType::ScaleDown
        );
        assert_eq!(
            ActionKind::SetCapacity { capacity: 2 }.event_type(3, 2),
            ScalingEventType::ScaleTo
        );
    }
}
