//! Aggregation functions applied to metric windows

use crate::error::{ControllerError, Result};
use serde::{Deserialize, Serialize};

/// Aggregation applied to the samples of one evaluation window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Statistic {
    Average,
    Sum,
    Min,
    Max,
    /// Nearest-rank percentile; the rank comes from the condition's `percentile`
    Percentile,
}

impl Statistic {
    /// Compute the statistic over `values`.
    ///
    /// Returns `Ok(None)` for an empty window and an error when the
    /// percentile statistic is configured without a usable percentile.
    pub fn compute(&self, values: &[f64], percentile: Option<f64>) -> Result<Option<f64>> {
        if let Statistic::Percentile = self {
            match percentile {
                Some(p) if (0.0..=100.0).contains(&p) => {}
                Some(p) => {
                    return Err(ControllerError::InvalidConfig(format!(
                        "percentile {} outside [0, 100]",
                        p
                    )))
                }
                None => {
                    return Err(ControllerError::InvalidConfig(
                        "percentile statistic requires a percentile".to_string(),
                    ))
                }
            }
        }

        if values.is_empty() {
            return Ok(None);
        }

        let value = match self {
            Statistic::Average => values.iter().sum::<f64>() / values.len() as f64,
            Statistic::Sum => values.iter().sum(),
            Statistic::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Statistic::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Statistic::Percentile => {
                return Ok(percentile_nearest_rank(values, percentile.unwrap_or(100.0)))
            }
        };

        Ok(Some(value))
    }
}

/// Nearest-rank percentile: index `ceil(p/100 * n) - 1`, clamped to `[0, n-1]`
pub fn percentile_nearest_rank(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let n = sorted.len() as i64;
    let rank = ((p / 100.0) * n as f64).ceil() as i64 - 1;
    let idx = rank.clamp(0, n - 1) as usize;
    Some(sorted[idx])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_is_nearest_rank() {
        let values = [40.0, 10.0, 30.0, 20.0];
        assert_eq!(percentile_nearest_rank(&values, 50.0), Some(20.0));
        assert_eq!(
            Statistic::Percentile.compute(&values, Some(50.0)).unwrap(),
            Some(20.0)
        );
    }

    #[test]
    fn test_percentile_bounds_clamp() {
        let values = [1.0, 2.0, 3.0];
        assert_eq!(percentile_nearest_rank(&values, 0.0), Some(1.0));
        assert_eq!(percentile_nearest_rank(&values, 100.0), Some(3.0));
        assert_eq!(percentile_nearest_rank(&values, 99.0), Some(3.0));
        assert_eq!(percentile_nearest_rank(&[], 50.0), None);
    }

    #[test]
    fn test_basic_statistics() {
        let values = [2.0, 4.0, 9.0];
        assert_eq!(Statistic::Average.compute(&values, None).unwrap(), Some(5.0));
        assert_eq!(Statistic::Sum.compute(&values, None).unwrap(), Some(15.0));
        assert_eq!(Statistic::Min.compute(&values, None).unwrap(), Some(2.0));
        assert_eq!(Statistic::Max.compute(&values, None).unwrap(), Some(9.0));
    }

    #[test]
    fn test_empty_window_has_no_value() {
        assert_eq!(Statistic::Average.compute(&[], None).unwrap(), None);
    }

    #[test]
    fn test_percentile_without_rank_is_invalid() {
        assert!(Statistic::Percentile.compute(&[1.0], None).is_err());
        assert!(Statistic::Percentile.compute(&[1.0], Some(120.0)).is_err());
        // still invalid on an empty window
        assert!(Statistic::Percentile.compute(&[], None).is_err());
    }
}
