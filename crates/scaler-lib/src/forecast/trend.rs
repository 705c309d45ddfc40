//! Least-squares trend over evenly indexed samples (x = sample index)

/// Slope of the least-squares line through `(i, values[i])`
pub fn linear_regression_slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    if n < 2.0 {
        return 0.0;
    }

    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_xx = 0.0;

    for (i, y) in values.iter().enumerate() {
        let x = i as f64;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_xx += x * x;
    }

    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator.abs() < f64::EPSILON {
        return 0.0;
    }

    (n * sum_xy - sum_x * sum_y) / denominator
}

/// Coefficient of determination of the fit, clamped to `[0, 1]`.
///
/// A flat series that the line reproduces exactly counts as a perfect fit.
pub fn r_squared(values: &[f64], slope: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }

    let n = values.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n;
    let intercept = mean_y - slope * mean_x;

    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for (i, y) in values.iter().enumerate() {
        let predicted = slope * i as f64 + intercept;
        ss_res += (y - predicted).powi(2);
        ss_tot += (y - mean_y).powi(2);
    }

    if ss_tot.abs() < f64::EPSILON {
        return if ss_res.abs() < f64::EPSILON { 1.0 } else { 0.0 };
    }

    (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slope_of_straight_line() {
        let values: Vec<f64> = (0..10).map(|i| 5.0 + 2.0 * i as f64).collect();
        assert!((linear_regression_slope(&values) - 2.0).abs() < 1e-9);
        assert!((r_squared(&values, 2.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(linear_regression_slope(&[]), 0.0);
        assert_eq!(linear_regression_slope(&[3.0]), 0.0);
        assert_eq!(r_squared(&[4.0, 4.0, 4.0], 0.0), 1.0);
    }

    #[test]
    fn test_noisy_fit_is_partial() {
        let values = [1.0, 5.0, 2.0, 6.0, 3.0, 7.0];
        let slope = linear_regression_slope(&values);
        let r2 = r_squared(&values, slope);
        assert!(slope > 0.0);
        assert!(r2 > 0.0 && r2 < 1.0);
    }
}
