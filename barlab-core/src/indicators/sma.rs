//! Simple Moving Average (SMA).
//!
//! Rolling mean of the input over `period`. Lookback: period - 1.

/// Compute the SMA series. NaN until `period - 1`; NaN inputs taint their window.
pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n < period {
        return result;
    }

    for i in (period - 1)..n {
        let window = &values[i + 1 - period..=i];
        if window.iter().any(|v| v.is_nan()) {
            continue;
        }
        result[i] = window.iter().sum::<f64>() / period as f64;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, DEFAULT_EPSILON};

    #[test]
    fn sma_known_values() {
        let result = sma(&[10.0, 11.0, 12.0, 13.0, 14.0], 3);
        assert!(result[0].is_nan());
        assert!(result[1].is_nan());
        assert_approx(result[2], 11.0, DEFAULT_EPSILON);
        assert_approx(result[3], 12.0, DEFAULT_EPSILON);
        assert_approx(result[4], 13.0, DEFAULT_EPSILON);
    }

    #[test]
    fn sma_period_1_is_identity() {
        let result = sma(&[5.0, 6.0, 7.0], 1);
        assert_approx(result[0], 5.0, DEFAULT_EPSILON);
        assert_approx(result[2], 7.0, DEFAULT_EPSILON);
    }

    #[test]
    fn sma_short_input_all_nan() {
        let result = sma(&[1.0, 2.0], 5);
        assert!(result.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn sma_nan_taints_window() {
        let result = sma(&[10.0, f64::NAN, 12.0, 13.0, 14.0], 3);
        assert!(result[2].is_nan());
        assert!(result[3].is_nan());
        assert_approx(result[4], 13.0, DEFAULT_EPSILON);
    }
}
