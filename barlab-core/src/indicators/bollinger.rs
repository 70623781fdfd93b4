//! Bollinger Bands — SMA ± stddev multiplier.
//!
//! Uses population stddev (divide by N). Lookback: period - 1.

/// Compute the three band series: (upper, mid, lower).
pub fn bollinger(close: &[f64], period: usize, mult: f64) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let n = close.len();
    let mut upper = vec![f64::NAN; n];
    let mut mid = vec![f64::NAN; n];
    let mut lower = vec![f64::NAN; n];
    if period == 0 || n < period {
        return (upper, mid, lower);
    }

    for i in (period - 1)..n {
        let window = &close[i + 1 - period..=i];
        if window.iter().any(|v| v.is_nan()) {
            continue;
        }
        let mean = window.iter().sum::<f64>() / period as f64;
        let variance = window.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / period as f64;
        let stddev = variance.sqrt();
        mid[i] = mean;
        upper[i] = mean + mult * stddev;
        lower[i] = mean - mult * stddev;
    }
    (upper, mid, lower)
}
