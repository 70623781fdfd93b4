//! Moving Average Convergence Divergence (MACD).
//!
//! MACD line: EMA(close, fast) - EMA(close, slow).
//! Signal line: EMA(macd_line, signal) — tolerates the MACD warmup NaNs.
//! Histogram: macd - signal.

use super::ema::ema_of_series;

/// Compute the three MACD series: (macd, signal, histogram).
pub fn macd(
    close: &[f64],
    fast: usize,
    slow: usize,
    signal: usize,
) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let n = close.len();
    let fast_ema = ema_of_series(close, fast);
    let slow_ema = ema_of_series(close, slow);

    let macd_line: Vec<f64> = (0..n)
        .map(|i| {
            if fast_ema[i].is_nan() || slow_ema[i].is_nan() {
                f64::NAN
            } else {
                fast_ema[i] - slow_ema[i]
            }
        })
        .collect();

    let signal_line = ema_of_series(&macd_line, signal);

    let histogram: Vec<f64> = (0..n)
        .map(|i| {
            if macd_line[i].is_nan() || signal_line[i].is_nan() {
                f64::NAN
            } else {
                macd_line[i] - signal_line[i]
            }
        })
        .collect();

    (macd_line, signal_line, histogram)
}
