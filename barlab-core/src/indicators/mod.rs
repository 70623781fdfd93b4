//! Technical indicator library.
//!
//! Series functions follow one convention: input slices in, `Vec<f64>` of the
//! same length out, NaN during warmup. The `IndicatorEngine` wraps them for
//! the `indicator_calc` tool: compute on the view truncated to the current
//! bar, return the latest value, NaN → null.

pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod rsi;
pub mod sma;

pub use atr::{atr, true_range, wilder_smooth};
pub use bollinger::bollinger;
pub use ema::{ema, ema_of_series};
pub use macd::macd;
pub use rsi::rsi;
pub use sma::sma;

use crate::data::OhlcvFrame;
use serde_json::{json, Value};
use thiserror::Error;

/// Names the `indicator_calc` tool accepts (upper-cased).
pub const AVAILABLE_INDICATORS: [&str; 6] = ["RSI", "SMA", "EMA", "ATR", "MACD", "BBANDS"];

#[derive(Debug, Error)]
pub enum IndicatorError {
    #[error("未知指标: {0}")]
    Unknown(String),
}

/// Last value of a series, warmup NaN mapped to `None`.
pub fn last_value(series: &[f64]) -> Option<f64> {
    series.last().copied().filter(|v| !v.is_nan())
}

fn opt_json(v: Option<f64>) -> Value {
    match v {
        Some(x) => json!(x),
        None => Value::Null,
    }
}

/// Look-ahead-safe indicator dispatch for the agent's `indicator_calc` tool.
///
/// Only rows `[0..=bar_index]` of the frame participate. Returns
/// `{"value": …}` for single-series indicators, `{"macd", "signal",
/// "histogram"}` for MACD, `{"upper", "mid", "lower"}` for BBANDS; values are
/// null when history is insufficient.
#[derive(Debug, Default)]
pub struct IndicatorEngine;

impl IndicatorEngine {
    pub fn calc(
        &self,
        name: &str,
        frame: &OhlcvFrame,
        bar_index: usize,
        period: usize,
    ) -> Result<Value, IndicatorError> {
        let end = (bar_index + 1).min(frame.len());
        let close = &frame.close[..end];

        match name.to_uppercase().as_str() {
            "RSI" => Ok(json!({ "value": opt_json(last_value(&rsi(close, period))) })),
            "SMA" => Ok(json!({ "value": opt_json(last_value(&sma(close, period))) })),
            "EMA" => Ok(json!({ "value": opt_json(last_value(&ema(close, period))) })),
            "ATR" => {
                let high = &frame.high[..end];
                let low = &frame.low[..end];
                let series = atr(high, low, close, period);
                Ok(json!({ "value": opt_json(last_value(&series)) }))
            }
            "MACD" => {
                let (macd_line, signal_line, histogram) = macd(close, 12, 26, 9);
                Ok(json!({
                    "macd": opt_json(last_value(&macd_line)),
                    "signal": opt_json(last_value(&signal_line)),
                    "histogram": opt_json(last_value(&histogram)),
                }))
            }
            "BBANDS" => {
                let (upper, mid, lower) = bollinger(close, period, 2.0);
                Ok(json!({
                    "upper": opt_json(last_value(&upper)),
                    "mid": opt_json(last_value(&mid)),
                    "lower": opt_json(last_value(&lower)),
                }))
            }
            _ => Err(IndicatorError::Unknown(name.to_string())),
        }
    }
}

/// Synthetic close series for tests.
#[cfg(test)]
pub fn make_frame(closes: &[f64]) -> OhlcvFrame {
    let base = chrono::NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
    let mut frame = OhlcvFrame {
        dates: Vec::new(),
        open: Vec::new(),
        high: Vec::new(),
        low: Vec::new(),
        close: Vec::new(),
        volume: Vec::new(),
    };
    for (i, &close) in closes.iter().enumerate() {
        let open = if i == 0 { close } else { closes[i - 1] };
        frame
            .dates
            .push((base + chrono::Duration::days(i as i64)).and_hms_opt(0, 0, 0).unwrap());
        frame.open.push(open);
        frame.high.push(open.max(close) + 1.0);
        frame.low.push(open.min(close) - 1.0);
        frame.close.push(close);
        frame.volume.push(1000.0);
    }
    frame
}

/// Assert two f64 values are approximately equal (within epsilon).
#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;
