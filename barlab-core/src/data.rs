//! Data loading and synthetic data generation.
//!
//! `OhlcvFrame` is the canonical in-memory OHLCV table: six columns
//! (`date, open, high, low, close, volume`), rows ascending by date.
//! `load_csv` normalises common vendor header aliases before validation;
//! `make_sample_data` produces seeded regime-shaped random walks for tests
//! and demos.

use crate::domain::Bar;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Canonical column set, in order.
pub const COLUMNS: [&str; 6] = ["date", "open", "high", "low", "close", "volume"];

/// Errors from loading or validating OHLCV data.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("CSV 缺少必要列: {missing:?}。现有列: {present:?}")]
    MissingColumns {
        missing: Vec<String>,
        present: Vec<String>,
    },

    #[error("无法解析日期 '{0}'")]
    BadDate(String),

    #[error("第 {row} 行 {column} 列无法解析为数值: '{value}'")]
    BadNumber {
        row: usize,
        column: String,
        value: String,
    },

    #[error("数据为空")]
    Empty,

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The canonical OHLCV table. Columnar, immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OhlcvFrame {
    pub dates: Vec<NaiveDateTime>,
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
}

impl OhlcvFrame {
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Bar at row `index`. Caller guarantees `index < len()`.
    pub fn bar(&self, index: usize) -> Bar {
        Bar {
            datetime: self.dates[index],
            open: self.open[index],
            high: self.high[index],
            low: self.low[index],
            close: self.close[index],
            volume: self.volume[index],
            index,
        }
    }

    /// Rows `[0..=upto]` as an owned frame. The sandbox and indicator
    /// engine only ever see data truncated this way.
    pub fn truncated(&self, upto: usize) -> OhlcvFrame {
        let end = (upto + 1).min(self.len());
        OhlcvFrame {
            dates: self.dates[..end].to_vec(),
            open: self.open[..end].to_vec(),
            high: self.high[..end].to_vec(),
            low: self.low[..end].to_vec(),
            close: self.close[..end].to_vec(),
            volume: self.volume[..end].to_vec(),
        }
    }

    /// Write the frame as canonical CSV.
    pub fn write_csv(&self, path: &Path) -> Result<(), DataError> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(COLUMNS)?;
        for i in 0..self.len() {
            writer.write_record([
                self.dates[i].format("%Y-%m-%d").to_string(),
                format!("{}", self.open[i]),
                format!("{}", self.high[i]),
                format!("{}", self.low[i]),
                format!("{}", self.close[i]),
                format!("{:.0}", self.volume[i]),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }
}

// ── CSV loading ──────────────────────────────────────────────────────

/// Vendor header → canonical name. Covers Yahoo Finance, AKShare, Tushare
/// and similar export shapes.
fn canonical_header(raw: &str) -> String {
    match raw.trim() {
        "Open" => "open".into(),
        "High" => "high".into(),
        "Low" => "low".into(),
        "Close" | "Adj Close" | "adj_close" => "close".into(),
        "Volume" | "Vol" => "volume".into(),
        "Date" | "Datetime" | "datetime" | "timestamp" | "Timestamp" | "time" | "trade_date" => {
            "date".into()
        }
        other => other.to_string(),
    }
}

fn parse_date(raw: &str) -> Result<NaiveDateTime, DataError> {
    let trimmed = raw.trim();
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(dt);
        }
    }
    for fmt in ["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Ok(d.and_hms_opt(0, 0, 0).unwrap());
        }
    }
    Err(DataError::BadDate(trimmed.to_string()))
}

/// Load a CSV and normalise it to the canonical frame.
///
/// - Header aliases are mapped to canonical names.
/// - A date column is auto-detected when none maps directly (any header
///   containing "date" or "time", case-insensitive).
/// - The required `open/high/low/close/volume` set is validated; the error
///   lists both missing and present columns.
/// - Rows are sorted ascending by date.
pub fn load_csv(path: &Path) -> Result<OhlcvFrame, DataError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(canonical_header)
        .collect();

    if !headers.iter().any(|h| h == "date") {
        if let Some(pos) = headers.iter().position(|h| {
            let lower = h.to_lowercase();
            lower.contains("date") || lower.contains("time")
        }) {
            headers[pos] = "date".into();
        }
    }

    let required = ["open", "high", "low", "close", "volume", "date"];
    let missing: Vec<String> = required
        .iter()
        .filter(|r| !headers.iter().any(|h| h == *r))
        .map(|r| r.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(DataError::MissingColumns {
            missing,
            present: headers,
        });
    }

    let col = |name: &str| headers.iter().position(|h| h == name).unwrap();
    let (di, oi, hi, li, ci, vi) = (
        col("date"),
        col("open"),
        col("high"),
        col("low"),
        col("close"),
        col("volume"),
    );

    let mut rows: Vec<(NaiveDateTime, f64, f64, f64, f64, f64)> = Vec::new();
    for (row_idx, record) in reader.records().enumerate() {
        let record = record?;
        let num = |idx: usize, name: &str| -> Result<f64, DataError> {
            let raw = record.get(idx).unwrap_or("").trim();
            raw.parse::<f64>().map_err(|_| DataError::BadNumber {
                row: row_idx,
                column: name.to_string(),
                value: raw.to_string(),
            })
        };
        rows.push((
            parse_date(record.get(di).unwrap_or(""))?,
            num(oi, "open")?,
            num(hi, "high")?,
            num(li, "low")?,
            num(ci, "close")?,
            num(vi, "volume")?,
        ));
    }
    if rows.is_empty() {
        return Err(DataError::Empty);
    }

    rows.sort_by_key(|r| r.0);

    let mut frame = OhlcvFrame {
        dates: Vec::with_capacity(rows.len()),
        open: Vec::with_capacity(rows.len()),
        high: Vec::with_capacity(rows.len()),
        low: Vec::with_capacity(rows.len()),
        close: Vec::with_capacity(rows.len()),
        volume: Vec::with_capacity(rows.len()),
    };
    for (d, o, h, l, c, v) in rows {
        frame.dates.push(d);
        frame.open.push(o);
        frame.high.push(h);
        frame.low.push(l);
        frame.close.push(c);
        frame.volume.push(v);
    }
    Ok(frame)
}

// ── Synthetic data ───────────────────────────────────────────────────

/// Market regime for the synthetic generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    Random,
    Trending,
    MeanReverting,
    Volatile,
    /// Bull first half, bear second half.
    BullBear,
}

impl std::str::FromStr for Regime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random" => Ok(Regime::Random),
            "trending" => Ok(Regime::Trending),
            "mean_reverting" => Ok(Regime::MeanReverting),
            "volatile" => Ok(Regime::Volatile),
            "bull_bear" => Ok(Regime::BullBear),
            other => Err(format!(
                "未知 regime: {other:?}，可选: random, trending, mean_reverting, volatile, bull_bear"
            )),
        }
    }
}

impl Regime {
    /// Drift and volatility of daily log returns.
    fn params(self) -> (f64, f64) {
        match self {
            Regime::Random => (0.0003, 0.015),
            Regime::Trending => (0.002, 0.01),
            Regime::MeanReverting => (0.0, 0.02),
            Regime::Volatile => (0.0, 0.03),
            // BullBear switches params at the midpoint; handled in generation.
            Regime::BullBear => (0.0, 0.0),
        }
    }
}

/// Parameters for `make_sample_data`.
#[derive(Debug, Clone)]
pub struct SampleSpec {
    pub start: NaiveDate,
    pub periods: usize,
    pub initial_price: f64,
    pub seed: u64,
    pub regime: Regime,
}

impl Default for SampleSpec {
    fn default() -> Self {
        Self {
            start: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            periods: 252,
            initial_price: 150.0,
            seed: 42,
            regime: Regime::Random,
        }
    }
}

/// Standard normal sample via Box-Muller.
fn normal(rng: &mut StdRng, mean: f64, std: f64) -> f64 {
    let u1: f64 = 1.0 - rng.gen::<f64>(); // (0, 1], keeps ln() finite
    let u2: f64 = rng.gen::<f64>();
    let z = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
    mean + std * z
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Generate seeded synthetic OHLCV data with regime-shaped daily returns.
///
/// Dates walk forward over business days. Intraday range scales with the
/// close; volume scales with the absolute log return.
pub fn make_sample_data(spec: &SampleSpec) -> OhlcvFrame {
    let mut rng = StdRng::seed_from_u64(spec.seed);
    let n = spec.periods;

    // Daily log returns per regime
    let returns: Vec<f64> = match spec.regime {
        Regime::BullBear => {
            let mid = n / 2;
            (0..n)
                .map(|i| {
                    if i < mid {
                        normal(&mut rng, 0.003, 0.01)
                    } else {
                        normal(&mut rng, -0.002, 0.015)
                    }
                })
                .collect()
        }
        regime => {
            let (mu, sigma) = regime.params();
            (0..n).map(|_| normal(&mut rng, mu, sigma)).collect()
        }
    };

    // Close = initial * exp(cumsum(returns))
    let mut closes = Vec::with_capacity(n);
    let mut acc = 0.0;
    for r in &returns {
        acc += r;
        closes.push(spec.initial_price * acc.exp());
    }

    let mut frame = OhlcvFrame {
        dates: Vec::with_capacity(n),
        open: Vec::with_capacity(n),
        high: Vec::with_capacity(n),
        low: Vec::with_capacity(n),
        close: Vec::with_capacity(n),
        volume: Vec::with_capacity(n),
    };

    let mut date = spec.start;
    for i in 0..n {
        while matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            date += Duration::days(1);
        }
        let close = closes[i];
        let daily_range = close * rng.gen_range(0.005..0.025);
        let open = close * normal(&mut rng, 0.0, 0.003).exp();
        let high = close.max(open) + daily_range * rng.gen_range(0.3..1.0);
        let low = (close.min(open) - daily_range * rng.gen_range(0.3..1.0)).max(close * 0.5);
        let base_volume = rng.gen_range(5_000_000.0..50_000_000.0);
        let volume = (base_volume * (1.0 + returns[i].abs() * 20.0)).round();

        frame.dates.push(date.and_hms_opt(0, 0, 0).unwrap());
        frame.open.push(round2(open));
        frame.high.push(round2(high));
        frame.low.push(round2(low));
        frame.close.push(round2(close));
        frame.volume.push(volume);

        date += Duration::days(1);
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn sample_data_is_deterministic() {
        let spec = SampleSpec::default();
        let a = make_sample_data(&spec);
        let b = make_sample_data(&spec);
        assert_eq!(a.close, b.close);
        assert_eq!(a.volume, b.volume);
        assert_eq!(a.len(), 252);
    }

    #[test]
    fn sample_data_ohlc_is_sane() {
        let frame = make_sample_data(&SampleSpec::default());
        for i in 0..frame.len() {
            let bar = frame.bar(i);
            assert!(bar.is_sane(), "insane bar at {i}: {bar:?}");
        }
    }

    #[test]
    fn sample_data_skips_weekends() {
        let frame = make_sample_data(&SampleSpec {
            periods: 30,
            ..SampleSpec::default()
        });
        for d in &frame.dates {
            assert!(!matches!(d.weekday(), Weekday::Sat | Weekday::Sun));
        }
    }

    #[test]
    fn trending_regime_drifts_up() {
        let frame = make_sample_data(&SampleSpec {
            regime: Regime::Trending,
            ..SampleSpec::default()
        });
        assert!(frame.close[frame.len() - 1] > frame.close[0]);
    }

    #[test]
    fn truncated_limits_rows() {
        let frame = make_sample_data(&SampleSpec::default());
        let cut = frame.truncated(9);
        assert_eq!(cut.len(), 10);
        assert_eq!(cut.close[9], frame.close[9]);
    }

    #[test]
    fn load_csv_normalises_yahoo_headers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bars.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "Date,Open,High,Low,Close,Volume").unwrap();
        writeln!(f, "2024-01-03,101,106,100,105,1200").unwrap();
        writeln!(f, "2024-01-02,100,105,99,103,1000").unwrap();
        drop(f);

        let frame = load_csv(&path).unwrap();
        assert_eq!(frame.len(), 2);
        // Sorted ascending by date
        assert_eq!(frame.close[0], 103.0);
        assert_eq!(frame.close[1], 105.0);
    }

    #[test]
    fn load_csv_rejects_missing_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "date,open,close").unwrap();
        writeln!(f, "2024-01-02,100,103").unwrap();
        drop(f);

        match load_csv(&path) {
            Err(DataError::MissingColumns { missing, .. }) => {
                assert!(missing.contains(&"high".to_string()));
                assert!(missing.contains(&"volume".to_string()));
            }
            other => panic!("expected MissingColumns, got {other:?}"),
        }
    }

    #[test]
    fn load_csv_detects_odd_date_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odd.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "trading_date,open,high,low,close,volume").unwrap();
        writeln!(f, "2024-01-02,100,105,99,103,1000").unwrap();
        drop(f);

        let frame = load_csv(&path).unwrap();
        assert_eq!(frame.len(), 1);
    }

    #[test]
    fn csv_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("round.csv");
        let frame = make_sample_data(&SampleSpec {
            periods: 10,
            ..SampleSpec::default()
        });
        frame.write_csv(&path).unwrap();
        let loaded = load_csv(&path).unwrap();
        assert_eq!(loaded.len(), 10);
        assert_eq!(loaded.close, frame.close);
    }
}
