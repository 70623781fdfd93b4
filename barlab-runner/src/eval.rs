//! Post-run evaluation — pure functions over the equity curve, trade log,
//! and decision list. No engine or LLM dependencies.

use barlab_core::domain::{Decision, TradeLogEntry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Aggregate performance metrics for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_return: f64,
    pub max_drawdown: f64,
    /// Longest bar run between successive new equity peaks.
    pub max_dd_duration: usize,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    pub volatility: f64,
    pub cagr: f64,
    pub win_rate: f64,
    /// Infinite when the run has no losing trade.
    pub profit_factor: f64,
    pub total_trades: usize,
    pub avg_trade_return: f64,
    pub best_trade: f64,
    pub worst_trade: f64,
    pub equity_curve: Vec<f64>,
}

impl PerformanceMetrics {
    /// Compute the full metric set. A curve shorter than 2 points produces
    /// all-zero metrics with the curve passed through.
    pub fn compute(equity_curve: &[f64], trade_log: &[TradeLogEntry]) -> Self {
        if equity_curve.len() < 2 {
            return Self::empty(equity_curve);
        }

        let initial = equity_curve[0];
        let final_eq = equity_curve[equity_curve.len() - 1];
        let total_return = if initial != 0.0 {
            (final_eq - initial) / initial
        } else {
            0.0
        };
        let returns = bar_returns(equity_curve);
        let max_dd = max_drawdown(equity_curve);

        let pnls: Vec<f64> = trade_log.iter().map(|t| t.pnl).collect();
        let total_trades = pnls.len();
        let (win_rate, profit_factor) = if total_trades == 0 {
            (0.0, 0.0)
        } else {
            let wins = pnls.iter().filter(|p| **p > 0.0).count();
            let gross_profit: f64 = pnls.iter().filter(|p| **p > 0.0).sum();
            let gross_loss: f64 = pnls.iter().filter(|p| **p < 0.0).map(|p| p.abs()).sum();
            let pf = if gross_loss == 0.0 {
                f64::INFINITY
            } else {
                round3(gross_profit / gross_loss)
            };
            (round3(wins as f64 / total_trades as f64), pf)
        };

        Self {
            total_return: round6(total_return),
            max_drawdown: round6(max_dd),
            max_dd_duration: max_dd_duration(equity_curve),
            sharpe_ratio: round4(sharpe_ratio(&returns)),
            sortino_ratio: round4(sortino_ratio(&returns)),
            calmar_ratio: round4(if max_dd == 0.0 {
                0.0
            } else {
                total_return / max_dd
            }),
            volatility: round4(std_pop(&returns) * TRADING_DAYS_PER_YEAR.sqrt()),
            cagr: round6(cagr(equity_curve)),
            win_rate,
            profit_factor,
            total_trades,
            avg_trade_return: if pnls.is_empty() {
                0.0
            } else {
                pnls.iter().sum::<f64>() / pnls.len() as f64
            },
            best_trade: if pnls.is_empty() {
                0.0
            } else {
                pnls.iter().copied().fold(f64::NEG_INFINITY, f64::max)
            },
            worst_trade: if pnls.is_empty() {
                0.0
            } else {
                pnls.iter().copied().fold(f64::INFINITY, f64::min)
            },
            equity_curve: equity_curve.to_vec(),
        }
    }

    fn empty(equity_curve: &[f64]) -> Self {
        Self {
            total_return: 0.0,
            max_drawdown: 0.0,
            max_dd_duration: 0,
            sharpe_ratio: 0.0,
            sortino_ratio: 0.0,
            calmar_ratio: 0.0,
            volatility: 0.0,
            cagr: 0.0,
            win_rate: 0.0,
            profit_factor: 0.0,
            total_trades: 0,
            avg_trade_return: 0.0,
            best_trade: 0.0,
            worst_trade: 0.0,
            equity_curve: equity_curve.to_vec(),
        }
    }
}

/// Compliance: decision action distribution and indicator usage, independent
/// of P&L.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub action_distribution: BTreeMap<String, usize>,
    pub decisions_with_indicators: usize,
    pub total_decisions: usize,
}

pub fn calc_compliance(decisions: &[Decision]) -> ComplianceReport {
    let mut distribution: BTreeMap<String, usize> = BTreeMap::new();
    let mut with_indicators = 0;
    for decision in decisions {
        *distribution.entry(decision.action.clone()).or_insert(0) += 1;
        if decision.used_indicators() {
            with_indicators += 1;
        }
    }
    ComplianceReport {
        action_distribution: distribution,
        decisions_with_indicators: with_indicators,
        total_decisions: decisions.len(),
    }
}

// ── Metric functions ─────────────────────────────────────────────────

/// Bar-over-bar returns; bars with a zero base are skipped.
pub fn bar_returns(curve: &[f64]) -> Vec<f64> {
    curve
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect()
}

/// Annualized Sharpe ratio (zero risk-free rate, population stddev).
pub fn sharpe_ratio(returns: &[f64]) -> f64 {
    let std = std_pop(returns);
    if std == 0.0 {
        return 0.0;
    }
    mean(returns) / std * TRADING_DAYS_PER_YEAR.sqrt()
}

/// Annualized Sortino ratio: downside_std = sqrt(mean(min(r, 0)²)).
pub fn sortino_ratio(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let downside_var =
        returns.iter().map(|r| r.min(0.0).powi(2)).sum::<f64>() / returns.len() as f64;
    let downside_std = downside_var.sqrt();
    if downside_std == 0.0 {
        return 0.0;
    }
    mean(returns) / downside_std * TRADING_DAYS_PER_YEAR.sqrt()
}

/// Max drawdown as a positive fraction, against the running peak.
pub fn max_drawdown(curve: &[f64]) -> f64 {
    let mut peak = match curve.first() {
        Some(v) => *v,
        None => return 0.0,
    };
    let mut max_dd = 0.0f64;
    for &v in curve {
        if v > peak {
            peak = v;
        }
        if peak != 0.0 {
            max_dd = max_dd.max((peak - v) / peak);
        }
    }
    max_dd
}

/// Longest run of bars since the last new equity peak.
pub fn max_dd_duration(curve: &[f64]) -> usize {
    let mut peak = f64::NEG_INFINITY;
    let mut current = 0usize;
    let mut longest = 0usize;
    for &v in curve {
        if v > peak {
            peak = v;
            current = 0;
        } else {
            current += 1;
            longest = longest.max(current);
        }
    }
    longest
}

/// Compound annual growth rate over n = len-1 bars at 252 bars/year.
pub fn cagr(curve: &[f64]) -> f64 {
    if curve.len() < 2 {
        return 0.0;
    }
    let initial = curve[0];
    let final_eq = curve[curve.len() - 1];
    if initial <= 0.0 || final_eq <= 0.0 {
        return 0.0;
    }
    let n = (curve.len() - 1) as f64;
    (final_eq / initial).powf(TRADING_DAYS_PER_YEAR / n) - 1.0
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (divide by N).
fn std_pop(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

fn round3(x: f64) -> f64 {
    (x * 1e3).round() / 1e3
}

fn round4(x: f64) -> f64 {
    (x * 1e4).round() / 1e4
}

fn round6(x: f64) -> f64 {
    (x * 1e6).round() / 1e6
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::BTreeMap as Map;

    fn trade(pnl: f64) -> TradeLogEntry {
        TradeLogEntry {
            symbol: "AAPL".into(),
            quantity: 100,
            buy_price: 100.0,
            sell_price: 100.0 + pnl / 100.0,
            pnl,
            commission: 0.0,
            datetime: NaiveDate::from_ymd_opt(2024, 1, 5)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            bar_index: 3,
        }
    }

    fn decision(action: &str, with_indicator: bool) -> Decision {
        let mut indicators = Map::new();
        if with_indicator {
            indicators.insert("RSI".to_string(), serde_json::json!({"value": 28.0}));
        }
        Decision {
            datetime: NaiveDate::from_ymd_opt(2024, 1, 5)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            bar_index: 1,
            action: action.into(),
            symbol: None,
            quantity: None,
            reasoning: String::new(),
            market_snapshot: serde_json::json!({}),
            account_snapshot: serde_json::json!({}),
            indicators_used: indicators,
            tool_calls: Vec::new(),
            order_result: None,
            model: String::new(),
            tokens_used: 0,
            latency_ms: 0.0,
        }
    }

    // ── Total return / drawdown ──

    #[test]
    fn total_return_known() {
        let m = PerformanceMetrics::compute(&[100_000.0, 105_000.0, 110_000.0], &[]);
        assert!((m.total_return - 0.1).abs() < 1e-10);
    }

    #[test]
    fn short_curve_is_all_zero() {
        let m = PerformanceMetrics::compute(&[100_000.0], &[]);
        assert_eq!(m.total_return, 0.0);
        assert_eq!(m.sharpe_ratio, 0.0);
        assert_eq!(m.equity_curve, vec![100_000.0]);
    }

    #[test]
    fn max_drawdown_known() {
        // Peak 110k, trough 90k → dd = 20k/110k
        let dd = max_drawdown(&[100_000.0, 110_000.0, 90_000.0, 95_000.0]);
        assert!((dd - 20_000.0 / 110_000.0).abs() < 1e-10);
    }

    #[test]
    fn max_drawdown_monotonic_is_zero() {
        let curve: Vec<f64> = (0..50).map(|i| 100_000.0 + i as f64 * 100.0).collect();
        assert_eq!(max_drawdown(&curve), 0.0);
    }

    #[test]
    fn dd_duration_counts_bars_between_peaks() {
        // Peaks at 0 and 4; 3 bars below in between, 1 after
        let curve = [100.0, 99.0, 98.0, 99.5, 101.0, 100.5];
        assert_eq!(max_dd_duration(&curve), 3);
    }

    #[test]
    fn dd_duration_zero_when_rising() {
        let curve: Vec<f64> = (0..10).map(|i| 100.0 + i as f64).collect();
        assert_eq!(max_dd_duration(&curve), 0);
    }

    // ── Ratios ──

    #[test]
    fn sharpe_zero_for_constant_returns() {
        let returns = vec![0.001; 100];
        assert_eq!(sharpe_ratio(&returns), 0.0);
    }

    #[test]
    fn sharpe_positive_for_positive_drift() {
        let returns: Vec<f64> = (0..100)
            .map(|i| if i % 2 == 0 { 0.002 } else { 0.0005 })
            .collect();
        assert!(sharpe_ratio(&returns) > 0.0);
    }

    #[test]
    fn sortino_zero_without_downside() {
        let returns = vec![0.001, 0.002, 0.0, 0.003];
        assert_eq!(sortino_ratio(&returns), 0.0);
    }

    #[test]
    fn sortino_positive_with_mixed_returns() {
        let returns = vec![0.01, -0.002, 0.008, -0.001, 0.005];
        assert!(sortino_ratio(&returns) > 0.0);
    }

    #[test]
    fn returns_skip_zero_base() {
        let returns = bar_returns(&[100.0, 0.0, 50.0]);
        assert_eq!(returns.len(), 1);
    }

    #[test]
    fn cagr_one_year_matches_total_return() {
        // 253 points = 252 bars = exactly one year
        let mut curve = vec![100_000.0];
        for _ in 0..252 {
            let last = *curve.last().unwrap();
            curve.push(last * 1.1f64.powf(1.0 / 252.0));
        }
        let c = cagr(&curve);
        assert!((c - 0.1).abs() < 1e-6, "expected ~10%, got {c}");
    }

    // ── Trade stats ──

    #[test]
    fn win_rate_and_profit_factor() {
        let trades = vec![trade(500.0), trade(-200.0), trade(300.0), trade(-100.0)];
        let m = PerformanceMetrics::compute(&[100_000.0, 100_500.0], &trades);
        assert!((m.win_rate - 0.5).abs() < 1e-10);
        // 800 profit / 300 loss
        assert!((m.profit_factor - round3(800.0 / 300.0)).abs() < 1e-10);
        assert_eq!(m.total_trades, 4);
        assert_eq!(m.best_trade, 500.0);
        assert_eq!(m.worst_trade, -200.0);
        assert!((m.avg_trade_return - 125.0).abs() < 1e-10);
    }

    #[test]
    fn profit_factor_infinite_without_losses() {
        let trades = vec![trade(500.0), trade(300.0)];
        let m = PerformanceMetrics::compute(&[100_000.0, 100_800.0], &trades);
        assert!(m.profit_factor.is_infinite());
        assert_eq!(m.win_rate, 1.0);
    }

    #[test]
    fn no_trades_zeroes_trade_stats() {
        let m = PerformanceMetrics::compute(&[100_000.0, 100_100.0], &[]);
        assert_eq!(m.total_trades, 0);
        assert_eq!(m.win_rate, 0.0);
        assert_eq!(m.profit_factor, 0.0);
        assert_eq!(m.avg_trade_return, 0.0);
    }

    #[test]
    fn calmar_is_return_over_drawdown() {
        let curve = vec![100_000.0, 110_000.0, 99_000.0, 120_000.0];
        let m = PerformanceMetrics::compute(&curve, &[]);
        let expected = m.total_return / m.max_drawdown;
        assert!((m.calmar_ratio - round4(expected)).abs() < 1e-9);
    }

    // ── Compliance ──

    #[test]
    fn compliance_counts_actions_and_indicators() {
        let decisions = vec![
            decision("buy", true),
            decision("hold", false),
            decision("hold", true),
            decision("sell", false),
        ];
        let report = calc_compliance(&decisions);
        assert_eq!(report.total_decisions, 4);
        assert_eq!(report.decisions_with_indicators, 2);
        assert_eq!(report.action_distribution["hold"], 2);
        assert_eq!(report.action_distribution["buy"], 1);
        assert_eq!(report.action_distribution["sell"], 1);
    }

    #[test]
    fn compliance_empty() {
        let report = calc_compliance(&[]);
        assert_eq!(report.total_decisions, 0);
        assert!(report.action_distribution.is_empty());
    }
}
