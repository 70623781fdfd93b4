//! Buy-side risk gate.
//!
//! Four checks, in order: position-size cap, open-position count, portfolio
//! drawdown, daily loss. Sells always pass; so do buys that cover an existing
//! short (a close is never blocked).

use super::Engine;
use crate::domain::{Order, OrderSide};
use serde::{Deserialize, Serialize};

/// Why an order was refused, plus the retry hint for the position-size cap.
#[derive(Debug, Clone)]
pub struct RiskRejection {
    pub reason: String,
    pub max_allowed_qty: Option<i64>,
}

/// Condensed risk state injected into agent contexts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSummary {
    pub max_position_pct: f64,
    /// Crude estimate: floor(equity · max_position_pct / close), 0 when unknown.
    pub max_buy_qty: i64,
    pub max_open_positions: usize,
    pub open_positions: usize,
}

impl Engine {
    /// Evaluate the gate. `None` = pass.
    pub(crate) fn risk_check(&self, order: &Order) -> Option<RiskRejection> {
        if order.side != OrderSide::Buy {
            return None;
        }
        // Covering buys reduce exposure; closes always pass.
        if matches!(self.positions.get(&order.symbol), Some(p) if p.size < 0) {
            return None;
        }

        let close = self.current_price(&order.symbol).ok()?;
        let equity = self.equity_now();
        if equity <= 0.0 {
            return Some(RiskRejection {
                reason: "仓位超限".into(),
                max_allowed_qty: Some(0),
            });
        }

        // 1. Position-size cap, estimated with the current bar's close.
        let current_value = self
            .positions
            .get(&order.symbol)
            .map_or(0.0, |p| p.size as f64 * close);
        let new_pct = (current_value + close * order.quantity as f64) / equity;
        if new_pct > self.risk.max_position_pct {
            let max_allowed =
                ((equity * self.risk.max_position_pct - current_value) / close).floor() as i64;
            return Some(RiskRejection {
                reason: "仓位超限".into(),
                max_allowed_qty: Some(max_allowed.max(0)),
            });
        }

        // 2. Open-position count (only blocks opening a new symbol).
        if !self.positions.contains_key(&order.symbol)
            && self.positions.len() >= self.risk.max_open_positions
        {
            return Some(RiskRejection {
                reason: "持仓数量超限".into(),
                max_allowed_qty: None,
            });
        }

        // 3. Portfolio drawdown from peak.
        if self.peak_equity > 0.0
            && (self.peak_equity - equity) / self.peak_equity > self.risk.max_portfolio_drawdown
        {
            return Some(RiskRejection {
                reason: "组合回撤超限".into(),
                max_allowed_qty: None,
            });
        }

        // 4. Daily loss from the day's starting equity.
        if self.day_start_equity > 0.0
            && (self.day_start_equity - equity) / self.day_start_equity
                > self.risk.max_daily_loss_pct
        {
            return Some(RiskRejection {
                reason: "单日亏损超限".into(),
                max_allowed_qty: None,
            });
        }

        None
    }

    /// Risk summary for context assembly.
    pub fn risk_summary(&self) -> RiskSummary {
        let max_buy_qty = match self.current_price(&self.primary) {
            Ok(close) if close > 0.0 => {
                (self.equity_now() * self.risk.max_position_pct / close).floor() as i64
            }
            _ => 0,
        };
        RiskSummary {
            max_position_pct: self.risk.max_position_pct,
            max_buy_qty,
            max_open_positions: self.risk.max_open_positions,
            open_positions: self.positions.len(),
        }
    }
}
