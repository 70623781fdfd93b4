//! Position — a signed holding in a single symbol, and the account snapshot.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An open position. `size` is signed: positive long, negative short.
///
/// A position with size 0 never appears in the engine's position map —
/// closing the last share removes the entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub size: i64,
    /// Volume-weighted average entry price.
    pub avg_price: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
}

impl Position {
    pub fn new(symbol: String, size: i64, avg_price: f64) -> Self {
        Self {
            symbol,
            size,
            avg_price,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
        }
    }

    pub fn market_value(&self, current_price: f64) -> f64 {
        self.size as f64 * current_price
    }

    /// Re-mark against a new price. The signed size makes this correct for
    /// shorts without a side switch.
    pub fn update_unrealized(&mut self, current_price: f64) {
        self.unrealized_pnl = (current_price - self.avg_price) * self.size as f64;
    }
}

/// Account state at the engine's current bar.
///
/// `equity` = cash + Σ size·current_price over open positions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub cash: f64,
    pub equity: f64,
    pub positions: BTreeMap<String, Position>,
}
