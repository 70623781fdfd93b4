//! Fill — a completed order execution, and the closed-trade log entry.

use super::order::OrderSide;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Record of an order being filled (fully or partially).
///
/// `price` already includes slippage. Fill history is append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: i64,
    pub price: f64,
    pub commission: f64,
    pub bar_index: usize,
    pub datetime: NaiveDateTime,
}

/// One closed leg in the trade log, written when a fill reduces or closes
/// a position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeLogEntry {
    pub symbol: String,
    pub quantity: i64,
    pub buy_price: f64,
    pub sell_price: f64,
    pub pnl: f64,
    pub commission: f64,
    pub datetime: NaiveDateTime,
    pub bar_index: usize,
}
