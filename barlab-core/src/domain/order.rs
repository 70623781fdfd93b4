//! Order types and pending-order summaries.

use serde::{Deserialize, Serialize};

/// Which way the order trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

/// What kind of order and its price parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OrderType {
    /// Fill at the matching bar's open plus slippage.
    Market,
    /// Fill at `limit_price` when the bar trades through it.
    Limit { limit_price: f64 },
    /// Fill at `stop_price` when the bar trades through it.
    Stop { stop_price: f64 },
}

impl OrderType {
    pub fn kind_str(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Limit { .. } => "limit",
            OrderType::Stop { .. } => "stop",
        }
    }

    pub fn limit_price(&self) -> Option<f64> {
        match self {
            OrderType::Limit { limit_price } => Some(*limit_price),
            _ => None,
        }
    }

    pub fn stop_price(&self) -> Option<f64> {
        match self {
            OrderType::Stop { stop_price } => Some(*stop_price),
            _ => None,
        }
    }
}

/// A pending order. Lives in the engine's pending queue or a bracket's
/// dormant set until filled, expired, or cancelled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: i64,
    pub order_type: OrderType,
    /// Bar index at submission time. Expiry counts from here.
    pub bar_index: usize,
    /// `None` = good until run end, `Some(n)` = expires after n bars.
    pub valid_bars: Option<usize>,
}

/// An order the risk gate refused, with the reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedOrder {
    pub order: Order,
    pub reason: String,
}

/// Flat view of a pending order for contexts and the `order_query` tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOrderSummary {
    pub order_id: String,
    pub symbol: String,
    pub side: String,
    pub quantity: i64,
    pub order_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_bars: Option<usize>,
    pub bar_index: usize,
}

impl From<&Order> for PendingOrderSummary {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.order_id.clone(),
            symbol: order.symbol.clone(),
            side: order.side.as_str().to_string(),
            quantity: order.quantity,
            order_type: order.order_type.kind_str().to_string(),
            limit_price: order.order_type.limit_price(),
            stop_price: order.order_type.stop_price(),
            valid_bars: order.valid_bars,
            bar_index: order.bar_index,
        }
    }
}
