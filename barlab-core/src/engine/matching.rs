//! Per-order fill evaluation against a single bar.
//!
//! Market orders always fill at open ± slippage. Limit and stop orders fill
//! at their own price when the bar trades through it. The caller applies the
//! volume cap and commission.

use crate::config::SlippageConfig;
use crate::domain::{Bar, Order, OrderSide, OrderType};

/// Fill price for `order` against `bar`, or `None` when the bar does not
/// reach the order's price.
pub(crate) fn fill_price(order: &Order, bar: &Bar, slippage: &SlippageConfig) -> Option<f64> {
    match order.order_type {
        OrderType::Market => {
            let offset = slippage.offset(bar.open);
            Some(match order.side {
                OrderSide::Buy => bar.open + offset,
                OrderSide::Sell => bar.open - offset,
            })
        }
        OrderType::Limit { limit_price } => match order.side {
            OrderSide::Buy if bar.low <= limit_price => Some(limit_price),
            OrderSide::Sell if bar.high >= limit_price => Some(limit_price),
            _ => None,
        },
        OrderType::Stop { stop_price } => match order.side {
            OrderSide::Sell if bar.low <= stop_price => Some(stop_price),
            OrderSide::Buy if bar.high >= stop_price => Some(stop_price),
            _ => None,
        },
    }
}

/// Fill quantity after the per-bar volume cap. A positive cap smaller than
/// the order quantity produces a partial fill.
pub(crate) fn capped_quantity(order_qty: i64, bar_volume: f64, max_volume_pct: f64) -> i64 {
    let cap = (bar_volume * max_volume_pct).floor() as i64;
    if cap > 0 && cap < order_qty {
        cap
    } else {
        order_qty
    }
}

/// Round to 4 decimals — fill prices and commissions are stored this way.
pub(crate) fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}
