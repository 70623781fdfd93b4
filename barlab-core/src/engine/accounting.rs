//! Fill accounting: cash, positions, realized P&L, trade log, bracket linkage.

use super::bracket::FillEffect;
use super::Engine;
use crate::domain::{Fill, Order, OrderSide, Position, TradeLogEntry};

impl Engine {
    /// Apply a fill to account state and advance any bracket group it
    /// belongs to. Returns bracket children newly activated by this fill —
    /// the matching round feeds them straight back into its worklist.
    ///
    /// Sign convention: δ = +quantity on buy, −quantity on sell;
    /// `new = size + δ`. Same-sign δ opens or adds at a volume-weighted
    /// average; opposite-sign δ realizes P&L on the closed quantity, and a
    /// flip re-opens the remainder at the fill price.
    pub(crate) fn apply_fill(&mut self, fill: &Fill) -> Vec<Order> {
        let qty = fill.quantity as f64;
        let delta = match fill.side {
            OrderSide::Buy => fill.quantity,
            OrderSide::Sell => -fill.quantity,
        };

        let existing = self.positions.remove(&fill.symbol);
        let updated = match existing {
            None => {
                self.apply_open_cash(fill, qty);
                Some(Position::new(fill.symbol.clone(), delta, fill.price))
            }
            Some(mut pos) if pos.size == 0 || (pos.size > 0) == (delta > 0) => {
                // Open or add: volume-weighted average entry.
                self.apply_open_cash(fill, qty);
                let new = pos.size + delta;
                let total = pos.avg_price * pos.size.abs() as f64 + fill.price * qty;
                pos.avg_price = total / new.abs() as f64;
                pos.size = new;
                Some(pos)
            }
            Some(mut pos) => {
                // Reduce, close, or flip.
                let closed = fill.quantity.min(pos.size.abs());
                let realized = match fill.side {
                    // Long close
                    OrderSide::Sell => {
                        (fill.price - pos.avg_price) * closed as f64 - fill.commission
                    }
                    // Short buy-back
                    OrderSide::Buy => {
                        (pos.avg_price - fill.price) * closed as f64 - fill.commission
                    }
                };
                pos.realized_pnl += realized;
                self.trade_log.push(TradeLogEntry {
                    symbol: fill.symbol.clone(),
                    quantity: closed,
                    buy_price: pos.avg_price,
                    sell_price: fill.price,
                    pnl: realized,
                    commission: fill.commission,
                    datetime: fill.datetime,
                    bar_index: fill.bar_index,
                });
                match fill.side {
                    OrderSide::Sell => self.cash += fill.price * qty - fill.commission,
                    OrderSide::Buy => self.cash -= fill.price * qty + fill.commission,
                }

                let new = pos.size + delta;
                if new == 0 {
                    None
                } else if (new > 0) == (pos.size > 0) {
                    // Reduced: average entry unchanged.
                    pos.size = new;
                    Some(pos)
                } else {
                    // Flipped: the remainder opens at the fill price.
                    pos.size = new;
                    pos.avg_price = fill.price;
                    pos.unrealized_pnl = 0.0;
                    Some(pos)
                }
            }
        };
        if let Some(pos) = updated {
            self.positions.insert(fill.symbol.clone(), pos);
        }

        match self.brackets.on_fill(&fill.order_id) {
            FillEffect::ActivateChildren(children) => children,
            FillEffect::CancelSibling(_) | FillEffect::None => Vec::new(),
        }
    }

    /// Cash movement for an opening leg: buys pay, short opens collect.
    fn apply_open_cash(&mut self, fill: &Fill, qty: f64) {
        match fill.side {
            OrderSide::Buy => self.cash -= fill.price * qty + fill.commission,
            OrderSide::Sell => self.cash += fill.price * qty - fill.commission,
        }
    }
}
