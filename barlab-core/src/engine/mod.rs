//! Deterministic market simulation engine.
//!
//! Owns per-symbol OHLCV history, the account, the pending order queue, the
//! bracket/OCO book, the event queue, and the equity curve. Only does data
//! facts — never decisions. Order lifecycle:
//! `submit_*()` → `match_orders(next_bar)` → `Fill` / `RejectedOrder`.
//!
//! Next-bar semantics: orders submitted while deciding on bar N are matched
//! against bar N+1, after `advance()`.

mod accounting;
mod bracket;
mod matching;
mod risk;

pub use risk::RiskSummary;

use crate::config::{CommissionConfig, RiskConfig, SlippageConfig};
use crate::data::OhlcvFrame;
use crate::domain::{
    AccountSnapshot, Bar, EngineEvent, EngineEventKind, Fill, MarketSnapshot, Order, OrderIdGen,
    OrderSide, OrderType, PendingOrderSummary, Position, RejectedOrder, TradeLogEntry,
};
use bracket::BracketBook;
use chrono::{NaiveDate, NaiveDateTime};
use matching::{capped_quantity, fill_price, round4};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, VecDeque};
use thiserror::Error;

/// Errors from engine operations. Risk rejections are not errors — they are
/// returned as `SubmitOutcome::Rejected`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("数据为空")]
    EmptyData,

    #[error("多资产数据长度不一致")]
    MisalignedData,

    #[error("symbol '{0}' 不存在")]
    UnknownSymbol(String),

    #[error("引擎尚未推进到第一根 bar")]
    NotStarted,

    #[error("数据已耗尽")]
    EndOfData,

    #[error("订单 {0} 不在挂单队列")]
    OrderNotFound(String),
}

/// Engine construction parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub initial_cash: f64,
    pub risk: RiskConfig,
    pub commission: CommissionConfig,
    pub slippage: SlippageConfig,
    /// Seed for short order ids; re-running with the same seed reproduces them.
    pub seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_cash: 100_000.0,
            risk: RiskConfig::default(),
            commission: CommissionConfig::default(),
            slippage: SlippageConfig::default(),
            seed: 0,
        }
    }
}

/// Result of an order submission. Returned, never thrown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SubmitOutcome {
    Submitted {
        order_id: String,
    },
    Rejected {
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_allowed_qty: Option<i64>,
    },
}

impl SubmitOutcome {
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({"status": "error"}))
    }

    pub fn is_submitted(&self) -> bool {
        matches!(self, SubmitOutcome::Submitted { .. })
    }
}

/// One row of `recent_bars` — injected verbatim into agent contexts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentBar {
    pub bar_index: usize,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// One row of `market_history` — date rendered as a string for the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryBar {
    pub date: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// The deterministic matching engine. See the module docs for the contract.
pub struct Engine {
    data: BTreeMap<String, OhlcvFrame>,
    primary: String,
    n_bars: usize,
    /// `None` until the first `advance()`.
    cursor: Option<usize>,

    cash: f64,
    initial_cash: f64,
    positions: BTreeMap<String, Position>,

    risk: RiskConfig,
    commission: CommissionConfig,
    slippage: SlippageConfig,

    pending: Vec<Order>,
    brackets: BracketBook,
    fills: Vec<Fill>,
    rejected: Vec<RejectedOrder>,
    trade_log: Vec<TradeLogEntry>,
    events: Vec<EngineEvent>,

    equity_curve: Vec<f64>,
    peak_equity: f64,
    day_start_equity: f64,
    last_date: Option<NaiveDate>,

    ids: OrderIdGen,
}

impl Engine {
    /// Single-symbol convenience constructor.
    pub fn new(data: OhlcvFrame, symbol: &str, config: EngineConfig) -> Result<Self, EngineError> {
        let mut map = BTreeMap::new();
        map.insert(symbol.to_string(), data);
        Self::new_multi(map, symbol, config)
    }

    /// Multi-symbol constructor. All frames must be aligned (same length);
    /// `primary` must be one of the keys.
    pub fn new_multi(
        data: BTreeMap<String, OhlcvFrame>,
        primary: &str,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let n_bars = match data.get(primary) {
            Some(frame) => frame.len(),
            None => return Err(EngineError::UnknownSymbol(primary.to_string())),
        };
        if n_bars == 0 {
            return Err(EngineError::EmptyData);
        }
        if data.values().any(|f| f.len() != n_bars) {
            return Err(EngineError::MisalignedData);
        }

        Ok(Self {
            data,
            primary: primary.to_string(),
            n_bars,
            cursor: None,
            cash: config.initial_cash,
            initial_cash: config.initial_cash,
            positions: BTreeMap::new(),
            risk: config.risk,
            commission: config.commission,
            slippage: config.slippage,
            pending: Vec::new(),
            brackets: BracketBook::new(),
            fills: Vec::new(),
            rejected: Vec::new(),
            trade_log: Vec::new(),
            events: Vec::new(),
            equity_curve: Vec::new(),
            peak_equity: 0.0,
            day_start_equity: 0.0,
            last_date: None,
            ids: OrderIdGen::new(config.seed),
        })
    }

    // ── Lifecycle ──────────────────────────────────────────────────────

    pub fn has_next(&self) -> bool {
        self.cursor.map_or(0, |i| i + 1) < self.n_bars
    }

    /// Advance to the next bar. Re-marks every position at that bar's close,
    /// appends to the equity curve, raises the peak, and resets the
    /// day-start equity when the calendar date changes.
    pub fn advance(&mut self) -> Result<Bar, EngineError> {
        let next = self.cursor.map_or(0, |i| i + 1);
        if next >= self.n_bars {
            return Err(EngineError::EndOfData);
        }
        self.cursor = Some(next);

        let data = &self.data;
        for (sym, pos) in self.positions.iter_mut() {
            if let Some(frame) = data.get(sym) {
                pos.update_unrealized(frame.close[next]);
            }
        }

        let equity = self.equity_now();
        self.equity_curve.push(equity);
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }

        let bar = self.primary_bar(next)?;
        let date = bar.datetime.date();
        if self.last_date != Some(date) {
            self.day_start_equity = equity;
            self.last_date = Some(date);
        }
        Ok(bar)
    }

    // ── State queries ──────────────────────────────────────────────────

    pub fn bar_index(&self) -> Option<usize> {
        self.cursor
    }

    pub fn primary_symbol(&self) -> &str {
        &self.primary
    }

    pub fn symbols(&self) -> Vec<&str> {
        self.data.keys().map(String::as_str).collect()
    }

    /// Full OHLCV history for a symbol — the toolkit truncates before any
    /// agent-visible use.
    pub fn frame(&self, symbol: &str) -> Result<&OhlcvFrame, EngineError> {
        self.data
            .get(symbol)
            .ok_or_else(|| EngineError::UnknownSymbol(symbol.to_string()))
    }

    /// Close price of `symbol` at the current bar.
    pub fn current_price(&self, symbol: &str) -> Result<f64, EngineError> {
        let idx = self.cursor.ok_or(EngineError::NotStarted)?;
        Ok(self.frame(symbol)?.close[idx])
    }

    pub fn market_snapshot(&self, symbol: Option<&str>) -> Result<MarketSnapshot, EngineError> {
        let idx = self.cursor.ok_or(EngineError::NotStarted)?;
        let symbol = symbol.unwrap_or(&self.primary);
        let bar = self.frame(symbol)?.bar(idx);
        Ok(MarketSnapshot {
            datetime: bar.datetime,
            bar_index: idx,
            symbol: symbol.to_string(),
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
        })
    }

    pub fn account_snapshot(&self) -> Result<AccountSnapshot, EngineError> {
        if self.cursor.is_none() {
            return Err(EngineError::NotStarted);
        }
        Ok(AccountSnapshot {
            cash: self.cash,
            equity: self.equity_now(),
            positions: self.positions.clone(),
        })
    }

    /// Last `n` bars up to and including the current one (fewer when history
    /// is short).
    pub fn recent_bars(&self, n: usize, symbol: Option<&str>) -> Result<Vec<RecentBar>, EngineError> {
        let idx = self.cursor.ok_or(EngineError::NotStarted)?;
        let frame = self.frame(symbol.unwrap_or(&self.primary))?;
        let start = (idx + 1).saturating_sub(n);
        Ok((start..=idx)
            .map(|i| RecentBar {
                bar_index: i,
                open: frame.open[i],
                high: frame.high[i],
                low: frame.low[i],
                close: frame.close[i],
                volume: frame.volume[i],
            })
            .collect())
    }

    /// Like `recent_bars` but with date strings, for the `market_history` tool.
    pub fn market_history(
        &self,
        n: usize,
        symbol: Option<&str>,
    ) -> Result<Vec<HistoryBar>, EngineError> {
        let idx = self.cursor.ok_or(EngineError::NotStarted)?;
        let frame = self.frame(symbol.unwrap_or(&self.primary))?;
        let start = (idx + 1).saturating_sub(n);
        Ok((start..=idx)
            .map(|i| HistoryBar {
                date: format_bar_date(frame.dates[i]),
                open: frame.open[i],
                high: frame.high[i],
                low: frame.low[i],
                close: frame.close[i],
                volume: frame.volume[i],
            })
            .collect())
    }

    pub fn pending_orders(&self) -> Vec<PendingOrderSummary> {
        self.pending.iter().map(PendingOrderSummary::from).collect()
    }

    pub fn equity_curve(&self) -> &[f64] {
        &self.equity_curve
    }

    pub fn fills(&self) -> &[Fill] {
        &self.fills
    }

    pub fn rejected_orders(&self) -> &[RejectedOrder] {
        &self.rejected
    }

    pub fn trade_log(&self) -> &[TradeLogEntry] {
        &self.trade_log
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn initial_cash(&self) -> f64 {
        self.initial_cash
    }

    pub fn peak_equity(&self) -> f64 {
        self.peak_equity
    }

    pub fn day_start_equity(&self) -> f64 {
        self.day_start_equity
    }

    /// Number of bracket groups whose parent has not filled.
    pub fn dormant_bracket_count(&self) -> usize {
        self.brackets.dormant_group_count()
    }

    pub(crate) fn equity_now(&self) -> f64 {
        match self.cursor {
            None => self.cash,
            Some(i) => {
                self.cash
                    + self
                        .positions
                        .iter()
                        .map(|(sym, p)| {
                            self.data
                                .get(sym)
                                .map_or(0.0, |f| p.size as f64 * f.close[i])
                        })
                        .sum::<f64>()
            }
        }
    }

    // ── Order submission ───────────────────────────────────────────────

    /// Submit a standalone order. Risk-gated; rejections are recorded and
    /// returned, never thrown.
    pub fn submit_order(
        &mut self,
        symbol: &str,
        side: OrderSide,
        quantity: i64,
        order_type: OrderType,
        valid_bars: Option<usize>,
    ) -> SubmitOutcome {
        let Some(idx) = self.cursor else {
            return SubmitOutcome::Rejected {
                reason: "引擎尚未推进到第一根 bar".into(),
                max_allowed_qty: None,
            };
        };
        if quantity <= 0 {
            return SubmitOutcome::Rejected {
                reason: "数量必须为正".into(),
                max_allowed_qty: None,
            };
        }
        if !self.data.contains_key(symbol) {
            return SubmitOutcome::Rejected {
                reason: format!("symbol '{symbol}' 不存在"),
                max_allowed_qty: None,
            };
        }

        let order = Order {
            order_id: self.ids.next_id(),
            symbol: symbol.to_string(),
            side,
            quantity,
            order_type,
            bar_index: idx,
            valid_bars,
        };
        self.submit(order)
    }

    /// Submit a bracket: a market parent plus a stop-loss child and a
    /// take-profit child (opposite side), wired as OCO. Children stay dormant
    /// until the parent fills.
    pub fn submit_bracket(
        &mut self,
        symbol: &str,
        side: OrderSide,
        quantity: i64,
        stop_loss: f64,
        take_profit: f64,
    ) -> SubmitOutcome {
        let Some(idx) = self.cursor else {
            return SubmitOutcome::Rejected {
                reason: "引擎尚未推进到第一根 bar".into(),
                max_allowed_qty: None,
            };
        };
        if quantity <= 0 {
            return SubmitOutcome::Rejected {
                reason: "数量必须为正".into(),
                max_allowed_qty: None,
            };
        }
        if !self.data.contains_key(symbol) {
            return SubmitOutcome::Rejected {
                reason: format!("symbol '{symbol}' 不存在"),
                max_allowed_qty: None,
            };
        }

        let parent = Order {
            order_id: self.ids.next_id(),
            symbol: symbol.to_string(),
            side,
            quantity,
            order_type: OrderType::Market,
            bar_index: idx,
            valid_bars: None,
        };
        if let Some(rejection) = self.risk_check(&parent) {
            let outcome = SubmitOutcome::Rejected {
                reason: rejection.reason.clone(),
                max_allowed_qty: rejection.max_allowed_qty,
            };
            self.rejected.push(RejectedOrder {
                order: parent,
                reason: rejection.reason,
            });
            return outcome;
        }

        let child_side = side.opposite();
        let stop_child = Order {
            order_id: self.ids.next_id(),
            symbol: symbol.to_string(),
            side: child_side,
            quantity,
            order_type: OrderType::Stop {
                stop_price: stop_loss,
            },
            bar_index: idx,
            valid_bars: None,
        };
        let target_child = Order {
            order_id: self.ids.next_id(),
            symbol: symbol.to_string(),
            side: child_side,
            quantity,
            order_type: OrderType::Limit {
                limit_price: take_profit,
            },
            bar_index: idx,
            valid_bars: None,
        };

        let parent_id = parent.order_id.clone();
        self.brackets
            .register(parent_id.clone(), stop_child, target_child);
        self.pending.push(parent);
        SubmitOutcome::Submitted {
            order_id: parent_id,
        }
    }

    /// Close a position with an opposite-side market order sized to it.
    pub fn submit_close(&mut self, symbol: &str) -> SubmitOutcome {
        let Some(pos) = self.positions.get(symbol) else {
            return SubmitOutcome::Rejected {
                reason: "无持仓可平".into(),
                max_allowed_qty: None,
            };
        };
        if pos.size == 0 {
            return SubmitOutcome::Rejected {
                reason: "无持仓可平".into(),
                max_allowed_qty: None,
            };
        }
        let side = if pos.size > 0 {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };
        let quantity = pos.size.abs();
        self.submit_order(symbol, side, quantity, OrderType::Market, None)
    }

    fn submit(&mut self, order: Order) -> SubmitOutcome {
        if let Some(rejection) = self.risk_check(&order) {
            let outcome = SubmitOutcome::Rejected {
                reason: rejection.reason.clone(),
                max_allowed_qty: rejection.max_allowed_qty,
            };
            self.rejected.push(RejectedOrder {
                order,
                reason: rejection.reason,
            });
            return outcome;
        }
        let order_id = order.order_id.clone();
        self.pending.push(order);
        SubmitOutcome::Submitted { order_id }
    }

    /// Cancel a pending order. Only scans the pending queue — a bracket
    /// parent's dormant children are not reachable here.
    pub fn cancel_order(&mut self, order_id: &str) -> Result<(), EngineError> {
        let idx = self.cursor.ok_or(EngineError::NotStarted)?;
        let pos = self
            .pending
            .iter()
            .position(|o| o.order_id == order_id)
            .ok_or_else(|| EngineError::OrderNotFound(order_id.to_string()))?;
        let order = self.pending.remove(pos);
        let datetime = self.primary_bar(idx)?.datetime;
        self.push_event(
            EngineEventKind::Cancelled,
            idx,
            datetime,
            &order.order_id,
            &order.symbol,
            serde_json::Map::new(),
        );
        Ok(())
    }

    /// Return and clear the event queue.
    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    // ── Matching ───────────────────────────────────────────────────────

    /// Match all pending orders against the given bar (by next-bar
    /// convention, the current bar right after `advance()`).
    ///
    /// Bracket children activated by a parent fill join the round's worklist
    /// immediately, so a parent and one child can fill on the same bar. At
    /// the end of the round, OCO-cancelled siblings are dropped from the
    /// queue and the round's cancellation set is cleared.
    pub fn match_orders(&mut self, bar: &Bar) -> Vec<Fill> {
        let mut worklist: VecDeque<Order> = self.pending.drain(..).collect();
        let mut next_pending: Vec<Order> = Vec::new();
        let mut fills: Vec<Fill> = Vec::new();

        while let Some(order) = worklist.pop_front() {
            if self.brackets.is_cancelled_this_round(&order.order_id) {
                self.push_event(
                    EngineEventKind::Cancelled,
                    bar.index,
                    bar.datetime,
                    &order.order_id,
                    &order.symbol,
                    serde_json::Map::new(),
                );
                continue;
            }

            // 1. Expiry window.
            if let Some(valid) = order.valid_bars {
                if bar.index.saturating_sub(order.bar_index) > valid {
                    self.push_event(
                        EngineEventKind::Expired,
                        bar.index,
                        bar.datetime,
                        &order.order_id,
                        &order.symbol,
                        serde_json::Map::new(),
                    );
                    continue;
                }
            }

            // 2. Evaluate against the order's own symbol's bar.
            let sym_bar = match self.frame(&order.symbol) {
                Ok(frame) => frame.bar(bar.index),
                Err(_) => {
                    next_pending.push(order);
                    continue;
                }
            };
            let Some(raw_price) = fill_price(&order, &sym_bar, &self.slippage) else {
                next_pending.push(order);
                continue;
            };

            // 3. Volume cap → possible partial fill.
            let fill_qty =
                capped_quantity(order.quantity, sym_bar.volume, self.slippage.max_volume_pct);
            let price = round4(raw_price);
            let commission = round4(price * fill_qty as f64 * self.commission.rate);

            let fill = Fill {
                order_id: order.order_id.clone(),
                symbol: order.symbol.clone(),
                side: order.side,
                quantity: fill_qty,
                price,
                commission,
                bar_index: sym_bar.index,
                datetime: sym_bar.datetime,
            };

            // 4. Apply, emit, enqueue activated children and the residual.
            let activated = self.apply_fill(&fill);
            let mut detail = serde_json::Map::new();
            detail.insert("price".into(), json!(fill.price));
            detail.insert("quantity".into(), json!(fill.quantity));
            detail.insert("side".into(), json!(fill.side.as_str()));
            self.push_event(
                EngineEventKind::Fill,
                fill.bar_index,
                fill.datetime,
                &fill.order_id,
                &fill.symbol,
                detail,
            );
            fills.push(fill.clone());
            self.fills.push(fill);

            for child in activated {
                worklist.push_back(child);
            }
            let remaining = order.quantity - fill_qty;
            if remaining > 0 {
                let mut residual = order;
                residual.quantity = remaining;
                next_pending.push(residual);
            }
        }

        // End of round: drop OCO-cancelled siblings, install the next queue.
        let cancelled = self.brackets.drain_round_cancellations();
        if cancelled.is_empty() {
            self.pending = next_pending;
        } else {
            let (kept, dropped): (Vec<Order>, Vec<Order>) = next_pending
                .into_iter()
                .partition(|o| !cancelled.contains(&o.order_id));
            for order in dropped {
                self.push_event(
                    EngineEventKind::Cancelled,
                    bar.index,
                    bar.datetime,
                    &order.order_id,
                    &order.symbol,
                    serde_json::Map::new(),
                );
            }
            self.pending = kept;
        }
        fills
    }

    // ── Internals ──────────────────────────────────────────────────────

    fn primary_bar(&self, index: usize) -> Result<Bar, EngineError> {
        Ok(self.frame(&self.primary)?.bar(index))
    }

    fn push_event(
        &mut self,
        kind: EngineEventKind,
        bar_index: usize,
        datetime: NaiveDateTime,
        order_id: &str,
        symbol: &str,
        detail: serde_json::Map<String, serde_json::Value>,
    ) {
        self.events.push(EngineEvent {
            kind,
            bar_index,
            datetime,
            order_id: order_id.to_string(),
            symbol: symbol.to_string(),
            detail,
        });
    }
}

fn format_bar_date(dt: NaiveDateTime) -> String {
    if dt.time() == chrono::NaiveTime::MIN {
        dt.format("%Y-%m-%d").to_string()
    } else {
        dt.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}
