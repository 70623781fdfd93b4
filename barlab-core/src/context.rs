//! Five-layer context assembly for agent decisions.
//!
//! Static injection: situational awareness (current bar) + short-term memory
//! (recent bars, events, recent decisions) + working memory (pending orders,
//! position notes). Long-term memory stays dynamic — the agent pulls it with
//! `memory_recall`. The rendered text is data first, instructions last, and
//! is byte-identical for identical inputs.

use crate::config::ContextConfig;
use crate::domain::{Decision, DecisionSummary, PendingOrderSummary};
use crate::engine::{Engine, EngineError, RecentBar, RiskSummary};
use crate::memory::Memory;
use chrono::NaiveDateTime;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// The assembled decision context.
#[derive(Debug, Clone)]
pub struct Context {
    // Identity layer
    pub playbook: String,
    // Working memory layer
    pub position_notes: BTreeMap<String, String>,
    // Situational layer
    pub datetime: NaiveDateTime,
    pub bar_index: usize,
    pub decision_count: usize,
    pub market: Value,
    pub account: Value,
    pub risk_summary: RiskSummary,
    pub pending_orders: Vec<PendingOrderSummary>,
    // Short-term memory layer
    pub recent_bars: Vec<RecentBar>,
    pub events: Vec<Value>,
    pub recent_decisions: Vec<DecisionSummary>,
    // Rendered product
    pub formatted_text: String,
}

/// Builds a `Context` from engine state, memory and decision history.
#[derive(Debug, Clone, Default)]
pub struct ContextAssembler {
    cfg: ContextConfig,
}

impl ContextAssembler {
    pub fn new(cfg: ContextConfig) -> Self {
        Self { cfg }
    }

    pub fn assemble(
        &self,
        engine: &Engine,
        memory: &Memory,
        bar_index: usize,
        events: &[Value],
        decisions: &[Decision],
    ) -> Result<Context, EngineError> {
        let snap = engine.market_snapshot(None)?;
        let acc = engine.account_snapshot()?;
        let playbook = memory.read_playbook();
        let held: Vec<String> = acc.positions.keys().cloned().collect();
        let position_notes = memory.read_position_notes(&held);

        let recent_bars = engine.recent_bars(self.cfg.recent_bars_window, None)?;
        let pending_orders = engine.pending_orders();
        let risk_summary = engine.risk_summary();

        let start = decisions
            .len()
            .saturating_sub(self.cfg.recent_decisions_window);
        let recent_decisions: Vec<DecisionSummary> = decisions[start..]
            .iter()
            .map(|d| DecisionSummary::from_decision(d, self.cfg.reasoning_max_chars))
            .collect();

        let market = json!({
            "symbol": snap.symbol,
            "open": snap.open,
            "high": snap.high,
            "low": snap.low,
            "close": snap.close,
            "volume": snap.volume,
        });

        let mut account_positions = serde_json::Map::new();
        for (sym, pos) in &acc.positions {
            let current = engine.current_price(sym)?;
            account_positions.insert(
                sym.clone(),
                json!({
                    "size": pos.size,
                    "avg_price": pos.avg_price,
                    "unrealized_pnl": (current - pos.avg_price) * pos.size as f64,
                }),
            );
        }
        let account = json!({
            "cash": acc.cash,
            "equity": acc.equity,
            "positions": account_positions,
        });

        let mut ctx = Context {
            playbook,
            position_notes,
            datetime: snap.datetime,
            bar_index,
            decision_count: decisions.len(),
            market,
            account,
            risk_summary,
            pending_orders,
            recent_bars,
            events: events.to_vec(),
            recent_decisions,
            formatted_text: String::new(),
        };
        ctx.formatted_text = self.format_text(&ctx);
        Ok(ctx)
    }

    // ── Rendering ──────────────────────────────────────────────────────

    /// XML-tagged sections in fixed order; empty sections are omitted.
    fn format_text(&self, ctx: &Context) -> String {
        let m = &ctx.market;
        let a = &ctx.account;
        let mut out = String::new();

        let positions = a["positions"].as_object();
        let positions_line = match positions {
            Some(map) if !map.is_empty() => map
                .iter()
                .map(|(sym, p)| {
                    format!(
                        "{sym} {}股@{:.2} | 未实现{:+.0}",
                        p["size"],
                        p["avg_price"].as_f64().unwrap_or(0.0),
                        p["unrealized_pnl"].as_f64().unwrap_or(0.0),
                    )
                })
                .collect::<Vec<_>>()
                .join(", "),
            _ => "空仓".to_string(),
        };

        let _ = writeln!(
            out,
            "<market datetime=\"{}\" bar=\"{}\" symbol=\"{}\">",
            ctx.datetime, ctx.bar_index, m["symbol"].as_str().unwrap_or("?")
        );
        let _ = writeln!(
            out,
            "开={}  高={}  低={}  收={}  量={:.0}",
            m["open"],
            m["high"],
            m["low"],
            m["close"],
            m["volume"].as_f64().unwrap_or(0.0)
        );
        out.push_str("</market>\n");

        let _ = writeln!(
            out,
            "\n<account cash=\"{:.0}\" equity=\"{:.0}\">",
            a["cash"].as_f64().unwrap_or(0.0),
            a["equity"].as_f64().unwrap_or(0.0)
        );
        let _ = writeln!(out, "{positions_line}");
        out.push_str("</account>\n");

        // Risk constraints: rendered only when flat with room to buy
        let rs = &ctx.risk_summary;
        let flat = positions.map_or(true, |p| p.is_empty());
        if rs.max_buy_qty > 0 && flat {
            let _ = writeln!(
                out,
                "\n<risk max_position_pct=\"{:.0}%\" max_buy_qty=\"{}\" positions=\"{}/{}\">",
                rs.max_position_pct * 100.0,
                rs.max_buy_qty,
                rs.open_positions,
                rs.max_open_positions
            );
            let _ = writeln!(
                out,
                "{} 可买≈{}股",
                m["symbol"].as_str().unwrap_or("?"),
                rs.max_buy_qty
            );
            out.push_str("</risk>\n");
        }

        if !ctx.recent_bars.is_empty() {
            let _ = writeln!(out, "\n<recent_bars count=\"{}\">", ctx.recent_bars.len());
            out.push_str("  bar  开盘    最高    最低    收盘    成交量\n");
            for b in &ctx.recent_bars {
                let _ = writeln!(
                    out,
                    "  {:>3}  {:.2}  {:.2}  {:.2}  {:.2}  {:.0}",
                    b.bar_index, b.open, b.high, b.low, b.close, b.volume
                );
            }
            out.push_str("</recent_bars>\n");
        }

        if !ctx.events.is_empty() {
            out.push_str("\n<events>\n");
            for event in &ctx.events {
                let _ = writeln!(out, "{}", format_event(event));
            }
            out.push_str("</events>\n");
        }

        if !ctx.pending_orders.is_empty() {
            out.push_str("\n<pending_orders>\n");
            for o in &ctx.pending_orders {
                let price_info = if let Some(limit) = o.limit_price {
                    format!(" limit={limit}")
                } else if let Some(stop) = o.stop_price {
                    format!(" stop={stop}")
                } else {
                    String::new()
                };
                let _ = writeln!(
                    out,
                    "[{}] {} {} {} {}股{}",
                    o.order_id, o.order_type, o.side, o.symbol, o.quantity, price_info
                );
            }
            out.push_str("</pending_orders>\n");
        }

        if !ctx.position_notes.is_empty() {
            out.push_str("\n<position_notes>\n");
            for (sym, note) in &ctx.position_notes {
                let _ = writeln!(out, "{sym}: {note}");
            }
            out.push_str("</position_notes>\n");
        }

        if !ctx.recent_decisions.is_empty() {
            out.push_str("\n<recent_decisions>\n");
            for d in &ctx.recent_decisions {
                let _ = writeln!(out, "[{}] {}: {}", d.bar_index, d.action, d.reasoning);
            }
            out.push_str("</recent_decisions>\n");
        }

        out.push_str("\n<task>\n");
        out.push_str("分析当前市场状态，根据你的策略做出交易决策。\n");
        let _ = writeln!(
            out,
            "compute 工具中 df 已包含 {} 行完整 OHLCV 数据。",
            ctx.bar_index + 1
        );
        out.push_str("</task>");
        out
    }
}

/// Per-kind event line; missing fields render as `?` instead of failing.
fn format_event(event: &Value) -> String {
    let get = |key: &str| event.get(key).and_then(Value::as_str).unwrap_or("?");
    match event.get("type").and_then(Value::as_str).unwrap_or("unknown") {
        "fill" => format!(
            "成交: {} {} {}股 @ {:.2}",
            get("side"),
            get("symbol"),
            event
                .get("quantity")
                .map(|q| q.to_string())
                .unwrap_or_else(|| "?".into()),
            event.get("price").and_then(Value::as_f64).unwrap_or(0.0),
        ),
        "expired" => format!("过期: 订单 {} ({}) 已过期", get("order_id"), get("symbol")),
        "cancelled" => format!("取消: 订单 {} ({}) 已取消", get("order_id"), get("symbol")),
        other => format!("{other}: {}", get("order_id")),
    }
}
