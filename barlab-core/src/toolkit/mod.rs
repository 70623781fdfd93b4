//! Tool bridge between the agent and the engine/memory/sandbox.
//!
//! One fresh `Toolkit` per decision. `execute()` never propagates an error:
//! any failure becomes `{error, tool, remediation}` and is still appended to
//! the call log, so a crashing tool cannot break the decision loop.

mod schemas;

pub use schemas::{tool_names, tool_schemas};

use crate::domain::{OrderSide, OrderType, ToolCallRecord};
use crate::engine::{Engine, EngineError};
use crate::indicators::{IndicatorEngine, IndicatorError};
use crate::memory::{Memory, MemoryError};
use crate::sandbox::{exec_compute, AccountView, SandboxLimits};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// A trade issued through `trade_execute` during one decision.
#[derive(Debug, Clone)]
pub struct TradeAction {
    pub action: String,
    pub symbol: String,
    pub quantity: i64,
    pub result: Value,
}

/// Static per-tool retry hints.
fn remediation_for(tool: &str) -> &'static str {
    match tool {
        "indicator_calc" => "先调用 market_observe 确认 symbol，再调用 indicator_calc",
        "trade_execute" => "先调用 account_status 确认余额，再调用 trade_execute",
        "order_cancel" => "先调用 order_query 获取有效 order_id，再调用 order_cancel",
        _ => "检查参数后重试",
    }
}

/// Internal dispatch failure. Rendered `"<Kind>: <msg>"` like a caught
/// exception, never thrown out of `execute`.
#[derive(Debug)]
enum ToolError {
    MissingArg(String),
    BadArg(String),
    Engine(EngineError),
    Memory(MemoryError),
    Indicator(IndicatorError),
}

impl ToolError {
    fn render(&self) -> String {
        match self {
            ToolError::MissingArg(key) => format!("KeyError: '{key}'"),
            ToolError::BadArg(msg) => format!("ValueError: {msg}"),
            ToolError::Engine(err) => format!("EngineError: {err}"),
            ToolError::Memory(err) => format!("MemoryError: {err}"),
            ToolError::Indicator(err) => format!("ValueError: {err}"),
        }
    }
}

impl From<EngineError> for ToolError {
    fn from(err: EngineError) -> Self {
        ToolError::Engine(err)
    }
}

impl From<MemoryError> for ToolError {
    fn from(err: MemoryError) -> Self {
        ToolError::Memory(err)
    }
}

impl From<IndicatorError> for ToolError {
    fn from(err: IndicatorError) -> Self {
        ToolError::Indicator(err)
    }
}

/// Stateless-per-decision tool adapter. Tracks the call log, the last
/// result per indicator, and every trade issued.
pub struct Toolkit<'a> {
    engine: &'a mut Engine,
    memory: &'a Memory,
    indicators: IndicatorEngine,
    sandbox_limits: SandboxLimits,

    pub call_log: Vec<ToolCallRecord>,
    pub indicator_queries: BTreeMap<String, Value>,
    pub trade_actions: Vec<TradeAction>,
}

impl<'a> Toolkit<'a> {
    pub fn new(engine: &'a mut Engine, memory: &'a Memory) -> Self {
        Self {
            engine,
            memory,
            indicators: IndicatorEngine,
            sandbox_limits: SandboxLimits::default(),
            call_log: Vec::new(),
            indicator_queries: BTreeMap::new(),
            trade_actions: Vec::new(),
        }
    }

    /// Execute one tool call. Always returns a JSON map and always records
    /// the call.
    pub fn execute(&mut self, tool_name: &str, args: &Value) -> Value {
        let result = match self.dispatch(tool_name, args) {
            Ok(value) => value,
            Err(err) => json!({
                "error": err.render(),
                "tool": tool_name,
                "remediation": remediation_for(tool_name),
            }),
        };
        self.call_log.push(ToolCallRecord {
            tool: tool_name.to_string(),
            input: args.clone(),
            output: result.clone(),
        });
        result
    }

    // ── Dispatch ───────────────────────────────────────────────────────

    fn dispatch(&mut self, name: &str, args: &Value) -> Result<Value, ToolError> {
        match name {
            "market_observe" => self.market_observe(args),
            "indicator_calc" => self.indicator_calc(args),
            "account_status" => self.account_status(),
            "trade_execute" => self.trade_execute(args),
            "memory_log" => self.memory_log(args),
            "memory_note" => self.memory_note(args),
            "memory_recall" => self.memory_recall(args),
            "order_cancel" => self.order_cancel(args),
            "order_query" => Ok(json!({ "pending_orders": self.engine.pending_orders() })),
            "market_history" => self.market_history(args),
            "compute" => self.compute(args),
            other => Ok(json!({ "error": format!("未知工具: {other}") })),
        }
    }

    fn str_arg<'v>(&self, args: &'v Value, key: &str) -> Option<&'v str> {
        args.get(key).and_then(Value::as_str)
    }

    fn required_str<'v>(&self, args: &'v Value, key: &str) -> Result<&'v str, ToolError> {
        self.str_arg(args, key)
            .ok_or_else(|| ToolError::MissingArg(key.to_string()))
    }

    fn market_observe(&mut self, args: &Value) -> Result<Value, ToolError> {
        let symbol = self.str_arg(args, "symbol");
        let snap = self.engine.market_snapshot(symbol)?;
        Ok(json!({
            "datetime": snap.datetime.format("%Y-%m-%dT%H:%M:%S").to_string(),
            "symbol": snap.symbol,
            "open": snap.open,
            "high": snap.high,
            "low": snap.low,
            "close": snap.close,
            "volume": snap.volume,
        }))
    }

    fn indicator_calc(&mut self, args: &Value) -> Result<Value, ToolError> {
        let name = self.required_str(args, "name")?.to_string();
        let period = args.get("period").and_then(Value::as_u64).unwrap_or(14) as usize;
        let symbol = self
            .str_arg(args, "symbol")
            .unwrap_or(self.engine.primary_symbol())
            .to_string();

        let Ok(frame) = self.engine.frame(&symbol) else {
            return Ok(json!({
                "error": format!("symbol '{symbol}' 不存在"),
                "remediation": "检查 symbol 名称是否正确",
            }));
        };
        let bar_index = self.engine.bar_index().ok_or(EngineError::NotStarted)?;
        let result = self.indicators.calc(&name, frame, bar_index, period)?;
        self.indicator_queries.insert(name, result.clone());
        Ok(result)
    }

    fn account_status(&mut self) -> Result<Value, ToolError> {
        let snap = self.engine.account_snapshot()?;
        let positions: serde_json::Map<String, Value> = snap
            .positions
            .iter()
            .map(|(sym, p)| {
                (
                    sym.clone(),
                    json!({ "size": p.size, "avg_price": p.avg_price }),
                )
            })
            .collect();
        Ok(json!({
            "cash": snap.cash,
            "equity": snap.equity,
            "positions": positions,
        }))
    }

    fn trade_execute(&mut self, args: &Value) -> Result<Value, ToolError> {
        let action = self.str_arg(args, "action").unwrap_or("hold").to_string();
        let symbol = self
            .str_arg(args, "symbol")
            .unwrap_or(self.engine.primary_symbol())
            .to_string();
        let quantity = args
            .get("quantity")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let order_type = self.str_arg(args, "order_type").unwrap_or("market");
        let price = args.get("price").and_then(Value::as_f64);
        let valid_bars = args
            .get("valid_bars")
            .and_then(Value::as_u64)
            .map(|v| v as usize);
        // Explicit presence check: stop_loss=0.0 means "provided", null means absent.
        let stop_loss = args
            .get("stop_loss")
            .filter(|v| !v.is_null())
            .and_then(Value::as_f64);
        let take_profit = args
            .get("take_profit")
            .filter(|v| !v.is_null())
            .and_then(Value::as_f64);

        let result = match action.as_str() {
            "hold" => json!({"status": "hold"}),
            "buy" | "sell" => {
                let side = if action == "buy" {
                    OrderSide::Buy
                } else {
                    OrderSide::Sell
                };
                if stop_loss.is_some() || take_profit.is_some() {
                    let sl = stop_loss.unwrap_or(0.0);
                    let tp = take_profit.unwrap_or(f64::INFINITY);
                    let mut result = self
                        .engine
                        .submit_bracket(&symbol, side, quantity, sl, tp)
                        .to_value();
                    if order_type != "market" || price.is_some() {
                        if let Some(map) = result.as_object_mut() {
                            map.insert(
                                "warning".into(),
                                json!("Bracket 模式：order_type/price 参数已忽略"),
                            );
                        }
                    }
                    result
                } else {
                    let order_type = match order_type {
                        "market" => OrderType::Market,
                        "limit" => OrderType::Limit {
                            limit_price: price.ok_or_else(|| {
                                ToolError::BadArg("limit 订单需要 price 参数".into())
                            })?,
                        },
                        "stop" => OrderType::Stop {
                            stop_price: price.ok_or_else(|| {
                                ToolError::BadArg("stop 订单需要 price 参数".into())
                            })?,
                        },
                        other => {
                            return Err(ToolError::BadArg(format!("未知 order_type: {other}")))
                        }
                    };
                    self.engine
                        .submit_order(&symbol, side, quantity, order_type, valid_bars)
                        .to_value()
                }
            }
            "close" => self.engine.submit_close(&symbol).to_value(),
            other => json!({"status": "rejected", "reason": format!("未知 action: {other}")}),
        };

        if action != "hold" {
            self.trade_actions.push(TradeAction {
                action,
                symbol,
                quantity,
                result: result.clone(),
            });
        }
        Ok(result)
    }

    fn memory_log(&mut self, args: &Value) -> Result<Value, ToolError> {
        let content = self.required_str(args, "content")?;
        self.memory.log(content, None)?;
        Ok(json!({"status": "ok"}))
    }

    fn memory_note(&mut self, args: &Value) -> Result<Value, ToolError> {
        let key = self.required_str(args, "key")?.to_string();
        let content = self.required_str(args, "content")?;
        self.memory.note(&key, content)?;
        Ok(json!({"status": "ok"}))
    }

    fn memory_recall(&mut self, args: &Value) -> Result<Value, ToolError> {
        let query = self.required_str(args, "query")?;
        Ok(json!({ "results": self.memory.recall(query) }))
    }

    fn order_cancel(&mut self, args: &Value) -> Result<Value, ToolError> {
        let order_id = self.required_str(args, "order_id")?.to_string();
        self.engine.cancel_order(&order_id)?;
        Ok(json!({"status": "cancelled", "order_id": order_id}))
    }

    fn market_history(&mut self, args: &Value) -> Result<Value, ToolError> {
        let bars = args
            .get("bars")
            .and_then(Value::as_u64)
            .ok_or_else(|| ToolError::MissingArg("bars".into()))? as usize;
        let symbol = self.str_arg(args, "symbol");
        Ok(json!({ "history": self.engine.market_history(bars, symbol)? }))
    }

    fn compute(&mut self, args: &Value) -> Result<Value, ToolError> {
        let code = self.required_str(args, "code")?;
        let symbol = self
            .str_arg(args, "symbol")
            .unwrap_or(self.engine.primary_symbol())
            .to_string();
        let bar_index = self.engine.bar_index().ok_or(EngineError::NotStarted)?;

        let Ok(primary) = self.engine.frame(&symbol) else {
            return Ok(json!({ "error": format!("symbol '{symbol}' 不存在") }));
        };
        // Truncate every view to the current bar — no look-ahead.
        let df = primary.truncated(bar_index);
        let mut extra = BTreeMap::new();
        for sym in self.engine.symbols() {
            let sym = sym.to_string();
            if let Ok(frame) = self.engine.frame(&sym) {
                extra.insert(sym, frame.truncated(bar_index));
            }
        }

        let snapshot = self.engine.account_snapshot()?;
        let account = AccountView::from(&snapshot);

        let mut result = exec_compute(code, &df, &account, &extra, &self.sandbox_limits);
        result.insert(
            "_meta".into(),
            json!({ "df_rows": df.len(), "columns": crate::data::COLUMNS }),
        );
        Ok(Value::Object(result))
    }
}
