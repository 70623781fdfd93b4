//! The fixed tool surface exposed to the LLM, in OpenAI function-calling
//! shape. Names, enums and required fields are part of the wire contract —
//! the dispatcher in `mod.rs` must match this list exactly.

use serde_json::{json, Value};

/// All tool schemas, in declaration order.
pub fn tool_schemas() -> Vec<Value> {
    vec![
        json!({
            "type": "function",
            "function": {
                "name": "market_observe",
                "description": "查询指定 symbol 的当前行情快照。仅多资产场景需要，单资产行情已在上下文中提供。返回 {datetime, symbol, open, high, low, close, volume}。",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "symbol": {
                            "type": "string",
                            "description": "指定查询的股票代码（默认主资产）"
                        }
                    },
                    "required": []
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "indicator_calc",
                "description": "计算单个技术指标的最新值。支持: RSI, SMA, EMA, ATR (用 period 参数), MACD, BBANDS (用默认参数)。返回 {value: float} 或 {upper/middle/lower: float}。如需一次计算多个指标，推荐用 compute 工具更高效。",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string", "description": "指标名称，如 RSI、SMA、EMA"},
                        "period": {"type": "integer", "description": "计算周期", "default": 14},
                        "symbol": {"type": "string", "description": "股票代码（默认主资产）"}
                    },
                    "required": ["name"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "account_status",
                "description": "查询最新账户状态。仅需确认最新持仓变化时使用，基础账户信息已在上下文中提供。返回 {cash, equity, positions}。",
                "parameters": {
                    "type": "object",
                    "properties": {},
                    "required": []
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "trade_execute",
                "description": "执行交易。观望时不要调用此工具。action: buy/sell/close。close 时无需 quantity。支持 bracket: 同时传 stop_loss + take_profit 自动创建 OCO 保护单。返回 {status, order_id} 或 {status: rejected, reason}。风控拒绝返回 {status:rejected, reason, max_allowed_qty}，用 max_allowed_qty 重试即可。",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "action": {
                            "type": "string",
                            "enum": ["buy", "sell", "close", "hold"],
                            "description": "交易动作"
                        },
                        "symbol": {"type": "string", "description": "股票代码"},
                        "quantity": {"type": "integer", "description": "数量（close 时可省略）"},
                        "order_type": {
                            "type": "string",
                            "enum": ["market", "limit", "stop"],
                            "default": "market",
                            "description": "订单类型：market/limit/stop"
                        },
                        "price": {
                            "type": "number",
                            "description": "限价（limit）或止损触发价（stop）"
                        },
                        "valid_bars": {
                            "type": "integer",
                            "description": "订单有效 bar 数，省略则永久有效"
                        },
                        "stop_loss": {
                            "type": "number",
                            "description": "止损价（自动创建 Bracket，与 take_profit 配合）"
                        },
                        "take_profit": {
                            "type": "number",
                            "description": "止盈价（自动创建 Bracket，与 stop_loss 配合）"
                        }
                    },
                    "required": ["action"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "memory_log",
                "description": "在当日日志中追加一条记录。交易后用此记录决策理由。返回 {status: ok}。",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "content": {"type": "string", "description": "日志内容"}
                    },
                    "required": ["content"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "memory_note",
                "description": "创建或更新主题笔记（如持仓理由、策略参数）。返回 {status: ok}。",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "key": {"type": "string", "description": "笔记键"},
                        "content": {"type": "string", "description": "笔记内容"}
                    },
                    "required": ["key", "content"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "memory_recall",
                "description": "按关键词检索历史记忆。返回 {results: [{source, content}]}。",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "query": {"type": "string", "description": "检索关键词"}
                    },
                    "required": ["query"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "order_cancel",
                "description": "取消指定的挂单。先用 order_query 获取有效 order_id。返回 {status: cancelled}。",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "order_id": {"type": "string", "description": "要取消的订单 ID"}
                    },
                    "required": ["order_id"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "order_query",
                "description": "查询当前所有待执行的挂单。返回 {pending_orders: [{order_id, symbol, side, quantity, ...}]}。",
                "parameters": {
                    "type": "object",
                    "properties": {},
                    "required": []
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "market_history",
                "description": "获取最近 N 根 K 线的完整 OHLCV 历史。仅当需要比 compute 中 df 更细粒度的分析时使用。返回 {history: [{date, open, high, low, close, volume}]}。",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "bars": {"type": "integer", "description": "要获取的 K 线数量"},
                        "symbol": {"type": "string", "description": "股票代码（默认主资产）"}
                    },
                    "required": ["bars"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "compute",
                "description": "Python 计算沙箱。每次调用独立命名空间。预加载: df(OHLCV), pd, np, ta(已注入禁止import), math, cash, equity, positions。Helpers: latest(s)→标量, prev(s,n), crossover(fast,slow)→bool, bbands(close,length,std)→(upper,mid,lower), macd(close)→(macd,signal,hist)。⚠ ta.macd()/ta.bbands() 返回 DataFrame 不可解包，必须用 helper。单表达式自动返回；多行赋值给 result。示例: result={'rsi':latest(ta.rsi(df.close,14)), 'bb':bbands(df.close,20,2)}",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "code": {
                            "type": "string",
                            "description": "要执行的 Python 代码"
                        },
                        "symbol": {
                            "type": "string",
                            "description": "指定主数据源的股票代码（默认主资产）"
                        }
                    },
                    "required": ["code"]
                }
            }
        }),
    ]
}

/// Tool names in schema order, for contract tests.
pub fn tool_names() -> Vec<String> {
    tool_schemas()
        .iter()
        .filter_map(|s| {
            s.get("function")
                .and_then(|f| f.get("name"))
                .and_then(|n| n.as_str())
                .map(String::from)
        })
        .collect()
}
