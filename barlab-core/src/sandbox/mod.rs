//! Guarded analytic sandbox for the agent's `compute` tool.
//!
//! A small embedded expression/statement language with a Python-shaped
//! surface: the agent sees `df`, the column aliases, the account bindings,
//! the trading helper vocabulary, and the `ta`/`math`/`np`/`pd` namespaces —
//! nothing else. There is no host eval underneath: code runs in a
//! tree-walking interpreter with a wall-clock deadline, and its result goes
//! through bounded output normalization.
//!
//! REPL protocol (eval-first):
//! 1. A single expression evaluates to the result directly.
//! 2. Otherwise the code runs as statements; if the last statement is an
//!    expression, its value is returned — unless a `result` variable was
//!    assigned, which wins.
//! 3. Statement-only code returns `result` if defined, else an error.

mod ast;
mod builtins;
mod interp;
mod lexer;
mod normalize;
mod value;

pub use normalize::{MAX_DICT_KEYS, MAX_LIST_ITEMS, MAX_STR_LEN};

use crate::data::OhlcvFrame;
use crate::domain::AccountSnapshot;
use ast::Stmt;
use interp::Interp;
use serde_json::{json, Map, Value as Json};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::time::{Duration, Instant};
use value::Value;

/// Execution limits. The timeout is a hard wall-clock deadline.
#[derive(Debug, Clone)]
pub struct SandboxLimits {
    pub timeout: Duration,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(500),
        }
    }
}

/// Read-only account state injected into the sandbox.
#[derive(Debug, Clone)]
pub struct AccountView {
    pub cash: f64,
    pub equity: f64,
    pub positions: BTreeMap<String, PositionView>,
}

#[derive(Debug, Clone)]
pub struct PositionView {
    pub size: i64,
    pub avg_price: f64,
}

impl From<&AccountSnapshot> for AccountView {
    fn from(snapshot: &AccountSnapshot) -> Self {
        Self {
            cash: snapshot.cash,
            equity: snapshot.equity,
            positions: snapshot
                .positions
                .iter()
                .map(|(sym, p)| {
                    (
                        sym.clone(),
                        PositionView {
                            size: p.size,
                            avg_price: p.avg_price,
                        },
                    )
                })
                .collect(),
        }
    }
}

/// Failure modes of sandbox execution. Mapped to `{error, remediation}`
/// payloads — never surfaced as panics or host errors.
#[derive(Debug, Clone)]
pub enum SandboxErrorKind {
    Timeout,
    Syntax(String),
    Name(String),
    Key(String),
    Index(String),
    ZeroDivision,
    Unpack(String),
    Import(String),
    Type(String),
    Value(String),
}

const NAME_REMEDIATION: &str = "可用变量: df, open, high, low, close, volume, date, account, cash, equity, positions, pd, np, ta, math。helpers: latest, prev, crossover, crossunder, above, below, bbands, macd, tail, nz。compute 不是指标菜单：需要新指标直接用 Series 运算实现。";

fn error_map(kind: &SandboxErrorKind) -> Map<String, Json> {
    let (error, remediation) = match kind {
        SandboxErrorKind::Timeout => (
            "计算超时，请简化代码或减少数据量".to_string(),
            "避免 while/for 纯 Python 大循环；优先用 pandas/numpy 向量化与 rolling。".to_string(),
        ),
        SandboxErrorKind::Syntax(msg) => (
            format!("SyntaxError: {msg}"),
            "检查 Python 语法（缩进/冒号/括号）。".to_string(),
        ),
        SandboxErrorKind::Name(name) => (
            format!("NameError: name '{name}' is not defined"),
            NAME_REMEDIATION.to_string(),
        ),
        SandboxErrorKind::Key(key) => (
            format!("KeyError: '{key}'"),
            "df 列为 date/open/high/low/close/volume（小写）。可用 df.columns 查看。".to_string(),
        ),
        SandboxErrorKind::Index(msg) => (
            format!("IndexError: {msg}"),
            "检查数据长度: len(df)。避免固定负索引；可用 min(n, len(df)) 或 tail(close, n)。"
                .to_string(),
        ),
        SandboxErrorKind::ZeroDivision => (
            "ZeroDivisionError: division by zero".to_string(),
            "检查除数是否为 0；可用 nz(x, default) 处理空值/NaN。".to_string(),
        ),
        SandboxErrorKind::Unpack(msg) => (
            format!("ValueError: {msg}"),
            "ta.macd()/ta.bbands() 返回 DataFrame，不能直接解包；请用 helper macd()/bbands()，或直接返回 DataFrame 让系统摘要。".to_string(),
        ),
        SandboxErrorKind::Import(msg) => (
            format!("ImportError: {msg}"),
            "沙箱仅允许导入 pandas/numpy/pandas_ta/math；且已预注入为 pd/np/ta/math，通常不需要 import。".to_string(),
        ),
        SandboxErrorKind::Type(msg) => (
            format!("TypeError: {msg}"),
            "检查变量名/索引/返回值；建议返回标量或小 dict。".to_string(),
        ),
        SandboxErrorKind::Value(msg) => (
            format!("ValueError: {msg}"),
            "检查变量名/索引/返回值；建议返回标量或小 dict。".to_string(),
        ),
    };
    let mut map = Map::new();
    map.insert("error".into(), Json::String(error));
    map.insert("remediation".into(), Json::String(remediation));
    map
}

fn no_output_map(remediation: &str) -> Map<String, Json> {
    let mut map = Map::new();
    map.insert("error".into(), Json::String("未产生输出".into()));
    map.insert("remediation".into(), Json::String(remediation.into()));
    map
}

/// Build the sandbox namespace: data view, column aliases, account state,
/// helpers, libraries, and per-symbol extra frames (`df_<symbol>`).
fn build_env(
    df: &OhlcvFrame,
    account: &AccountView,
    extra_dfs: &BTreeMap<String, OhlcvFrame>,
) -> HashMap<String, Value> {
    let mut env = HashMap::new();
    for (name, value) in builtins::base_bindings() {
        env.insert(name.to_string(), value);
    }

    let frame = Rc::new(df.clone());
    env.insert("df".into(), Value::Frame(frame.clone()));
    env.insert("open".into(), Value::series(frame.open.clone()));
    env.insert("high".into(), Value::series(frame.high.clone()));
    env.insert("low".into(), Value::series(frame.low.clone()));
    env.insert("close".into(), Value::series(frame.close.clone()));
    env.insert("volume".into(), Value::series(frame.volume.clone()));
    env.insert(
        "date".into(),
        Value::list(
            frame
                .dates
                .iter()
                .map(|d| Value::str(d.format("%Y-%m-%d").to_string()))
                .collect(),
        ),
    );

    let mut positions = BTreeMap::new();
    for (sym, p) in &account.positions {
        positions.insert(
            sym.clone(),
            Value::dict(BTreeMap::from([
                ("size".to_string(), Value::Int(p.size)),
                ("avg_price".to_string(), Value::Float(p.avg_price)),
            ])),
        );
    }
    let positions = Value::dict(positions);
    env.insert(
        "account".into(),
        Value::dict(BTreeMap::from([
            ("cash".to_string(), Value::Float(account.cash)),
            ("equity".to_string(), Value::Float(account.equity)),
            ("positions".to_string(), positions.clone()),
        ])),
    );
    env.insert("cash".into(), Value::Float(account.cash));
    env.insert("equity".into(), Value::Float(account.equity));
    env.insert("positions".into(), positions);

    for (sym, sym_df) in extra_dfs {
        let safe: String = sym
            .to_lowercase()
            .chars()
            .map(|c| if c == '.' || c == '-' { '_' } else { c })
            .collect();
        env.insert(format!("df_{safe}"), Value::Frame(Rc::new(sym_df.clone())));
    }
    env
}

fn finish(result: Value, stdout: String) -> Map<String, Json> {
    let mut map = Map::new();
    map.insert("result".into(), normalize::normalize(&result, 0));
    if !stdout.is_empty() {
        map.insert("_stdout".into(), Json::String(stdout));
    }
    map
}

/// Execute untrusted analytic code against a bar-truncated OHLCV view.
///
/// Always returns a JSON map: `{result, _stdout?}` on success, or
/// `{error, remediation}` on any failure including timeout. The caller
/// attaches `_meta`.
pub fn exec_compute(
    code: &str,
    df: &OhlcvFrame,
    account: &AccountView,
    extra_dfs: &BTreeMap<String, OhlcvFrame>,
    limits: &SandboxLimits,
) -> Map<String, Json> {
    let stripped = code.trim();
    if stripped.is_empty() {
        return no_output_map("写一个表达式（如 ta.rsi(close,14)）或赋值给 result。");
    }

    let deadline = Instant::now() + limits.timeout;
    let env = build_env(df, account, extra_dfs);

    // Eval-first: a single expression returns its value directly.
    if let Ok(expr) = ast::parse_expression(stripped) {
        let mut interp = Interp::new(env, deadline);
        return match interp.eval(&expr) {
            Ok(value) => finish(value, interp.stdout),
            Err(kind) => error_map(&kind),
        };
    }

    // Statement path with REPL semantics.
    let stmts = match ast::parse_module(stripped) {
        Ok(stmts) => stmts,
        Err(kind) => return error_map(&kind),
    };
    if stmts.is_empty() {
        return no_output_map("写一个表达式（如 ta.rsi(close,14)）或赋值给 result。");
    }

    let mut interp = Interp::new(env, deadline);
    let last_is_expr = matches!(stmts.last(), Some(Stmt::Expr(_)));

    if last_is_expr {
        let (prefix, last) = stmts.split_at(stmts.len() - 1);
        if let Err(kind) = interp.exec_block(prefix) {
            return error_map(&kind);
        }
        if let Some(result) = interp.env.get("result").cloned() {
            return finish(result, interp.stdout);
        }
        let Stmt::Expr(expr) = &last[0] else {
            unreachable!("guarded by last_is_expr");
        };
        return match interp.eval(expr) {
            Ok(value) => finish(value, interp.stdout),
            Err(kind) => error_map(&kind),
        };
    }

    if let Err(kind) = interp.exec_block(&stmts) {
        return error_map(&kind);
    }
    match interp.env.get("result").cloned() {
        Some(result) => finish(result, interp.stdout),
        None => no_output_map("设置 result=... 或让最后一行成为表达式。"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_account() -> AccountView {
        AccountView {
            cash: 100_000.0,
            equity: 100_000.0,
            positions: BTreeMap::new(),
        }
    }

    fn run(code: &str) -> Map<String, Json> {
        let frame = crate::indicators::make_frame(
            &(0..30).map(|i| 100.0 + i as f64).collect::<Vec<f64>>(),
        );
        exec_compute(
            code,
            &frame,
            &empty_account(),
            &BTreeMap::new(),
            &SandboxLimits::default(),
        )
    }

    #[test]
    fn single_expression_returns_result() {
        let out = run("close[-1]");
        assert_eq!(out["result"], json!(129.0));
        assert!(!out.contains_key("_stdout"));
    }

    #[test]
    fn account_bindings_are_visible() {
        let out = run("cash + 1");
        assert_eq!(out["result"], json!(100_001.0));
    }

    #[test]
    fn repl_returns_last_expression() {
        let out = run("x = close[-1]\nx * 2");
        assert_eq!(out["result"], json!(258.0));
    }

    #[test]
    fn result_variable_wins_over_last_expression() {
        let out = run("result = 42\nclose[-1]");
        assert_eq!(out["result"], json!(42));
    }

    #[test]
    fn statements_only_need_result() {
        let out = run("x = 1");
        assert_eq!(out["error"], json!("未产生输出"));
        let out = run("result = {'rsi': latest(ta.rsi(df.close, 14))}");
        assert!(out["result"]["rsi"].is_number());
    }

    #[test]
    fn stdout_is_captured() {
        let out = run("print('checking', close[-1])\nclose[-1]");
        assert_eq!(out["_stdout"], json!("checking 129\n"));
    }

    #[test]
    fn timeout_fires_on_infinite_loop() {
        let frame = crate::indicators::make_frame(&[100.0, 101.0]);
        let limits = SandboxLimits {
            timeout: Duration::from_millis(50),
        };
        let out = exec_compute(
            "x=0\nwhile True: x+=1",
            &frame,
            &empty_account(),
            &BTreeMap::new(),
            &limits,
        );
        assert!(out["error"].as_str().unwrap().contains("计算超时"));
        assert!(out["remediation"].as_str().unwrap().contains("向量化"));
    }

    #[test]
    fn bbands_unpacking_repl() {
        let out = run("upper, mid, lower = bbands(df.close, 20, 2)\nupper");
        assert!(out["result"].is_number(), "got {:?}", out);
        assert!(!out.contains_key("_stdout"));
    }

    #[test]
    fn import_outside_allowlist_is_blocked() {
        let out = run("import os\nresult = 1");
        assert!(out["error"].as_str().unwrap().starts_with("ImportError"));
        assert!(out["remediation"].as_str().unwrap().contains("pandas"));
    }

    #[test]
    fn forbidden_builtins_are_undefined() {
        for code in ["eval('1')", "exec('x=1')", "globals()", "__import__('os')"] {
            let out = run(code);
            assert!(
                out["error"].as_str().unwrap().starts_with("NameError"),
                "{code} should be undefined, got {out:?}"
            );
        }
    }

    #[test]
    fn open_is_the_price_column_not_file_io() {
        let out = run("open[-1]");
        assert!(out["result"].is_number());
    }

    #[test]
    fn name_error_lists_bindings() {
        let out = run("unknown_thing");
        assert!(out["remediation"].as_str().unwrap().contains("latest"));
    }

    #[test]
    fn zero_division_suggests_nz() {
        let out = run("1 / 0");
        assert!(out["error"].as_str().unwrap().contains("ZeroDivision"));
        assert!(out["remediation"].as_str().unwrap().contains("nz"));
    }

    #[test]
    fn unpack_error_points_to_helpers() {
        let out = run("a, b, c = ta.macd(df.close)");
        assert!(out["error"].as_str().unwrap().starts_with("ValueError"));
        assert!(out["remediation"].as_str().unwrap().contains("macd()"));
    }

    #[test]
    fn extra_frames_are_bound_by_symbol() {
        let frame = crate::indicators::make_frame(&[100.0, 101.0, 102.0]);
        let other = crate::indicators::make_frame(&[50.0, 51.0]);
        let mut extra = BTreeMap::new();
        extra.insert("BRK.B".to_string(), other);
        let out = exec_compute(
            "df_brk_b.close[-1]",
            &frame,
            &empty_account(),
            &extra,
            &SandboxLimits::default(),
        );
        assert_eq!(out["result"], json!(51.0));
    }

    #[test]
    fn repeated_evaluation_is_byte_identical() {
        let code = "result = {'rsi': latest(ta.rsi(df.close, 14)), 'bb': bbands(df.close, 20, 2)}";
        let a = serde_json::to_string(&run(code)).unwrap();
        let b = serde_json::to_string(&run(code)).unwrap();
        assert_eq!(a, b);
    }
}
