//! The backtest loop: advance → match → assemble → decide → record.
//!
//! Per bar, in order: the engine advances and matches last bar's orders;
//! events drain; the context assembles from engine + memory + decision
//! history; a fresh toolkit serves the agent's decision; the trace and
//! decision logs append. Warm-up bars before `decision_start_bar` skip the
//! agent but still record fills into memory.
//!
//! Trace ordering within a bar is fixed: `agent_step`, `context`,
//! (`llm_call`, `tool_call`…)*, `decision`. `decisions.jsonl` is written
//! after the `decision` trace line.

use crate::config::{BacktestConfig, ConfigError};
use crate::eval::{calc_compliance, PerformanceMetrics};
use crate::result::BacktestResult;
use barlab_core::agent::DecisionAgent;
use barlab_core::context::ContextAssembler;
use barlab_core::data::OhlcvFrame;
use barlab_core::domain::Decision;
use barlab_core::engine::{Engine, EngineConfig, EngineError};
use barlab_core::memory::{Memory, MemoryError, Workspace};
use barlab_core::toolkit::Toolkit;
use barlab_core::trace::TraceWriter;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Errors that abort a run before or outside the per-bar loop. Inside the
/// loop, failures become structured tool errors or forced holds — with one
/// exception: an unusable workspace filesystem is fatal.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error("无法写入 {path}: {source}")]
    Persist {
        path: String,
        source: std::io::Error,
    },
}

/// Backtest orchestrator.
#[derive(Debug, Default)]
pub struct Runner;

impl Runner {
    /// Run a single-symbol backtest.
    pub fn run(
        &self,
        config: &BacktestConfig,
        data: OhlcvFrame,
        agent: &mut dyn DecisionAgent,
    ) -> Result<BacktestResult, RunError> {
        let mut map = BTreeMap::new();
        map.insert(config.symbol.clone(), data);
        self.run_multi(config, map, agent)
    }

    /// Run a backtest over an aligned multi-symbol data map. The config's
    /// symbol is the primary asset.
    pub fn run_multi(
        &self,
        config: &BacktestConfig,
        data: BTreeMap<String, OhlcvFrame>,
        agent: &mut dyn DecisionAgent,
    ) -> Result<BacktestResult, RunError> {
        config.validate()?;
        let first_date = data
            .get(&config.symbol)
            .and_then(|f| f.dates.first())
            .map(|d| d.date())
            .ok_or_else(|| {
                ConfigError::Invalid(format!("symbol '{}' 不在数据中或数据为空", config.symbol))
            })?;

        let ws = Workspace::create(config.workspace_root.clone())?;
        let mut engine = Engine::new_multi(
            data,
            &config.symbol,
            EngineConfig {
                initial_cash: config.initial_cash,
                risk: config.risk.clone(),
                commission: config.commission.clone(),
                slippage: config.slippage.clone(),
                seed: config.seed,
            },
        )?;
        let memory = Memory::new(ws.clone(), first_date);
        memory.init_playbook(&config.strategy_prompt)?;
        let assembler = ContextAssembler::new(config.context.clone());
        let trace = Arc::new(TraceWriter::new(ws.root().join("trace.jsonl")));
        agent.attach_trace(trace.clone());

        let mut decisions: Vec<Decision> = Vec::new();
        let mut pending_events: Vec<Value> = Vec::new();
        let t0 = Instant::now();

        while engine.has_next() {
            let bar = engine.advance()?;
            memory.set_date(bar.datetime.date());

            // Match orders submitted during the previous bar's decision.
            engine.match_orders(&bar);
            let mut events: Vec<Value> = engine
                .drain_events()
                .iter()
                .map(|e| e.to_context_map())
                .collect();
            events.append(&mut pending_events);

            let bar_dt = bar.datetime.date().to_string();
            if bar.index < config.decision_start_bar {
                // Warm-up: indicators accumulate silently, fills still land
                // in the journal.
                trigger_memory_moments(&memory, &events, bar.index, &bar_dt)?;
                continue;
            }

            trace.set_bar(bar.index);
            trace.write(json!({"type": "agent_step", "dt": bar_dt}));

            let context = assembler.assemble(&engine, &memory, bar.index, &events, &decisions)?;
            trace.write(json!({
                "type": "context",
                "formatted_text": context.formatted_text,
                "market": context.market,
                "account": context.account,
            }));

            // Fresh toolkit per decision
            let mut toolkit = Toolkit::new(&mut engine, &memory);
            let decision = agent.decide(&context, &mut toolkit);
            drop(toolkit);
            tracing::info!(
                bar = bar.index,
                date = %bar_dt,
                action = %decision.action,
                tokens = decision.tokens_used,
                "decision"
            );

            let mut decision_event = serde_json::to_value(&decision)
                .unwrap_or_else(|_| json!({}))
                .as_object()
                .cloned()
                .unwrap_or_default();
            decision_event.insert("type".into(), json!("decision"));
            trace.write(Value::Object(decision_event));

            trigger_memory_moments(&memory, &events, bar.index, &bar_dt)?;
            record_decision(&ws, &decision)?;
            decisions.push(decision);
        }

        let duration = t0.elapsed().as_secs_f64();
        let performance = PerformanceMetrics::compute(engine.equity_curve(), engine.trade_log());
        let compliance = calc_compliance(&decisions);
        let total_tokens = decisions.iter().map(|d| d.tokens_used).sum();

        let result = BacktestResult {
            performance,
            compliance,
            total_llm_calls: decisions.len(),
            total_tokens,
            decisions,
            workspace_path: ws.path_string(),
            config: config.clone(),
            duration,
        };
        save_result(&ws, &result)?;
        tracing::info!(
            workspace = %result.workspace_path,
            total_return = result.performance.total_return,
            trades = result.performance.total_trades,
            "backtest finished"
        );
        Ok(result)
    }
}

/// Fill events drive journal entries so the agent can learn from its own
/// execution history.
fn trigger_memory_moments(
    memory: &Memory,
    events: &[Value],
    bar_index: usize,
    bar_dt: &str,
) -> Result<(), MemoryError> {
    for event in events {
        if event.get("type").and_then(Value::as_str) == Some("fill") {
            let side = event.get("side").and_then(Value::as_str).unwrap_or("?");
            let symbol = event.get("symbol").and_then(Value::as_str).unwrap_or("?");
            let quantity = event.get("quantity").and_then(Value::as_i64).unwrap_or(0);
            let price = event.get("price").and_then(Value::as_f64).unwrap_or(0.0);
            memory.log(
                &format!("[bar={bar_index} {bar_dt}] 成交: {side} {symbol} {quantity}股 @ {price:.2}"),
                None,
            )?;
        }
    }
    Ok(())
}

fn record_decision(ws: &Workspace, decision: &Decision) -> Result<(), RunError> {
    let path = ws.root().join("decisions.jsonl");
    let line = serde_json::to_string(decision).unwrap_or_else(|_| "{}".to_string());
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|source| RunError::Persist {
            path: path.display().to_string(),
            source,
        })?;
    writeln!(file, "{line}").map_err(|source| RunError::Persist {
        path: path.display().to_string(),
        source,
    })
}

fn save_result(ws: &Workspace, result: &BacktestResult) -> Result<(), RunError> {
    let path = ws.root().join("result.json");
    let text = serde_json::to_string_pretty(&result.summary())
        .unwrap_or_else(|_| "{}".to_string());
    std::fs::write(&path, text).map_err(|source| RunError::Persist {
        path: path.display().to_string(),
        source,
    })
}
