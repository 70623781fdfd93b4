//! Decision — the complete record of one agent decision, plus its tool-call chain.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single tool invocation made during one decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub input: serde_json::Value,
    pub output: serde_json::Value,
}

/// Full record of one agent decision. One line of `decisions.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    // Time identity
    pub datetime: NaiveDateTime,
    pub bar_index: usize,

    // Agent output
    pub action: String,
    pub symbol: Option<String>,
    pub quantity: Option<i64>,
    pub reasoning: String,

    // Snapshots at decision time
    pub market_snapshot: serde_json::Value,
    pub account_snapshot: serde_json::Value,
    pub indicators_used: BTreeMap<String, serde_json::Value>,

    // Tool-call chain in invocation order
    pub tool_calls: Vec<ToolCallRecord>,

    // Filled back by the engine through trade_execute
    pub order_result: Option<serde_json::Value>,

    // LLM metadata
    pub model: String,
    pub tokens_used: u64,
    pub latency_ms: f64,
}

impl Decision {
    pub fn used_indicators(&self) -> bool {
        !self.indicators_used.is_empty()
    }
}

/// Truncated view of a past decision injected into later contexts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionSummary {
    pub bar_index: usize,
    pub action: String,
    pub reasoning: String,
}

impl DecisionSummary {
    /// Summarise with reasoning truncated to `max_chars` characters plus an
    /// ellipsis. Truncation counts characters, not bytes.
    pub fn from_decision(decision: &Decision, max_chars: usize) -> Self {
        let reasoning = if decision.reasoning.chars().count() > max_chars {
            let cut: String = decision.reasoning.chars().take(max_chars).collect();
            format!("{cut}…")
        } else {
            decision.reasoning.clone()
        };
        Self {
            bar_index: decision.bar_index,
            action: decision.action.clone(),
            reasoning,
        }
    }
}
