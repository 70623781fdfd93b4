//! The aggregate returned by a completed run.

use crate::config::BacktestConfig;
use crate::eval::{ComplianceReport, PerformanceMetrics};
use barlab_core::domain::Decision;
use serde::{Deserialize, Serialize};

/// Complete result of a single backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub performance: PerformanceMetrics,
    pub compliance: ComplianceReport,
    pub decisions: Vec<Decision>,
    pub workspace_path: String,
    pub config: BacktestConfig,
    /// Wall-clock run duration in seconds.
    pub duration: f64,
    pub total_llm_calls: usize,
    pub total_tokens: u64,
}

impl BacktestResult {
    /// The five summary numbers persisted to `result.json`, plus workspace
    /// and duration.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "total_return": self.performance.total_return,
            "max_drawdown": self.performance.max_drawdown,
            "sharpe_ratio": self.performance.sharpe_ratio,
            "total_trades": self.performance.total_trades,
            "workspace_path": self.workspace_path,
            "duration": self.duration,
        })
    }
}
