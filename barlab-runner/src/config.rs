//! Serializable backtest configuration.

use barlab_core::config::{CommissionConfig, ContextConfig, RiskConfig, SlippageConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_initial_cash() -> f64 {
    100_000.0
}

fn default_max_agent_rounds() -> usize {
    5
}

/// Configuration for a single backtest run. Market data is supplied
/// separately — the config describes everything else needed to reproduce
/// the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Primary traded symbol; must exist in the supplied data map.
    pub symbol: String,

    /// Strategy description seeded into the playbook.
    pub strategy_prompt: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// OpenAI-compatible endpoint; `None` = provider default.
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_initial_cash")]
    pub initial_cash: f64,

    #[serde(default)]
    pub risk: RiskConfig,

    #[serde(default)]
    pub commission: CommissionConfig,

    #[serde(default)]
    pub slippage: SlippageConfig,

    /// ReAct loop round bound per decision.
    #[serde(default = "default_max_agent_rounds")]
    pub max_agent_rounds: usize,

    /// First bar index that triggers agent decisions; earlier bars warm up
    /// indicators silently.
    #[serde(default)]
    pub decision_start_bar: usize,

    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub temperature: f64,

    /// Custom system prompt; `{strategy}` expands to the playbook.
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Workspace directory; `None` = unique temp dir per run.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,

    /// Seed for deterministic order ids.
    #[serde(default)]
    pub seed: u64,
}

impl BacktestConfig {
    pub fn new(symbol: impl Into<String>, strategy_prompt: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            strategy_prompt: strategy_prompt.into(),
            model: default_model(),
            base_url: None,
            initial_cash: default_initial_cash(),
            risk: RiskConfig::default(),
            commission: CommissionConfig::default(),
            slippage: SlippageConfig::default(),
            max_agent_rounds: default_max_agent_rounds(),
            decision_start_bar: 0,
            context: ContextConfig::default(),
            temperature: 0.0,
            system_prompt: None,
            workspace_root: None,
            seed: 0,
        }
    }

    /// Load from a TOML file; unset fields take their defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source: Box::new(source),
        })
    }

    /// Pre-run validation; everything that can be checked before the loop
    /// starts is checked here.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbol.is_empty() {
            return Err(ConfigError::Invalid("symbol 不能为空".into()));
        }
        if self.strategy_prompt.trim().is_empty() {
            return Err(ConfigError::Invalid("strategy_prompt 不能为空".into()));
        }
        if self.initial_cash <= 0.0 {
            return Err(ConfigError::Invalid("initial_cash 必须为正".into()));
        }
        if self.max_agent_rounds == 0 {
            return Err(ConfigError::Invalid("max_agent_rounds 必须 >= 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("无法读取配置 {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("配置解析失败 {path}: {source}")]
    Parse {
        path: PathBuf,
        source: Box<toml::de::Error>,
    },

    #[error("无效配置: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_applied() {
        let config = BacktestConfig::new("AAPL", "RSI < 30 买入");
        assert_eq!(config.max_agent_rounds, 5);
        assert_eq!(config.initial_cash, 100_000.0);
        assert_eq!(config.decision_start_bar, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn toml_roundtrip_with_partial_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        std::fs::write(
            &path,
            r#"
symbol = "AAPL"
strategy_prompt = "动量策略"
decision_start_bar = 20

[risk]
max_position_pct = 0.5
max_portfolio_drawdown = 0.2
max_open_positions = 3
max_daily_loss_pct = 0.05

[slippage]
mode = "fixed"
value = 0.5
pct = 0.0
max_volume_pct = 1.0
"#,
        )
        .unwrap();
        let config = BacktestConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.symbol, "AAPL");
        assert_eq!(config.decision_start_bar, 20);
        assert_eq!(config.risk.max_position_pct, 0.5);
        assert_eq!(config.slippage.value, 0.5);
        // Unset sections keep defaults
        assert_eq!(config.max_agent_rounds, 5);
        assert_eq!(config.commission.rate, 0.0);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = BacktestConfig::new("AAPL", "策略");
        config.initial_cash = 0.0;
        assert!(config.validate().is_err());

        let mut config = BacktestConfig::new("AAPL", "策略");
        config.max_agent_rounds = 0;
        assert!(config.validate().is_err());

        let config = BacktestConfig::new("", "策略");
        assert!(config.validate().is_err());
    }
}
