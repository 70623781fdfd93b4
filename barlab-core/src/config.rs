//! Engine-level configuration: risk limits, commission, slippage, context windows.

use serde::{Deserialize, Serialize};

/// Buy-side risk gate limits. Sells and covering buys always pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Max single-symbol exposure as a fraction of equity.
    pub max_position_pct: f64,
    /// Max drawdown from peak equity before new buys are blocked.
    pub max_portfolio_drawdown: f64,
    /// Max number of distinct open positions.
    pub max_open_positions: usize,
    /// Max loss since the day's starting equity before new buys are blocked.
    pub max_daily_loss_pct: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_pct: 0.20,
            max_portfolio_drawdown: 0.15,
            max_open_positions: 10,
            max_daily_loss_pct: 0.03,
        }
    }
}

/// Commission as a fraction of fill notional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommissionConfig {
    pub rate: f64,
}

impl Default for CommissionConfig {
    fn default() -> Self {
        // Zero by default; scenarios configure explicitly.
        Self { rate: 0.0 }
    }
}

/// How slippage is applied to market fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlippageMode {
    /// Absolute price offset (`value`).
    Fixed,
    /// Fraction of the fill bar's open (`pct`).
    Pct,
}

/// Slippage and liquidity settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlippageConfig {
    pub mode: SlippageMode,
    /// Fixed offset in price units (mode = fixed).
    pub value: f64,
    /// Fractional offset (mode = pct, 0.01 = 1%).
    pub pct: f64,
    /// Max fill quantity per bar as a fraction of bar volume. 1.0 = unconstrained.
    pub max_volume_pct: f64,
}

impl Default for SlippageConfig {
    fn default() -> Self {
        Self {
            mode: SlippageMode::Fixed,
            value: 0.0,
            pct: 0.0,
            max_volume_pct: 1.0,
        }
    }
}

impl SlippageConfig {
    /// Price offset for a market fill at the given open.
    pub fn offset(&self, open: f64) -> f64 {
        match self.mode {
            SlippageMode::Fixed => self.value,
            SlippageMode::Pct => open * self.pct,
        }
    }
}

/// Context assembly windows and truncation thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// How many recent bars to inject verbatim.
    pub recent_bars_window: usize,
    /// How many past decisions to summarise.
    pub recent_decisions_window: usize,
    /// Reasoning truncation length for decision summaries.
    pub reasoning_max_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            recent_bars_window: 20,
            recent_decisions_window: 3,
            reasoning_max_chars: 80,
        }
    }
}
