//! BarLab CLI — run and sample commands.
//!
//! - `run` — execute an agent-driven backtest from a CSV and a strategy file
//! - `sample` — write synthetic OHLCV data for tests and demos

use anyhow::{Context as _, Result};
use barlab_core::data::{load_csv, make_sample_data, Regime, SampleSpec};
use barlab_core::llm::OpenAiTransport;
use barlab_core::LlmAgent;
use barlab_runner::{BacktestConfig, Runner};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "barlab", about = "Agent-driven bar-stepped backtesting")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a backtest: CSV data + strategy playbook + LLM agent.
    Run {
        /// OHLCV CSV file (date, open, high, low, close, volume; common
        /// vendor aliases accepted)
        #[arg(long)]
        data: PathBuf,

        /// Traded symbol
        #[arg(long)]
        symbol: String,

        /// Markdown/text file with the strategy playbook
        #[arg(long)]
        strategy: PathBuf,

        /// Optional TOML run config; CLI flags override its symbol/model
        #[arg(long)]
        config: Option<PathBuf>,

        /// Model name sent to the chat endpoint
        #[arg(long)]
        model: Option<String>,

        /// OpenAI-compatible base URL (api key from OPENAI_API_KEY)
        #[arg(long)]
        base_url: Option<String>,

        /// First bar index that triggers decisions (earlier bars warm up)
        #[arg(long)]
        start_bar: Option<usize>,

        /// Max ReAct rounds per decision
        #[arg(long)]
        rounds: Option<usize>,

        /// Initial cash
        #[arg(long)]
        cash: Option<f64>,

        /// Workspace directory (default: unique temp dir)
        #[arg(long)]
        workspace: Option<PathBuf>,
    },

    /// Generate synthetic OHLCV data and write it as CSV.
    Sample {
        /// Output CSV path
        #[arg(long)]
        out: PathBuf,

        /// Market regime: random, trending, mean_reverting, volatile, bull_bear
        #[arg(long, default_value = "random")]
        regime: Regime,

        /// Number of bars
        #[arg(long, default_value_t = 252)]
        periods: usize,

        /// First date (YYYY-MM-DD)
        #[arg(long, default_value = "2023-01-01")]
        start: NaiveDate,

        /// Initial price
        #[arg(long, default_value_t = 150.0)]
        price: f64,

        /// RNG seed
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Run {
            data,
            symbol,
            strategy,
            config,
            model,
            base_url,
            start_bar,
            rounds,
            cash,
            workspace,
        } => run_backtest(
            data, symbol, strategy, config, model, base_url, start_bar, rounds, cash, workspace,
        ),
        Command::Sample {
            out,
            regime,
            periods,
            start,
            price,
            seed,
        } => {
            let frame = make_sample_data(&SampleSpec {
                start,
                periods,
                initial_price: price,
                seed,
                regime,
            });
            frame
                .write_csv(&out)
                .with_context(|| format!("写入 {} 失败", out.display()))?;
            println!("已写入 {} 行合成数据到 {}", frame.len(), out.display());
            Ok(())
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_backtest(
    data: PathBuf,
    symbol: String,
    strategy: PathBuf,
    config: Option<PathBuf>,
    model: Option<String>,
    base_url: Option<String>,
    start_bar: Option<usize>,
    rounds: Option<usize>,
    cash: Option<f64>,
    workspace: Option<PathBuf>,
) -> Result<()> {
    let frame = load_csv(&data).with_context(|| format!("加载 {} 失败", data.display()))?;
    let strategy_prompt = std::fs::read_to_string(&strategy)
        .with_context(|| format!("读取策略文件 {} 失败", strategy.display()))?;

    let mut cfg = match config {
        Some(path) => BacktestConfig::from_toml_file(&path)?,
        None => BacktestConfig::new(symbol.clone(), strategy_prompt.clone()),
    };
    cfg.symbol = symbol;
    cfg.strategy_prompt = strategy_prompt;
    if let Some(model) = model {
        cfg.model = model;
    }
    if let Some(base_url) = base_url {
        cfg.base_url = Some(base_url);
    }
    if let Some(start_bar) = start_bar {
        cfg.decision_start_bar = start_bar;
    }
    if let Some(rounds) = rounds {
        cfg.max_agent_rounds = rounds;
    }
    if let Some(cash) = cash {
        cfg.initial_cash = cash;
    }
    if workspace.is_some() {
        cfg.workspace_root = workspace;
    }

    let transport = OpenAiTransport::new(cfg.base_url.clone(), None)?;
    let mut agent = LlmAgent::new(cfg.model.clone(), Box::new(transport))
        .with_max_rounds(cfg.max_agent_rounds)
        .with_temperature(cfg.temperature);
    if let Some(prompt) = &cfg.system_prompt {
        agent = agent.with_system_prompt(prompt.clone());
    }

    let result = Runner.run(&cfg, frame, &mut agent)?;

    let p = &result.performance;
    println!();
    println!("回测完成  ({:.1}s, {} 次决策, {} tokens)", result.duration, result.total_llm_calls, result.total_tokens);
    println!("  总收益率    {:>10.2}%", p.total_return * 100.0);
    println!("  最大回撤    {:>10.2}%", p.max_drawdown * 100.0);
    println!("  夏普比率    {:>10.4}", p.sharpe_ratio);
    println!("  索提诺比率  {:>10.4}", p.sortino_ratio);
    println!("  年化波动率  {:>10.4}", p.volatility);
    println!("  CAGR        {:>10.2}%", p.cagr * 100.0);
    println!("  交易次数    {:>10}", p.total_trades);
    println!("  胜率        {:>10.1}%", p.win_rate * 100.0);
    println!("  盈亏比      {:>10.3}", p.profit_factor);
    println!();
    println!("  决策分布    {:?}", result.compliance.action_distribution);
    println!("  工作空间    {}", result.workspace_path);
    Ok(())
}
