//! BarLab Core — engine, domain types, sandbox, toolkit, agent loop.
//!
//! The heart of the agent-driven backtester:
//! - Domain types (bars, orders, fills, positions, events, decisions)
//! - Deterministic matching engine with next-bar fills, risk gating, and
//!   bracket/OCO linkage
//! - Stateless indicator library over bar-bounded OHLCV views
//! - Guarded analytic sandbox (embedded language, wall-clock deadline)
//! - Filesystem memory store (playbook / journal / notes / recall)
//! - Fixed tool surface and the bounded tool-calling agent loop
//! - Append-only JSONL trace writer and the chat transport interface

pub mod agent;
pub mod config;
pub mod context;
pub mod data;
pub mod domain;
pub mod engine;
pub mod indicators;
pub mod llm;
pub mod memory;
pub mod sandbox;
pub mod toolkit;
pub mod trace;

pub use agent::{DecisionAgent, LlmAgent};
pub use config::{CommissionConfig, ContextConfig, RiskConfig, SlippageConfig, SlippageMode};
pub use context::{Context, ContextAssembler};
pub use data::{load_csv, make_sample_data, OhlcvFrame, Regime, SampleSpec};
pub use engine::{Engine, EngineConfig, EngineError, SubmitOutcome};
pub use memory::{Memory, Workspace};
pub use toolkit::Toolkit;
pub use trace::TraceWriter;
