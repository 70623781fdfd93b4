//! Domain types: bars, orders, fills, positions, account snapshots, events, decisions.

pub mod bar;
pub mod decision;
pub mod event;
pub mod fill;
pub mod ids;
pub mod order;
pub mod position;

pub use bar::{Bar, MarketSnapshot};
pub use decision::{Decision, DecisionSummary, ToolCallRecord};
pub use event::{EngineEvent, EngineEventKind};
pub use fill::{Fill, TradeLogEntry};
pub use ids::OrderIdGen;
pub use order::{Order, OrderSide, OrderType, PendingOrderSummary, RejectedOrder};
pub use position::{AccountSnapshot, Position};
