//! Engine integration tests: next-bar fills, risk gating, bracket/OCO,
//! partial fills, expiry, and accounting identities.

use barlab_core::config::{CommissionConfig, RiskConfig, SlippageConfig, SlippageMode};
use barlab_core::data::OhlcvFrame;
use barlab_core::domain::{EngineEventKind, OrderSide, OrderType};
use barlab_core::engine::{Engine, EngineConfig, SubmitOutcome};
use chrono::{NaiveDate, NaiveDateTime};

fn dt(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, day)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

/// Frame from (open, high, low, close, volume) rows, one row per weekday.
fn frame(rows: &[(f64, f64, f64, f64, f64)]) -> OhlcvFrame {
    let mut f = OhlcvFrame {
        dates: Vec::new(),
        open: Vec::new(),
        high: Vec::new(),
        low: Vec::new(),
        close: Vec::new(),
        volume: Vec::new(),
    };
    for (i, &(o, h, l, c, v)) in rows.iter().enumerate() {
        f.dates.push(dt(1 + i as u32, 0));
        f.open.push(o);
        f.high.push(h);
        f.low.push(l);
        f.close.push(c);
        f.volume.push(v);
    }
    f
}

fn config(risk_pct: f64, slippage_value: f64) -> EngineConfig {
    EngineConfig {
        initial_cash: 100_000.0,
        risk: RiskConfig {
            max_position_pct: risk_pct,
            ..RiskConfig::default()
        },
        commission: CommissionConfig { rate: 0.0 },
        slippage: SlippageConfig {
            mode: SlippageMode::Fixed,
            value: slippage_value,
            pct: 0.0,
            max_volume_pct: 1.0,
        },
        seed: 42,
    }
}

const SCENARIO_BARS: [(f64, f64, f64, f64, f64); 3] = [
    (100.0, 105.0, 99.0, 103.0, 1_000_000.0),
    (103.5, 108.0, 102.0, 107.0, 1_000_000.0),
    (107.0, 110.0, 106.0, 109.0, 1_000_000.0),
];

#[test]
fn next_bar_market_fill_at_open_plus_slippage() {
    let mut engine = Engine::new(frame(&SCENARIO_BARS), "AAPL", config(1.0, 0.5)).unwrap();
    let _ = engine.advance().unwrap();
    let outcome = engine.submit_order("AAPL", OrderSide::Buy, 100, OrderType::Market, None);
    assert!(outcome.is_submitted());

    let bar = engine.advance().unwrap();
    let fills = engine.match_orders(&bar);
    assert_eq!(fills.len(), 1);
    assert_eq!(fills[0].price, 104.0);
    assert_eq!(fills[0].quantity, 100);
    assert_eq!(engine.cash(), 100_000.0 - 10_400.0);

    let snap = engine.account_snapshot().unwrap();
    let pos = &snap.positions["AAPL"];
    assert_eq!(pos.size, 100);
    assert_eq!(pos.avg_price, 104.0);
}

#[test]
fn position_cap_rejection_carries_max_allowed_qty() {
    let mut engine = Engine::new(frame(&SCENARIO_BARS), "AAPL", config(0.2, 0.0)).unwrap();
    let _ = engine.advance().unwrap();
    let outcome = engine.submit_order("AAPL", OrderSide::Buy, 1000, OrderType::Market, None);
    match outcome {
        SubmitOutcome::Rejected {
            reason,
            max_allowed_qty,
        } => {
            assert_eq!(reason, "仓位超限");
            // floor(100000 * 0.2 / 103) = 194
            assert_eq!(max_allowed_qty, Some(194));
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(engine.equity_curve().len(), 1);
    assert!(engine.account_snapshot().unwrap().positions.is_empty());
    assert_eq!(engine.rejected_orders().len(), 1);
}

#[test]
fn bracket_take_profit_fills_and_cancels_stop_sibling() {
    let bars = [
        (100.0, 105.0, 99.0, 103.0, 1_000_000.0),
        (105.0, 112.0, 104.0, 107.0, 1_000_000.0),
        (107.0, 110.0, 106.0, 109.0, 1_000_000.0),
    ];
    let mut engine = Engine::new(frame(&bars), "AAPL", config(1.0, 0.0)).unwrap();
    let _ = engine.advance().unwrap();
    let outcome = engine.submit_bracket("AAPL", OrderSide::Buy, 100, 100.0, 110.0);
    assert!(outcome.is_submitted());
    assert_eq!(engine.dormant_bracket_count(), 1);

    let bar = engine.advance().unwrap();
    let fills = engine.match_orders(&bar);

    // Parent at the open, take-profit at its limit — same call
    assert_eq!(fills.len(), 2);
    assert_eq!(fills[0].price, 105.0);
    assert_eq!(fills[1].price, 110.0);
    assert_eq!(fills[1].side, OrderSide::Sell);

    // One closed trade: (110 - 105) * 100
    assert_eq!(engine.trade_log().len(), 1);
    assert_eq!(engine.trade_log()[0].pnl, 500.0);

    // Stop sibling removed by end of round; nothing dormant, nothing pending
    assert!(engine.pending_orders().is_empty());
    assert_eq!(engine.dormant_bracket_count(), 0);
    assert!(engine.account_snapshot().unwrap().positions.is_empty());

    // No stop fill anywhere in history
    assert!(engine.fills().iter().all(|f| f.price != 100.0));

    // The sibling's removal is visible as a cancelled event
    let events = engine.drain_events();
    let cancelled: Vec<_> = events
        .iter()
        .filter(|e| e.kind == EngineEventKind::Cancelled)
        .collect();
    assert_eq!(cancelled.len(), 1);
}

#[test]
fn bracket_stop_loss_path() {
    let bars = [
        (100.0, 105.0, 99.0, 103.0, 1_000_000.0),
        (105.0, 108.0, 98.0, 99.0, 1_000_000.0),
    ];
    let mut engine = Engine::new(frame(&bars), "AAPL", config(1.0, 0.0)).unwrap();
    let _ = engine.advance().unwrap();
    engine.submit_bracket("AAPL", OrderSide::Buy, 100, 100.0, 110.0);

    let bar = engine.advance().unwrap();
    let fills = engine.match_orders(&bar);
    // Parent at 105, stop at 100 (low 98 trades through)
    assert_eq!(fills.len(), 2);
    assert_eq!(fills[1].price, 100.0);
    assert_eq!(engine.trade_log()[0].pnl, -500.0);
    assert!(engine.pending_orders().is_empty());
}

#[test]
fn unfilled_bracket_parent_keeps_children_dormant() {
    let mut engine = Engine::new(frame(&SCENARIO_BARS), "AAPL", config(1.0, 0.0)).unwrap();
    let _ = engine.advance().unwrap();
    engine.submit_bracket("AAPL", OrderSide::Buy, 100, 100.0, 110.0);
    // Before any matching call the children are not in the pending queue
    assert_eq!(engine.dormant_bracket_count(), 1);
    assert_eq!(engine.pending_orders().len(), 1); // parent only
}

#[test]
fn volume_cap_produces_partial_fill_and_residual() {
    let bars = [
        (100.0, 105.0, 99.0, 103.0, 1000.0),
        (103.0, 108.0, 102.0, 107.0, 1000.0),
        (107.0, 110.0, 106.0, 109.0, 1000.0),
    ];
    let mut config = config(1.0, 0.0);
    config.slippage.max_volume_pct = 0.05; // cap = 50 per bar
    let mut engine = Engine::new(frame(&bars), "AAPL", config).unwrap();
    let _ = engine.advance().unwrap();
    let outcome = engine.submit_order("AAPL", OrderSide::Buy, 100, OrderType::Market, None);
    let SubmitOutcome::Submitted { order_id } = outcome else {
        panic!("submit failed");
    };

    let bar = engine.advance().unwrap();
    let fills = engine.match_orders(&bar);
    assert_eq!(fills.len(), 1);
    assert_eq!(fills[0].quantity, 50);

    // Exactly one residual with the same id and the reduced quantity
    let pending = engine.pending_orders();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].order_id, order_id);
    assert_eq!(pending[0].quantity, 50);

    // Residual fills next bar
    let bar = engine.advance().unwrap();
    let fills = engine.match_orders(&bar);
    assert_eq!(fills.len(), 1);
    assert_eq!(fills[0].quantity, 50);
    assert!(engine.pending_orders().is_empty());
    assert_eq!(engine.account_snapshot().unwrap().positions["AAPL"].size, 100);
}

#[test]
fn order_expires_after_valid_bars() {
    let bars = [
        (100.0, 105.0, 99.0, 103.0, 1_000_000.0),
        (103.0, 104.0, 102.0, 103.5, 1_000_000.0),
        (103.5, 104.0, 103.0, 103.8, 1_000_000.0),
    ];
    let mut engine = Engine::new(frame(&bars), "AAPL", config(1.0, 0.0)).unwrap();
    let _ = engine.advance().unwrap();
    // Limit far below the market, expiring after 1 bar
    engine.submit_order(
        "AAPL",
        OrderSide::Buy,
        10,
        OrderType::Limit { limit_price: 50.0 },
        Some(1),
    );

    let bar = engine.advance().unwrap();
    engine.match_orders(&bar); // 1 - 0 = 1, not > 1 → stays
    assert_eq!(engine.pending_orders().len(), 1);

    let bar = engine.advance().unwrap();
    engine.match_orders(&bar); // 2 - 0 = 2 > 1 → expired
    assert!(engine.pending_orders().is_empty());
    let events = engine.drain_events();
    assert!(events.iter().any(|e| e.kind == EngineEventKind::Expired));
}

#[test]
fn limit_buy_fills_at_limit_price() {
    let bars = [
        (100.0, 105.0, 99.0, 103.0, 1_000_000.0),
        (103.0, 104.0, 100.5, 102.0, 1_000_000.0),
    ];
    let mut engine = Engine::new(frame(&bars), "AAPL", config(1.0, 0.5)).unwrap();
    let _ = engine.advance().unwrap();
    engine.submit_order(
        "AAPL",
        OrderSide::Buy,
        10,
        OrderType::Limit { limit_price: 101.0 },
        None,
    );
    let bar = engine.advance().unwrap();
    let fills = engine.match_orders(&bar);
    // Limit orders fill at the limit, slippage-free
    assert_eq!(fills[0].price, 101.0);
}

#[test]
fn commission_is_rate_times_notional() {
    let mut cfg = config(1.0, 0.0);
    cfg.commission.rate = 0.001;
    let mut engine = Engine::new(frame(&SCENARIO_BARS), "AAPL", cfg).unwrap();
    let _ = engine.advance().unwrap();
    engine.submit_order("AAPL", OrderSide::Buy, 100, OrderType::Market, None);
    let bar = engine.advance().unwrap();
    let fills = engine.match_orders(&bar);
    // 103.5 * 100 * 0.001 = 10.35
    assert_eq!(fills[0].commission, 10.35);
    assert_eq!(engine.cash(), 100_000.0 - 10_350.0 - 10.35);
}

#[test]
fn short_open_and_cover_accounting() {
    let bars = [
        (100.0, 105.0, 99.0, 103.0, 1_000_000.0),
        (100.0, 101.0, 95.0, 96.0, 1_000_000.0),
        (90.0, 92.0, 88.0, 91.0, 1_000_000.0),
        (90.0, 91.0, 89.0, 90.0, 1_000_000.0),
    ];
    let mut engine = Engine::new(frame(&bars), "AAPL", config(1.0, 0.0)).unwrap();
    let _ = engine.advance().unwrap();
    engine.submit_order("AAPL", OrderSide::Sell, 100, OrderType::Market, None);

    let bar = engine.advance().unwrap();
    engine.match_orders(&bar); // short open at 100
    let snap = engine.account_snapshot().unwrap();
    assert_eq!(snap.positions["AAPL"].size, -100);
    assert_eq!(engine.cash(), 110_000.0);

    // Close the short: covering buy passes risk
    let outcome = engine.submit_close("AAPL");
    assert!(outcome.is_submitted());
    let bar = engine.advance().unwrap();
    engine.match_orders(&bar); // cover at 90
    assert!(engine.account_snapshot().unwrap().positions.is_empty());
    assert_eq!(engine.trade_log().len(), 1);
    assert_eq!(engine.trade_log()[0].pnl, 1000.0);
    assert_eq!(engine.cash(), 101_000.0);
}

#[test]
fn pnl_sum_matches_equity_change_without_costs() {
    // rate = 0, slippage = 0: Σ trade pnl == final equity − initial cash
    // once the run ends flat.
    let bars = [
        (100.0, 105.0, 99.0, 103.0, 1_000_000.0),
        (104.0, 108.0, 103.0, 107.0, 1_000_000.0),
        (107.0, 111.0, 106.0, 110.0, 1_000_000.0),
        (112.0, 115.0, 111.0, 114.0, 1_000_000.0),
        (113.0, 116.0, 112.0, 115.0, 1_000_000.0),
    ];
    let mut engine = Engine::new(frame(&bars), "AAPL", config(1.0, 0.0)).unwrap();
    let _ = engine.advance().unwrap();
    engine.submit_order("AAPL", OrderSide::Buy, 100, OrderType::Market, None);
    let bar = engine.advance().unwrap();
    engine.match_orders(&bar);

    engine.submit_close("AAPL");
    let bar = engine.advance().unwrap();
    engine.match_orders(&bar);

    while engine.has_next() {
        let bar = engine.advance().unwrap();
        engine.match_orders(&bar);
    }

    let pnl_sum: f64 = engine.trade_log().iter().map(|t| t.pnl).sum();
    let final_equity = *engine.equity_curve().last().unwrap();
    assert!((pnl_sum - (final_equity - 100_000.0)).abs() < 1e-9);
}

#[test]
fn drawdown_gate_blocks_new_buys() {
    let bars = [
        (100.0, 105.0, 99.0, 103.0, 1_000_000.0),
        (103.0, 104.0, 102.0, 103.0, 1_000_000.0),
        (103.0, 104.0, 80.0, 81.0, 1_000_000.0), // crash
    ];
    let mut cfg = config(1.0, 0.0);
    cfg.risk.max_portfolio_drawdown = 0.0001;
    let mut engine = Engine::new(frame(&bars), "AAPL", cfg).unwrap();
    let _ = engine.advance().unwrap();
    engine.submit_order("AAPL", OrderSide::Buy, 100, OrderType::Market, None);
    let bar = engine.advance().unwrap();
    engine.match_orders(&bar);
    let bar = engine.advance().unwrap();
    engine.match_orders(&bar);

    // Position lost >0.01% of peak equity — gate 3 fires
    let outcome = engine.submit_order("AAPL", OrderSide::Buy, 1, OrderType::Market, None);
    match outcome {
        SubmitOutcome::Rejected { reason, .. } => assert_eq!(reason, "组合回撤超限"),
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[test]
fn daily_loss_gate_uses_intraday_day_start() {
    // Three intraday bars on the same date; equity drops within the day.
    let f = OhlcvFrame {
        dates: vec![dt(2, 9), dt(2, 10), dt(2, 11)],
        open: vec![100.0, 100.0, 95.0],
        high: vec![101.0, 100.5, 95.5],
        low: vec![99.0, 94.0, 90.0],
        close: vec![100.0, 95.0, 90.0],
        volume: vec![1_000_000.0; 3],
    };
    let mut cfg = config(1.0, 0.0);
    cfg.risk.max_daily_loss_pct = 0.0001;
    cfg.risk.max_portfolio_drawdown = 1.0; // keep gate 3 quiet
    let mut engine = Engine::new(f, "AAPL", cfg).unwrap();
    let _ = engine.advance().unwrap();
    engine.submit_order("AAPL", OrderSide::Buy, 100, OrderType::Market, None);
    let bar = engine.advance().unwrap();
    engine.match_orders(&bar);
    let bar = engine.advance().unwrap();
    engine.match_orders(&bar);

    let outcome = engine.submit_order("AAPL", OrderSide::Buy, 1, OrderType::Market, None);
    match outcome {
        SubmitOutcome::Rejected { reason, .. } => assert_eq!(reason, "单日亏损超限"),
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[test]
fn max_open_positions_gate() {
    let mut data = std::collections::BTreeMap::new();
    data.insert("AAA".to_string(), frame(&SCENARIO_BARS));
    data.insert("BBB".to_string(), frame(&SCENARIO_BARS));
    let mut cfg = config(1.0, 0.0);
    cfg.risk.max_open_positions = 1;
    let mut engine = Engine::new_multi(data, "AAA", cfg).unwrap();
    let _ = engine.advance().unwrap();
    engine.submit_order("AAA", OrderSide::Buy, 10, OrderType::Market, None);
    let bar = engine.advance().unwrap();
    engine.match_orders(&bar);

    // AAA held; opening BBB exceeds the count
    let outcome = engine.submit_order("BBB", OrderSide::Buy, 10, OrderType::Market, None);
    match outcome {
        SubmitOutcome::Rejected { reason, .. } => assert_eq!(reason, "持仓数量超限"),
        other => panic!("expected rejection, got {other:?}"),
    }
    // Adding to the held symbol is still allowed
    let outcome = engine.submit_order("AAA", OrderSide::Buy, 10, OrderType::Market, None);
    assert!(outcome.is_submitted());
}

#[test]
fn averaging_up_reweights_entry_price() {
    let bars = [
        (100.0, 105.0, 99.0, 103.0, 1_000_000.0),
        (100.0, 105.0, 99.0, 104.0, 1_000_000.0),
        (110.0, 112.0, 108.0, 111.0, 1_000_000.0),
    ];
    let mut engine = Engine::new(frame(&bars), "AAPL", config(1.0, 0.0)).unwrap();
    let _ = engine.advance().unwrap();
    engine.submit_order("AAPL", OrderSide::Buy, 100, OrderType::Market, None);
    let bar = engine.advance().unwrap();
    engine.match_orders(&bar); // 100 @ 100
    engine.submit_order("AAPL", OrderSide::Buy, 100, OrderType::Market, None);
    let bar = engine.advance().unwrap();
    engine.match_orders(&bar); // 100 @ 110

    let snap = engine.account_snapshot().unwrap();
    assert_eq!(snap.positions["AAPL"].size, 200);
    assert_eq!(snap.positions["AAPL"].avg_price, 105.0);
}

#[test]
fn deterministic_order_ids_across_runs() {
    let run = || {
        let mut engine = Engine::new(frame(&SCENARIO_BARS), "AAPL", config(1.0, 0.0)).unwrap();
        let _ = engine.advance().unwrap();
        let a = engine.submit_order("AAPL", OrderSide::Buy, 10, OrderType::Market, None);
        let b = engine.submit_order("AAPL", OrderSide::Buy, 10, OrderType::Market, None);
        (a, b)
    };
    assert_eq!(run(), run());
}
