//! End-to-end engine behaviour through the simulated broker

use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::America::New_York;

use vd_futures_engine::config::{CalculatorSettings, StrategyConfig};
use vd_futures_engine::execution::{OrderType, SimulatedBroker};
use vd_futures_engine::replay::{apply_event, EventOutcome, MarketEvent};
use vd_futures_engine::trading_core::{
    BarOutcome, CalculatorKind, Decision, PositionState, RollingIndicators, StrategyEngine, SuppressReason,
};
use vd_futures_engine::{Bar, PositionBook, Side, Tick};

type Engine = StrategyEngine<SimulatedBroker, RollingIndicators>;

fn et(hour: u32, minute: u32) -> DateTime<Utc> {
    New_York
        .with_ymd_and_hms(2025, 3, 3, hour, minute, 0)
        .unwrap()
        .with_timezone(&Utc)
}

/// Divergence-only voting, fast warmup, no slippage
fn config() -> StrategyConfig {
    let mut config = StrategyConfig::es();
    for kind in CalculatorKind::ALL {
        *config.signals.settings_mut(kind) = CalculatorSettings {
            entry: false,
            exit: false,
            ..Default::default()
        };
    }
    config.signals.vd_divergence = CalculatorSettings {
        entry: true,
        exit: true,
        threshold: 0.0,
        lookback: 20,
    };
    config.signals.entry_required = 1;
    config.signals.exit_required = 1;
    config.warmup.min_bars = 5;
    config.time_filter.closed_weekdays.clear();
    config.positions.slippage_multiplier = 0.0;
    config.positions.slippage_seed = Some(11);
    config
}

fn engine_with(config: StrategyConfig, broker: SimulatedBroker) -> Engine {
    StrategyEngine::new(config, broker, RollingIndicators::new(3, 3))
}

fn engine(config: StrategyConfig) -> Engine {
    let broker = SimulatedBroker::new(&config.instrument.symbol, 50_000.0, config.instrument.point_value);
    engine_with(config, broker)
}

fn neutral(t: DateTime<Utc>) -> Bar {
    Bar::new(t, 4500.0, 4500.5, 4499.5, 4500.0, 1000).with_delta(500, 500)
}

/// Closed down on buying: long divergence
fn long_bar(t: DateTime<Utc>) -> Bar {
    Bar::new(t, 4500.25, 4500.75, 4499.5, 4500.0, 1000).with_delta(700, 300)
}

/// Closed up on selling: short divergence
fn short_bar(t: DateTime<Utc>) -> Bar {
    Bar::new(t, 4500.0, 4500.75, 4499.5, 4500.25, 1000).with_delta(300, 700)
}

fn close_bar(engine: &mut Engine, bar: Bar) -> BarOutcome {
    match apply_event(engine, &MarketEvent::BarClose(bar)) {
        EventOutcome::Bar(outcome) => outcome,
        EventOutcome::Tick(_) => unreachable!(),
    }
}

/// Five neutral bars from `hour:minute`; returns the next free minute offset
fn warm_up(engine: &mut Engine, hour: u32, minute: u32) -> DateTime<Utc> {
    let start = et(hour, minute);
    for i in 0..5 {
        close_bar(engine, neutral(start + Duration::minutes(i)));
    }
    assert!(engine.warmup().is_complete());
    start + Duration::minutes(5)
}

fn decision(outcome: BarOutcome) -> Decision {
    match outcome {
        BarOutcome::Decided { decision, .. } => decision,
        other => panic!("expected a decision, got {:?}", other),
    }
}

#[test]
fn test_warmup_suppresses_decisions() {
    let mut engine = engine(config());
    let outcome = close_bar(&mut engine, long_bar(et(10, 0)));
    assert_eq!(outcome, BarOutcome::WarmingUp);
    assert_eq!(engine.state(), PositionState::Flat);
}

#[test]
fn test_stack_to_max_then_suppress_then_exit() {
    let mut engine = engine(config());
    let mut t = warm_up(&mut engine, 10, 0);

    for stack in 1..=3 {
        let d = decision(close_bar(&mut engine, long_bar(t)));
        assert_eq!(d, Decision::Enter { side: Side::Long, stack });
        assert_eq!(engine.state(), PositionState::Long(stack));
        t += Duration::minutes(1);
    }

    let d = decision(close_bar(&mut engine, long_bar(t)));
    assert_eq!(
        d,
        Decision::Suppressed {
            side: Side::Long,
            reason: SuppressReason::MaxStack
        }
    );
    assert_eq!(engine.state(), PositionState::Long(3));
    assert_eq!(engine.stops().len(), 3);
    // Stop + target per unit
    assert_eq!(engine.broker().working_orders().len(), 6);

    // Short divergence is an exit vote for longs and wins over reversal
    t += Duration::minutes(1);
    let d = decision(close_bar(&mut engine, short_bar(t)));
    assert_eq!(d, Decision::Exit { side: Side::Long });
    assert_eq!(engine.state(), PositionState::Flat);
    assert!(engine.stops().is_empty());
    assert!(engine.broker().working_orders().is_empty());
    assert_eq!(engine.broker().trades().len(), 3);

    t += Duration::minutes(1);
    let d = decision(close_bar(&mut engine, short_bar(t)));
    assert_eq!(d, Decision::Enter { side: Side::Short, stack: 1 });

    let stats = engine.stats();
    assert_eq!((stats.entries, stats.exits, stats.suppressed), (4, 1, 1));
    assert_eq!(stats.closed_trades, 3);
}

#[test]
fn test_entry_vote_against_open_side_reverses() {
    let mut config = config();
    config.signals.vd_divergence.exit = false;
    let mut engine = engine(config);
    let t = warm_up(&mut engine, 10, 0);

    close_bar(&mut engine, long_bar(t));
    assert_eq!(engine.state(), PositionState::Long(1));
    let long_id = engine.broker().open_positions()[0].id;

    let d = decision(close_bar(&mut engine, short_bar(t + Duration::minutes(1))));
    assert_eq!(
        d,
        Decision::Reverse {
            from: Side::Long,
            to: Side::Short
        }
    );
    assert_eq!(engine.state(), PositionState::Short(1));
    let open = engine.broker().open_positions();
    assert_eq!(open.len(), 1);
    assert_ne!(open[0].id, long_id);
    assert_eq!(engine.broker().trades().len(), 1);
    assert_eq!(engine.stops().len(), 1);
    assert!(engine.stops().record(long_id).is_none());
    assert_eq!(engine.broker().working_orders().len(), 2);
}

#[test]
fn test_contradicting_entry_votes_do_nothing() {
    let mut config = config();
    config.signals.rvol = CalculatorSettings {
        entry: true,
        exit: false,
        threshold: 0.1,
        lookback: 20,
    };
    let mut engine = engine(config);
    let t = warm_up(&mut engine, 10, 0);

    // Closed down on buying (long divergence) on a volume collapse (short RVOL)
    let bar = Bar::new(t, 4500.25, 4500.75, 4499.5, 4500.0, 200).with_delta(140, 60);
    let d = decision(close_bar(&mut engine, bar));
    assert_eq!(d, Decision::Hold);
    let snapshot = engine.signals().cached().unwrap();
    assert!(snapshot.contradiction);
    assert!(!snapshot.entry_long && !snapshot.entry_short);
    assert_eq!(engine.state(), PositionState::Flat);
    assert!(engine.broker().open_positions().is_empty());
}

#[test]
fn test_duplicate_bar_ignored() {
    let mut engine = engine(config());
    let t = warm_up(&mut engine, 10, 0);
    assert!(matches!(close_bar(&mut engine, long_bar(t)), BarOutcome::Decided { .. }));
    assert_eq!(close_bar(&mut engine, long_bar(t)), BarOutcome::Ignored);
    assert_eq!(engine.state(), PositionState::Long(1));
}

#[test]
fn test_registered_stop_and_target() {
    let mut engine = engine(config());
    let t = warm_up(&mut engine, 10, 0);
    close_bar(&mut engine, long_bar(t));

    let position = engine.broker().open_positions()[0].clone();
    let record = engine.stops().record(position.id).unwrap();
    let ticks = (record.entry_price - record.current_stop) / 0.25;
    assert!(record.current_stop < position.open_price);
    assert!((4.0..=80.0).contains(&ticks));
    let target = record.take_profit.unwrap();
    assert!(target > position.open_price);
}

#[test]
fn test_tick_closes_at_market_without_protective_stop() {
    let config = config();
    let broker =
        SimulatedBroker::new(&config.instrument.symbol, 50_000.0, config.instrument.point_value).without(OrderType::Stop);
    let mut engine = engine_with(config, broker);
    let t = warm_up(&mut engine, 10, 0);
    close_bar(&mut engine, long_bar(t));
    assert_eq!(engine.state(), PositionState::Long(1));
    // Only the take-profit could be placed
    assert_eq!(engine.broker().working_orders().len(), 1);

    let tick = Tick::trade(t + Duration::seconds(20), 4490.0);
    let outcome = match apply_event(&mut engine, &MarketEvent::Tick(tick)) {
        EventOutcome::Tick(outcome) => outcome,
        EventOutcome::Bar(_) => unreachable!(),
    };
    assert_eq!(outcome.stops_hit, 1);
    assert_eq!(outcome.market_closes, 1);
    assert_eq!(engine.state(), PositionState::Flat);
    assert!(engine.broker().working_orders().is_empty());
}

#[test]
fn test_ticks_never_enter() {
    let mut engine = engine(config());
    let t = warm_up(&mut engine, 10, 0);
    for i in 0..10 {
        let tick = Tick::trade(t + Duration::seconds(i * 5), 4500.0 - i as f64);
        apply_event(&mut engine, &MarketEvent::Tick(tick));
    }
    assert_eq!(engine.state(), PositionState::Flat);
    assert!(engine.broker().trades().is_empty());
}

#[test]
fn test_daily_loss_halts_entries() {
    let mut config = config();
    config.risk.max_daily_loss = 100.0;
    let mut engine = engine(config);
    let mut t = warm_up(&mut engine, 10, 0);
    close_bar(&mut engine, long_bar(t));

    // Protective stop fills well below entry: -$500
    apply_event(&mut engine, &MarketEvent::Tick(Tick::trade(t + Duration::seconds(30), 4490.0)));
    assert_eq!(engine.state(), PositionState::Flat);
    assert!(engine.risk().is_halted());

    t += Duration::minutes(1);
    let outcome = close_bar(&mut engine, long_bar(t));
    assert_eq!(
        outcome,
        BarOutcome::Decided {
            decision: Decision::Suppressed {
                side: Side::Long,
                reason: SuppressReason::EntriesBlocked
            },
            halted: true,
            transport_failures: 0,
        }
    );
    assert_eq!(engine.state(), PositionState::Flat);
}

#[test]
fn test_period_exit_flattens() {
    let mut engine = engine(config());
    let t = warm_up(&mut engine, 15, 40);
    close_bar(&mut engine, long_bar(t));
    assert_eq!(engine.state(), PositionState::Long(1));

    let outcome = close_bar(&mut engine, neutral(et(16, 1)));
    assert_eq!(outcome, BarOutcome::Flattened { closed: 1 });
    assert_eq!(engine.state(), PositionState::Flat);
    assert!(engine.time_filter_status().starts_with("OUT"));
}

#[test]
fn test_tick_past_period_end_flattens_once() {
    let mut engine = engine(config());
    let t = warm_up(&mut engine, 15, 40);
    close_bar(&mut engine, long_bar(t));
    assert_eq!(engine.state(), PositionState::Long(1));

    let tick = Tick::trade(et(16, 0) + Duration::seconds(30), 4500.0);
    let outcome = match apply_event(&mut engine, &MarketEvent::Tick(tick)) {
        EventOutcome::Tick(outcome) => outcome,
        EventOutcome::Bar(_) => unreachable!(),
    };
    assert_eq!(outcome.flattened, 1);
    assert_eq!(engine.state(), PositionState::Flat);
    // The tick does not move the filter out of the period
    assert_eq!(engine.time_filter().current_period(), Some(0));

    let outcome = close_bar(&mut engine, neutral(et(16, 1)));
    assert!(matches!(outcome, BarOutcome::Decided { .. }));
    assert!(engine.time_filter_status().starts_with("OUT"));
}

#[test]
fn test_no_entries_near_period_end() {
    let mut engine = engine(config());
    let t = warm_up(&mut engine, 15, 50);
    assert_eq!(t, et(15, 55));
    let d = decision(close_bar(&mut engine, long_bar(t)));
    assert_eq!(
        d,
        Decision::Suppressed {
            side: Side::Long,
            reason: SuppressReason::EntriesBlocked
        }
    );
}

#[test]
fn test_transport_failure_is_retried_next_bar() {
    let mut engine = engine(config());
    let mut t = warm_up(&mut engine, 10, 0);

    engine.broker_mut().fail_next(1);
    let outcome = close_bar(&mut engine, long_bar(t));
    assert!(matches!(outcome, BarOutcome::Decided { transport_failures: 1, .. }));
    assert_eq!(engine.state(), PositionState::Flat);

    t += Duration::minutes(1);
    let d = decision(close_bar(&mut engine, long_bar(t)));
    assert_eq!(d, Decision::Enter { side: Side::Long, stack: 1 });
    assert_eq!(engine.state(), PositionState::Long(1));
}

#[test]
fn test_shutdown_closes_everything() {
    let mut engine = engine(config());
    let mut t = warm_up(&mut engine, 10, 0);
    for _ in 0..2 {
        close_bar(&mut engine, long_bar(t));
        t += Duration::minutes(1);
    }

    let report = engine.shutdown();
    assert_eq!(report.positions_closed, 2);
    assert_eq!(report.orders_cancelled, 4);
    assert!(engine.broker().open_positions().is_empty());
    assert!(engine.broker().working_orders().is_empty());
    assert_eq!(close_bar(&mut engine, long_bar(t)), BarOutcome::Disabled);
}

#[test]
fn test_invalid_config_never_trades() {
    let mut config = config();
    for period in config.time_filter.periods.iter_mut() {
        period.enabled = false;
    }
    let mut engine = engine(config);
    assert!(!engine.is_enabled());
    assert_eq!(close_bar(&mut engine, long_bar(et(10, 0))), BarOutcome::Disabled);
}

#[test]
fn test_seeded_slippage_is_reproducible() {
    let run = || {
        let mut config = config();
        config.positions.slippage_multiplier = 0.5;
        let mut engine = engine(config);
        let mut t = warm_up(&mut engine, 10, 0);
        for _ in 0..3 {
            close_bar(&mut engine, long_bar(t));
            t += Duration::minutes(1);
        }
        engine
            .broker()
            .open_positions()
            .iter()
            .map(|p| p.open_price)
            .collect::<Vec<_>>()
    };
    let first = run();
    assert_eq!(first.len(), 3);
    // Buys never fill below the signal price
    assert!(first.iter().all(|p| *p >= 4500.0));
    assert_eq!(first, run());
}
