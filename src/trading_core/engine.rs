//! Strategy orchestrator
//!
//! Composes the signal, session, stop, position, risk and time components
//! behind two entry points: `process_bar_close` (the only place decisions are
//! made) and `process_tick` (stop/target monitoring and forced flattening,
//! never entries). Neither returns an error; failures are logged and reported
//! through the outcome types.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::StrategyConfig;
use crate::error::ConfigError;
use crate::execution::{Order, OrderSide, OrderType};
use crate::ports::{Broker, BrokerPosition, ClosedPosition, IndicatorProvider, OrderTransport, PositionBook, PositionEvent};
use crate::trading_core::positions::{Decision, PositionController, PositionState, SuppressReason, Votes};
use crate::trading_core::risk::{DailyRiskTracker, RiskGate};
use crate::trading_core::sessions::SessionTracker;
use crate::trading_core::signals::{BarContext, SignalAggregator, SignalSnapshot};
use crate::trading_core::stops::{StopEngine, StopUpdate};
use crate::trading_core::time_filter::TimeFilter;
use crate::trading_core::warmup::WarmupGate;
use crate::types::{Bar, Tick};

/// Result of one bar close
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BarOutcome {
    /// Not later than the last processed bar
    Ignored,
    /// Configuration invalid or engine shut down
    Disabled,
    WarmingUp,
    /// Left a trading window; everything was closed
    Flattened { closed: usize },
    Decided {
        decision: Decision,
        halted: bool,
        transport_failures: usize,
    },
}

/// Result of one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub stops_hit: usize,
    pub targets_hit: usize,
    /// Closes sent because no protective order was working
    pub market_closes: usize,
    pub flattened: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub positions_closed: usize,
    pub orders_cancelled: usize,
    pub failures: usize,
}

/// Running counters for the summary
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStats {
    pub bars_processed: u64,
    pub ticks_processed: u64,
    pub entries: u32,
    pub exits: u32,
    pub reversals: u32,
    pub suppressed: u32,
    pub stop_updates: u32,
    pub transport_failures: u32,
    pub closed_trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub realized_pnl: f64,
}

/// End-of-run report
#[derive(Debug, Clone, Serialize)]
pub struct EngineSummary {
    pub symbol: String,
    pub stats: EngineStats,
    pub win_rate: f64,
    pub risk_days: Vec<DailyRiskTracker>,
    pub last_signal: Option<SignalSnapshot>,
}

/// Working protective orders for one position
#[derive(Debug, Clone, Copy, Default)]
struct ProtectiveOrders {
    stop: Option<Uuid>,
    take_profit: Option<Uuid>,
}

pub struct StrategyEngine<B: Broker, I: IndicatorProvider> {
    config: StrategyConfig,
    broker: B,
    indicators: I,
    signals: SignalAggregator,
    sessions: SessionTracker,
    stops: StopEngine,
    positions: PositionController,
    risk: RiskGate,
    time_filter: TimeFilter,
    warmup: WarmupGate,
    history: VecDeque<Bar>,
    protective: HashMap<Uuid, ProtectiveOrders>,
    config_errors: Vec<ConfigError>,
    last_bar_time: Option<DateTime<Utc>>,
    last_price: Option<f64>,
    stats: EngineStats,
    shut_down: bool,
}

impl<B: Broker, I: IndicatorProvider> StrategyEngine<B, I> {
    /// Build every component from `config`.
    ///
    /// Configuration problems are logged and leave the engine disabled; it
    /// keeps accepting events but never trades.
    pub fn new(config: StrategyConfig, broker: B, indicators: I) -> Self {
        let mut config_errors = config.validate();
        if !broker.supports(OrderType::Market) {
            config_errors.push(ConfigError::NoMarketOrders);
        }
        for e in &config_errors {
            error!("CONFIG: {}", e);
        }
        if !config_errors.is_empty() {
            error!("CONFIG: {} problem(s), strategy will not trade", config_errors.len());
        }

        let tz = config.instrument.tz().unwrap_or(chrono_tz::Tz::UTC);
        let tick_size = config.instrument.tick_size;

        Self {
            signals: SignalAggregator::new(config.signals.clone()),
            sessions: SessionTracker::new(config.sessions.clone(), tz, tick_size),
            stops: StopEngine::new(config.stops.clone(), tick_size),
            positions: PositionController::new(
                config.positions.clone(),
                &config.instrument.symbol,
                config.instrument.contracts,
                tick_size,
            ),
            risk: RiskGate::new(config.risk.clone(), tz),
            time_filter: TimeFilter::new(config.time_filter.clone(), tz),
            warmup: WarmupGate::new(config.warmup.clone()),
            history: VecDeque::with_capacity(config.history_capacity()),
            protective: HashMap::new(),
            config_errors,
            last_bar_time: None,
            last_price: None,
            stats: EngineStats::default(),
            shut_down: false,
            config,
            broker,
            indicators,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config_errors.is_empty() && !self.shut_down
    }

    /// Evaluate one closed bar
    pub fn process_bar_close(&mut self, bar: &Bar) -> BarOutcome {
        if !self.is_enabled() {
            return BarOutcome::Disabled;
        }
        if self.last_bar_time.is_some_and(|t| bar.timestamp <= t) {
            debug!("BAR: {} not after last processed bar, ignored", bar.timestamp);
            return BarOutcome::Ignored;
        }
        self.last_bar_time = Some(bar.timestamp);
        self.last_price = Some(bar.close);
        self.stats.bars_processed += 1;

        self.indicators.update(bar);
        let atr = self.indicators.atr();
        self.sessions.process_bar(bar);

        let ctx = BarContext {
            bar,
            history: self.history.make_contiguous(),
            atr,
            smoothed_volume: self.indicators.smoothed_volume(),
        };
        self.signals.update(&ctx);
        self.history.push_back(bar.clone());
        while self.history.len() > self.config.history_capacity() {
            self.history.pop_front();
        }

        self.stops.refresh(atr, bar);
        self.pump_events();

        if !self.warmup.observe(bar.timestamp, self.indicators.is_ready()) {
            return BarOutcome::WarmingUp;
        }

        self.signals.cache_at_close(bar.timestamp);
        self.trail_stops(bar.close);

        let in_window = self.time_filter.is_trading_allowed(bar.timestamp);
        if self.time_filter.take_should_close() {
            let closed = self.flatten(bar.close, "period end");
            return BarOutcome::Flattened { closed };
        }
        let mut entries_allowed = in_window && self.time_filter.entries_allowed(bar.timestamp);

        let open = self.broker.open_positions();
        self.risk.update_unrealized(open.iter().map(|p| p.unrealized_pnl).sum());
        let halted = self.risk.should_halt(bar.timestamp, self.time_filter.current_period());
        entries_allowed &= !halted;

        let votes = self.signals.cached().map(Votes::from).unwrap_or_default();
        let mut decision = self.positions.decide(votes, entries_allowed);
        decision = self.check_size(decision, &open);

        match decision {
            Decision::Enter { .. } => self.stats.entries += 1,
            Decision::Exit { .. } => self.stats.exits += 1,
            Decision::Reverse { .. } => self.stats.reversals += 1,
            Decision::Suppressed { .. } => self.stats.suppressed += 1,
            Decision::Hold => {}
        }

        let execution = self.positions.execute(decision, &mut self.broker, &open, bar.close, atr);
        self.stats.transport_failures += execution.failures.len() as u32;
        self.pump_events();

        debug!(
            "BAR: {} close {:.2} | {} | {:?} | {}",
            bar.timestamp.format("%m-%d %H:%M"),
            bar.close,
            self.signals.status(),
            decision,
            self.positions.state()
        );

        BarOutcome::Decided {
            decision,
            halted,
            transport_failures: execution.failures.len(),
        }
    }

    /// Monitor stops and targets and honor a pending period-exit close.
    /// Never opens positions.
    pub fn process_tick(&mut self, tick: &Tick) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        if !self.is_enabled() {
            return outcome;
        }
        self.stats.ticks_processed += 1;
        self.last_price = Some(tick.price);
        self.pump_events();

        self.time_filter.check_period_exit(tick.timestamp);
        if self.time_filter.take_should_close() {
            outcome.flattened = self.flatten(tick.price, "period end");
            return outcome;
        }

        let atr = self.indicators.atr();
        for position in self.broker.open_positions() {
            if !tick.applies_to(position.side) || self.positions.is_closing(position.id) {
                continue;
            }
            let orders = self.protective.get(&position.id).copied().unwrap_or_default();

            let reason = if self.stops.is_hit(position.id, tick.price) {
                outcome.stops_hit += 1;
                orders.stop.is_none().then_some("stop hit")
            } else if self.stops.is_take_profit_hit(position.id, tick.price) {
                outcome.targets_hit += 1;
                orders.take_profit.is_none().then_some("target hit")
            } else {
                None
            };

            if let Some(reason) = reason {
                warn!("STOP: {} {} with no working order, closing at market", position.id, reason);
                match self.positions.close_one(&mut self.broker, &position, tick.price, atr, reason) {
                    Ok(()) => outcome.market_closes += 1,
                    Err(_) => self.stats.transport_failures += 1,
                }
            }
        }

        if outcome.market_closes > 0 {
            self.pump_events();
        }
        outcome
    }

    /// Cancel every protective order and close every position
    pub fn shutdown(&mut self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        if self.shut_down {
            return report;
        }
        info!("SHUTDOWN: closing {} position(s)", self.broker.open_positions().len());

        for (position_id, orders) in std::mem::take(&mut self.protective) {
            for order_id in [orders.stop, orders.take_profit].into_iter().flatten() {
                match self.broker.cancel(order_id) {
                    Ok(()) => report.orders_cancelled += 1,
                    Err(e) => {
                        debug!("SHUTDOWN: cancel {} for {} failed: {}", order_id, position_id, e);
                    }
                }
            }
        }

        let atr = self.indicators.atr();
        for position in self.broker.open_positions() {
            let price = self.last_price.unwrap_or(position.current_price);
            match self.positions.close_one(&mut self.broker, &position, price, atr, "shutdown") {
                Ok(()) => report.positions_closed += 1,
                Err(_) => report.failures += 1,
            }
        }
        self.pump_events();
        self.shut_down = true;

        info!(
            "SHUTDOWN: {} closed, {} orders cancelled, {} failures | {}",
            report.positions_closed,
            report.orders_cancelled,
            report.failures,
            self.risk.summary()
        );
        report
    }

    /// Apply broker notifications, then resync the position cache
    fn pump_events(&mut self) {
        for event in self.broker.drain_events() {
            match event {
                PositionEvent::Opened(position) => self.on_position_opened(&position),
                PositionEvent::Closed(closed) => self.on_position_closed(&closed),
            }
        }

        let open = self.broker.open_positions();
        for position in &open {
            if self.stops.record(position.id).is_none() {
                debug!("POSITION: {} had no stop record, registering", position.id);
                self.on_position_opened(position);
            }
        }
        self.positions.sync(&open);
    }

    fn on_position_opened(&mut self, position: &BrokerPosition) {
        if self.stops.record(position.id).is_some() {
            return;
        }
        let target = self.sessions.select_take_profit(position.open_price, position.side);
        let stop = self
            .stops
            .register(position.id, position.side, position.open_price, Some(target.price))
            .current_stop;
        info!(
            "OPENED: {} x{} @ {:.2} | stop {:.2} | target {:.2} ({:?})",
            position.side, position.quantity, position.open_price, stop, target.price, target.source
        );

        let mut orders = ProtectiveOrders::default();
        let close_side = OrderSide::to_close(position.side);
        let symbol = self.config.instrument.symbol.clone();

        if self.broker.supports(OrderType::Stop) {
            let order = Order::stop(&symbol, close_side, position.quantity, stop).for_position(position.id);
            match self.broker.submit(&order) {
                Ok(ack) => orders.stop = Some(ack.order_id),
                Err(e) => {
                    self.stats.transport_failures += 1;
                    warn!("STOP: protective stop for {} failed: {}", position.id, e);
                }
            }
        }
        if self.broker.supports(OrderType::Limit) {
            let order = Order::limit(&symbol, close_side, position.quantity, target.price).for_position(position.id);
            match self.broker.submit(&order) {
                Ok(ack) => orders.take_profit = Some(ack.order_id),
                Err(e) => {
                    self.stats.transport_failures += 1;
                    warn!("STOP: take-profit for {} failed: {}", position.id, e);
                }
            }
        }
        self.protective.insert(position.id, orders);
    }

    fn on_position_closed(&mut self, closed: &ClosedPosition) {
        self.stops.remove(closed.id);
        if let Some(orders) = self.protective.remove(&closed.id) {
            for order_id in [orders.stop, orders.take_profit].into_iter().flatten() {
                if let Err(e) = self.broker.cancel(order_id) {
                    debug!("CLOSED: cancel {} skipped: {}", order_id, e);
                }
            }
        }

        self.risk.record_close(closed.realized_pnl, closed.closed_at);
        self.stats.closed_trades += 1;
        self.stats.realized_pnl += closed.realized_pnl;
        if closed.realized_pnl > 0.0 {
            self.stats.wins += 1;
        } else {
            self.stats.losses += 1;
        }
        info!(
            "CLOSED: {} x{} {:.2} -> {:.2} | P&L ${:.2} | {}",
            closed.side, closed.quantity, closed.open_price, closed.exit_price, closed.realized_pnl, closed.reason
        );
    }

    /// Trail every registered stop against `price` and move working stop orders
    fn trail_stops(&mut self, price: f64) {
        for position in self.broker.open_positions() {
            let update = match self.stops.update(position.id, price, position.side, position.open_price) {
                Ok(Some(update)) => update,
                Ok(None) => continue,
                Err(e) => {
                    debug!("STOP: {} not trailed: {}", position.id, e);
                    continue;
                }
            };
            self.stats.stop_updates += 1;
            self.move_stop_order(&position, update);
        }
    }

    fn move_stop_order(&mut self, position: &BrokerPosition, update: StopUpdate) {
        let orders = self.protective.entry(position.id).or_default();
        match orders.stop {
            Some(order_id) => match self.broker.modify_stop(order_id, update.new_stop) {
                Ok(_) => info!("STOP: {} {:.2} -> {:.2}", position.id, update.old_stop, update.new_stop),
                Err(e) => {
                    self.stats.transport_failures += 1;
                    warn!("STOP: modify {} failed: {}", order_id, e);
                }
            },
            None if self.broker.supports(OrderType::Stop) => {
                // Placement failed earlier; try again at the new level
                let order = Order::stop(
                    &self.config.instrument.symbol,
                    OrderSide::to_close(position.side),
                    position.quantity,
                    update.new_stop,
                )
                .for_position(position.id);
                match self.broker.submit(&order) {
                    Ok(ack) => {
                        orders.stop = Some(ack.order_id);
                        info!("STOP: {} placed at {:.2}", position.id, update.new_stop);
                    }
                    Err(e) => {
                        self.stats.transport_failures += 1;
                        warn!("STOP: protective stop for {} failed again: {}", position.id, e);
                    }
                }
            }
            None => {}
        }
    }

    /// Downgrade an entry the size limits reject
    fn check_size(&self, decision: Decision, open: &[BrokerPosition]) -> Decision {
        let (side, open_contracts) = match decision {
            Decision::Enter { side, .. } => (side, open.iter().map(|p| p.quantity).sum::<u32>()),
            // The reversal closes the current side before opening
            Decision::Reverse { to, .. } => (to, 0),
            _ => return decision,
        };
        match self.risk.validate_size(self.positions.contracts(), open_contracts) {
            Ok(()) => decision,
            Err(e) => {
                warn!("RISK: {} entry rejected: {}", side, e);
                if let Decision::Reverse { from, .. } = decision {
                    // Still honor the close half of the reversal
                    return Decision::Exit { side: from };
                }
                Decision::Suppressed {
                    side,
                    reason: SuppressReason::SizeLimit,
                }
            }
        }
    }

    /// Close every open position at market
    fn flatten(&mut self, price: f64, reason: &str) -> usize {
        let open = self.broker.open_positions();
        if open.is_empty() {
            return 0;
        }
        info!("FLATTEN: {} position(s) on {}", open.len(), reason);
        let atr = self.indicators.atr();
        let mut closed = 0;
        for position in &open {
            match self.positions.close_one(&mut self.broker, position, price, atr, reason) {
                Ok(()) => closed += 1,
                Err(_) => self.stats.transport_failures += 1,
            }
        }
        self.pump_events();
        closed
    }

    pub fn position_status(&self) -> String {
        let mut lines = vec![format!(
            "{} (max stack {})",
            self.positions.state(),
            self.positions.max_stack()
        )];
        for position in self.broker.open_positions() {
            let levels = self
                .stops
                .record(position.id)
                .map(|r| {
                    format!(
                        "stop {:.2}{} tp {}",
                        r.current_stop,
                        if r.trailing { "*" } else { "" },
                        r.take_profit.map_or("-".to_string(), |tp| format!("{:.2}", tp))
                    )
                })
                .unwrap_or_else(|| "no stop".to_string());
            lines.push(format!(
                "  {} x{} @ {:.2} | open ${:.2} | {}",
                position.side, position.quantity, position.open_price, position.unrealized_pnl, levels
            ));
        }
        lines.join("\n")
    }

    pub fn daily_risk_summary(&self) -> String {
        self.risk.summary()
    }

    pub fn time_filter_status(&self) -> String {
        self.time_filter.status()
    }

    pub fn signal_status(&self) -> String {
        self.signals.status()
    }

    pub fn summary(&self) -> EngineSummary {
        let mut risk_days: Vec<DailyRiskTracker> = self.risk.history().iter().cloned().collect();
        risk_days.extend(self.risk.tracker().cloned());
        EngineSummary {
            symbol: self.config.instrument.symbol.clone(),
            win_rate: if self.stats.closed_trades > 0 {
                self.stats.wins as f64 / self.stats.closed_trades as f64 * 100.0
            } else {
                0.0
            },
            stats: self.stats.clone(),
            risk_days,
            last_signal: self.signals.cached().cloned(),
        }
    }

    pub fn state(&self) -> PositionState {
        self.positions.state()
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn config_errors(&self) -> &[ConfigError] {
        &self.config_errors
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn signals(&self) -> &SignalAggregator {
        &self.signals
    }

    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    pub fn stops(&self) -> &StopEngine {
        &self.stops
    }

    pub fn risk(&self) -> &RiskGate {
        &self.risk
    }

    pub fn time_filter(&self) -> &TimeFilter {
        &self.time_filter
    }

    pub fn warmup(&self) -> &WarmupGate {
        &self.warmup
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Market-data side of a simulated broker needs ticks too
    pub fn broker_mut(&mut self) -> &mut B {
        &mut self.broker
    }
}
