//! Position state machine, stacking and reversal
//!
//! The broker's open-position list is the only source of truth. The
//! controller keeps a cached `PositionState` that is recomputed from that list
//! on every notification and never adjusted by hand.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PositionConfig;
use crate::error::TransportError;
use crate::execution::{Order, OrderSide};
use crate::ports::{BrokerPosition, OrderAck, OrderTransport};
use crate::trading_core::signals::SignalSnapshot;
use crate::types::{round_to_tick, Side};

/// Derived position state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PositionState {
    #[default]
    Flat,
    Long(u32),
    Short(u32),
}

impl PositionState {
    /// Count open units per side. A book holding both sides is reported by
    /// its oldest position's side.
    pub fn from_positions(positions: &[BrokerPosition]) -> Self {
        let longs = positions.iter().filter(|p| p.side == Side::Long).count() as u32;
        let shorts = positions.len() as u32 - longs;
        if longs > 0 && shorts > 0 {
            warn!("POSITION: book holds {} long and {} short positions", longs, shorts);
        }
        match positions.iter().min_by_key(|p| p.opened_at).map(|p| p.side) {
            None => Self::Flat,
            Some(Side::Long) => Self::Long(longs),
            Some(Side::Short) => Self::Short(shorts),
        }
    }

    pub fn side(&self) -> Option<Side> {
        match self {
            Self::Flat => None,
            Self::Long(_) => Some(Side::Long),
            Self::Short(_) => Some(Side::Short),
        }
    }

    pub fn count(&self) -> u32 {
        match self {
            Self::Flat => 0,
            Self::Long(n) | Self::Short(n) => *n,
        }
    }

    pub fn is_flat(&self) -> bool {
        matches!(self, Self::Flat)
    }
}

impl std::fmt::Display for PositionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Flat => write!(f, "FLAT"),
            Self::Long(n) => write!(f, "LONG x{}", n),
            Self::Short(n) => write!(f, "SHORT x{}", n),
        }
    }
}

/// The four cached vote outcomes a decision is made from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Votes {
    pub entry_long: bool,
    pub entry_short: bool,
    /// Close longs
    pub exit_long: bool,
    /// Close shorts
    pub exit_short: bool,
}

impl From<&SignalSnapshot> for Votes {
    fn from(s: &SignalSnapshot) -> Self {
        Self {
            entry_long: s.entry_long,
            entry_short: s.entry_short,
            exit_long: s.exit_long,
            exit_short: s.exit_short,
        }
    }
}

impl Votes {
    fn entry(&self, side: Side) -> bool {
        match side {
            Side::Long => self.entry_long,
            Side::Short => self.entry_short,
        }
    }

    fn exit(&self, side: Side) -> bool {
        match side {
            Side::Long => self.exit_long,
            Side::Short => self.exit_short,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuppressReason {
    MaxStack,
    EntriesBlocked,
    SizeLimit,
}

/// What to do on this bar close
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Hold,
    /// Close every position on `side`
    Exit { side: Side },
    /// Close every `from` position then open one `to`
    Reverse { from: Side, to: Side },
    /// Open one unit; `stack` is the resulting count
    Enter { side: Side, stack: u32 },
    Suppressed { side: Side, reason: SuppressReason },
}

/// Random unfavorable fill adjustment sized off ATR
pub struct SlippageModel {
    multiplier: f64,
    jitter: f64,
    tick_size: f64,
    rng: StdRng,
}

impl SlippageModel {
    pub fn new(config: &PositionConfig, tick_size: f64) -> Self {
        let rng = match config.slippage_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(config, tick_size, rng)
    }

    pub fn with_rng(config: &PositionConfig, tick_size: f64, rng: StdRng) -> Self {
        Self {
            multiplier: config.slippage_multiplier,
            jitter: config.slippage_jitter.abs(),
            tick_size,
            rng,
        }
    }

    /// ATR x multiplier x (1 +/- jitter), rounded to the tick. Zero without ATR.
    pub fn draw(&mut self, atr: Option<f64>) -> f64 {
        let Some(atr) = atr else {
            return 0.0;
        };
        let base = atr * self.multiplier;
        if base <= 0.0 {
            return 0.0;
        }
        let factor = if self.jitter > 0.0 {
            1.0 + self.rng.gen_range(-self.jitter..=self.jitter)
        } else {
            1.0
        };
        round_to_tick(base * factor, self.tick_size).max(0.0)
    }

    /// Worsen `price` for an order on `side`: buys pay more, sells receive less
    pub fn apply(&mut self, side: OrderSide, price: f64, atr: Option<f64>) -> f64 {
        price + side.sign() * self.draw(atr)
    }
}

/// Outcome of carrying out a decision
#[derive(Debug, Default)]
pub struct Execution {
    pub closed: Vec<Uuid>,
    pub opened: Option<OrderAck>,
    pub failures: Vec<TransportError>,
}

impl Execution {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct PositionController {
    config: PositionConfig,
    symbol: String,
    contracts: u32,
    slippage: SlippageModel,
    state: PositionState,
    /// Positions with a close in flight
    closing: HashSet<Uuid>,
}

impl PositionController {
    pub fn new(config: PositionConfig, symbol: &str, contracts: u32, tick_size: f64) -> Self {
        let slippage = SlippageModel::new(&config, tick_size);
        Self::with_slippage(config, symbol, contracts, slippage)
    }

    pub fn with_slippage(config: PositionConfig, symbol: &str, contracts: u32, slippage: SlippageModel) -> Self {
        Self {
            config,
            symbol: symbol.to_string(),
            contracts: contracts.max(1),
            slippage,
            state: PositionState::Flat,
            closing: HashSet::new(),
        }
    }

    /// Recompute state from the broker's list
    pub fn sync(&mut self, positions: &[BrokerPosition]) -> PositionState {
        self.closing.retain(|id| positions.iter().any(|p| p.id == *id));
        let state = PositionState::from_positions(positions);
        if state != self.state {
            debug!("POSITION: {} -> {}", self.state, state);
        }
        self.state = state;
        state
    }

    pub fn state(&self) -> PositionState {
        self.state
    }

    pub fn contracts(&self) -> u32 {
        self.contracts
    }

    pub fn max_stack(&self) -> u32 {
        self.config.max_stack
    }

    pub fn is_closing(&self, position_id: Uuid) -> bool {
        self.closing.contains(&position_id)
    }

    /// Exit, then reversal, then entry/stack
    pub fn decide(&self, votes: Votes, entries_allowed: bool) -> Decision {
        let state = self.state;

        if let Some(side) = state.side() {
            if votes.exit(side) {
                return Decision::Exit { side };
            }
            let opposite = side.opposite();
            if votes.entry(opposite) {
                if !self.config.allow_reversal {
                    debug!("POSITION: {} signal ignored while {}, reversal disabled", opposite, state);
                    return Decision::Hold;
                }
                if !entries_allowed {
                    return Decision::Suppressed {
                        side: opposite,
                        reason: SuppressReason::EntriesBlocked,
                    };
                }
                return Decision::Reverse { from: side, to: opposite };
            }
        }

        for side in [Side::Long, Side::Short] {
            if !votes.entry(side) {
                continue;
            }
            let current = match state.side() {
                None => 0,
                Some(s) if s == side => state.count(),
                Some(_) => continue,
            };
            if !entries_allowed {
                return Decision::Suppressed {
                    side,
                    reason: SuppressReason::EntriesBlocked,
                };
            }
            if current >= self.config.max_stack {
                return Decision::Suppressed {
                    side,
                    reason: SuppressReason::MaxStack,
                };
            }
            return Decision::Enter { side, stack: current + 1 };
        }

        Decision::Hold
    }

    /// Close every open position on `side` at market
    pub fn close_side<T: OrderTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        positions: &[BrokerPosition],
        side: Side,
        price: f64,
        atr: Option<f64>,
        reason: &str,
    ) -> Execution {
        let mut execution = Execution::default();
        for position in positions.iter().filter(|p| p.side == side) {
            if let Err(e) = self.close_one(transport, position, price, atr, reason) {
                execution.failures.push(e);
            } else {
                execution.closed.push(position.id);
            }
        }
        execution
    }

    /// Close one position at market unless a close is already in flight
    pub fn close_one<T: OrderTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        position: &BrokerPosition,
        price: f64,
        atr: Option<f64>,
        reason: &str,
    ) -> Result<(), TransportError> {
        if !self.closing.insert(position.id) {
            return Ok(());
        }
        let fill = self.slippage.apply(OrderSide::to_close(position.side), price, atr);
        match transport.close_position(position.id, fill) {
            Ok(_) => {
                info!(
                    "EXIT: {} x{} @ {:.2} (entry {:.2}) {}",
                    position.side, position.quantity, fill, position.open_price, reason
                );
                Ok(())
            }
            Err(e) => {
                // Back into the active set so the next cycle retries
                self.closing.remove(&position.id);
                warn!("EXIT: close {} failed: {}", position.id, e);
                Err(e)
            }
        }
    }

    /// Open one unit on `side` at market
    pub fn open<T: OrderTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        side: Side,
        price: f64,
        atr: Option<f64>,
    ) -> Result<OrderAck, TransportError> {
        let order_side = OrderSide::to_open(side);
        let fill = self.slippage.apply(order_side, price, atr);
        let order = Order::market(&self.symbol, order_side, self.contracts, fill);
        let ack = transport.submit(&order).inspect_err(|e| {
            warn!("ENTRY: {} order failed: {}", side, e);
        })?;
        info!(
            "ENTRY: {} x{} @ {:.2} (signal {:.2}, stack {} -> {})",
            side,
            self.contracts,
            ack.fill_price.unwrap_or(fill),
            price,
            self.state.count(),
            self.state.count() + 1
        );
        Ok(ack)
    }

    /// Carry out `decision` against the current book
    pub fn execute<T: OrderTransport + ?Sized>(
        &mut self,
        decision: Decision,
        transport: &mut T,
        positions: &[BrokerPosition],
        price: f64,
        atr: Option<f64>,
    ) -> Execution {
        match decision {
            Decision::Hold => Execution::default(),
            Decision::Suppressed { side, reason } => {
                info!("SUPPRESSED: {} entry ({:?}) while {}", side, reason, self.state);
                Execution::default()
            }
            Decision::Exit { side } => self.close_side(transport, positions, side, price, atr, "exit signal"),
            Decision::Reverse { from, to } => {
                info!("REVERSAL: {} -> {} @ {:.2}", from, to, price);
                let mut execution = self.close_side(transport, positions, from, price, atr, "reversal");
                if execution.is_clean() {
                    match self.open(transport, to, price, atr) {
                        Ok(ack) => execution.opened = Some(ack),
                        Err(e) => execution.failures.push(e),
                    }
                } else {
                    warn!("REVERSAL: {} side not fully closed, skipping {} entry", from, to);
                }
                execution
            }
            Decision::Enter { side, .. } => {
                let mut execution = Execution::default();
                match self.open(transport, side, price, atr) {
                    Ok(ack) => execution.opened = Some(ack),
                    Err(e) => execution.failures.push(e),
                }
                execution
            }
        }
    }
}
