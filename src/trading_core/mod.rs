//! Trading Core - the decision engine and its components
//!
//! - Signal calculators and N-of-M voting
//! - Session high/low tracking for take-profit targets
//! - ATR stops with a monotonic trail
//! - Position state machine (stacking, reversal)
//! - Daily risk gate and time-of-day filter
//! - Warmup gate and the orchestrating engine

pub mod engine;
pub mod indicators;
pub mod positions;
pub mod risk;
pub mod sessions;
pub mod signals;
pub mod stops;
pub mod time_filter;
pub mod warmup;

// Re-export commonly used types
pub use engine::{BarOutcome, EngineStats, EngineSummary, ShutdownReport, StrategyEngine, TickOutcome};
pub use indicators::{AverageMode, RollingIndicators};
pub use positions::{Decision, PositionController, PositionState, SlippageModel, SuppressReason, Votes};
pub use risk::{DailyRiskTracker, RiskGate, SizeRejection};
pub use sessions::{SessionKind, SessionTracker, SessionWindow, TakeProfit, TakeProfitSource, TradingSession};
pub use signals::{CalculatorKind, CalculatorReading, SignalAggregator, SignalCalculator, SignalSnapshot};
pub use stops::{StopEngine, StopRecord, StopUpdate};
pub use time_filter::{PeriodTransition, TimeFilter, TradingPeriod};
pub use warmup::WarmupGate;
