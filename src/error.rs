//! Error types for the decision engine

use thiserror::Error;
use uuid::Uuid;

use crate::execution::OrderType;

/// Order transport failures. Never fatal: the engine logs them and retries on a later cycle.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("order type {0:?} not supported by transport")]
    Unsupported(OrderType),

    #[error("unknown order {0}")]
    UnknownOrder(Uuid),

    #[error("unknown position {0}")]
    UnknownPosition(Uuid),
}

/// Startup configuration problems. Detected once; the engine refuses to trade but keeps running.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("no trading period is enabled")]
    NoEnabledPeriods,

    #[error("trading period {index} has invalid HHMM bounds {start}-{end}")]
    InvalidPeriod { index: usize, start: u16, end: u16 },

    #[error("tick size must be positive (got {0})")]
    InvalidTickSize(f64),

    #[error("stop distance bounds inverted: min {min} > max {max} ticks")]
    StopDistanceInverted { min: u32, max: u32 },

    #[error("{kind} requires {required} votes but only {enabled} calculators are enabled")]
    UnreachableVote {
        kind: &'static str,
        required: usize,
        enabled: usize,
    },

    #[error("max stack must be at least 1")]
    ZeroMaxStack,

    #[error("unknown timezone '{0}'")]
    UnknownTimezone(String),

    #[error("transport cannot place market orders")]
    NoMarketOrders,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("data unavailable: {0}")]
    DataUnavailable(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no stop record for position {0}")]
    UnknownPosition(Uuid),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
