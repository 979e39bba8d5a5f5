// Library crate - decision engine for volume-delta futures strategies

pub mod config;
pub mod error;
pub mod execution;
pub mod ports;
pub mod replay;
pub mod trading_core;
pub mod types;

// Re-export commonly used types
pub use config::StrategyConfig;
pub use error::{ConfigError, EngineError, EngineResult, TransportError};
pub use ports::{Broker, BrokerPosition, ClosedPosition, IndicatorProvider, OrderAck, OrderTransport, PositionBook, PositionEvent};
pub use trading_core::{BarOutcome, StrategyEngine, TickOutcome};
pub use types::*;
