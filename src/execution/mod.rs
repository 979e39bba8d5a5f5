//! Order model and the simulated broker
//!
//! Live transports implement `ports::OrderTransport` and `ports::PositionBook`
//! outside this crate; `SimulatedBroker` is the in-process implementation used
//! by replay and tests.

mod order;
mod simulated;

pub use order::{Order, OrderSide, OrderState, OrderType};
pub use simulated::{SimulatedBroker, TradeRecord};
