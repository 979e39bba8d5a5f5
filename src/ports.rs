//! Collaborator interfaces
//!
//! The engine owns no market connection. Position truth, order transport and
//! indicator values come from implementations of these traits, supplied at
//! construction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TransportError;
use crate::execution::{Order, OrderType};
use crate::types::{Bar, Side};

/// An open position as reported by the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub id: Uuid,
    pub side: Side,
    pub quantity: u32,
    pub open_price: f64,
    pub current_price: f64,
    /// Dollars
    pub unrealized_pnl: f64,
    pub opened_at: DateTime<Utc>,
}

/// A position the broker has closed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub id: Uuid,
    pub side: Side,
    pub quantity: u32,
    pub open_price: f64,
    pub exit_price: f64,
    /// Dollars
    pub realized_pnl: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub reason: String,
}

/// Add/remove notifications from the broker
#[derive(Debug, Clone, PartialEq)]
pub enum PositionEvent {
    Opened(BrokerPosition),
    Closed(ClosedPosition),
}

/// Transport acknowledgement
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub order_id: Uuid,
    pub fill_price: Option<f64>,
    pub message: String,
}

/// Authoritative position and account state
pub trait PositionBook {
    /// Every open position, in open order
    fn open_positions(&self) -> Vec<BrokerPosition>;

    /// Account cash balance in dollars
    fn account_balance(&self) -> f64;

    /// Notifications accumulated since the last call
    fn drain_events(&mut self) -> Vec<PositionEvent>;
}

/// Place, modify and cancel orders
pub trait OrderTransport {
    fn submit(&mut self, order: &Order) -> Result<OrderAck, TransportError>;

    /// Move a working stop order
    fn modify_stop(&mut self, order_id: Uuid, stop_price: f64) -> Result<OrderAck, TransportError>;

    fn cancel(&mut self, order_id: Uuid) -> Result<(), TransportError>;

    /// Close one position at market
    fn close_position(&mut self, position_id: Uuid, reference_price: f64) -> Result<OrderAck, TransportError>;

    fn supports(&self, order_type: OrderType) -> bool {
        let _ = order_type;
        true
    }
}

/// A broker connection is both a position book and an order transport
pub trait Broker: PositionBook + OrderTransport {}

impl<T: PositionBook + OrderTransport> Broker for T {}

/// Indicator values recomputed once per closed bar
pub trait IndicatorProvider {
    fn update(&mut self, bar: &Bar);

    /// Average true range in price units
    fn atr(&self) -> Option<f64>;

    /// Smoothed volume moving average
    fn smoothed_volume(&self) -> Option<f64>;

    fn is_ready(&self) -> bool {
        self.atr().is_some() && self.smoothed_volume().is_some()
    }
}
