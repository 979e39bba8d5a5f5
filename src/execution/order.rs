//! Order types and state machine for entry, close and protective orders

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::Side;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Side of the order that opens a position
    pub fn to_open(side: Side) -> Self {
        match side {
            Side::Long => Self::Buy,
            Side::Short => Self::Sell,
        }
    }

    /// Side of the order that closes a position
    pub fn to_close(side: Side) -> Self {
        Self::to_open(side).opposite()
    }

    /// +1 for buys, -1 for sells
    pub fn sign(&self) -> f64 {
        match self {
            Self::Buy => 1.0,
            Self::Sell => -1.0,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
}

/// Order state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    /// Order created but not yet submitted
    Pending,
    /// Order resting at the broker
    Working,
    /// Order completely filled
    Filled,
    /// Order cancelled
    Cancelled,
    /// Order rejected by the broker
    Rejected,
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Working => write!(f, "WORKING"),
            Self::Filled => write!(f, "FILLED"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// Individual order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Unique order ID (client-side)
    pub id: Uuid,

    /// Symbol
    pub symbol: String,

    /// Order side
    pub side: OrderSide,

    /// Order type
    pub order_type: OrderType,

    /// Quantity in contracts
    pub quantity: u32,

    /// Limit price (for limit orders)
    pub limit_price: Option<f64>,

    /// Stop price (for stop orders)
    pub stop_price: Option<f64>,

    /// Expected fill for market orders, slippage included
    pub reference_price: Option<f64>,

    /// Position a protective order belongs to
    pub position_id: Option<Uuid>,

    /// Current state
    pub state: OrderState,

    /// Fill price
    pub avg_fill_price: Option<f64>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Order {
    fn new(symbol: &str, side: OrderSide, order_type: OrderType, quantity: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            side,
            order_type,
            quantity,
            limit_price: None,
            stop_price: None,
            reference_price: None,
            position_id: None,
            state: OrderState::Pending,
            avg_fill_price: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a new market order expected to fill near `reference_price`
    pub fn market(symbol: &str, side: OrderSide, quantity: u32, reference_price: f64) -> Self {
        let mut order = Self::new(symbol, side, OrderType::Market, quantity);
        order.reference_price = Some(reference_price);
        order
    }

    /// Create a new stop order
    pub fn stop(symbol: &str, side: OrderSide, quantity: u32, stop_price: f64) -> Self {
        let mut order = Self::new(symbol, side, OrderType::Stop, quantity);
        order.stop_price = Some(stop_price);
        order
    }

    /// Create a new limit order
    pub fn limit(symbol: &str, side: OrderSide, quantity: u32, limit_price: f64) -> Self {
        let mut order = Self::new(symbol, side, OrderType::Limit, quantity);
        order.limit_price = Some(limit_price);
        order
    }

    /// Attach the order to an open position
    pub fn for_position(mut self, position_id: Uuid) -> Self {
        self.position_id = Some(position_id);
        self
    }

    /// Check if order is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, OrderState::Filled | OrderState::Cancelled | OrderState::Rejected)
    }

    /// Update order state
    pub fn update_state(&mut self, state: OrderState) {
        self.state = state;
        self.updated_at = Utc::now();
    }

    /// Record a complete fill
    pub fn record_fill(&mut self, fill_price: f64) {
        self.avg_fill_price = Some(fill_price);
        self.update_state(OrderState::Filled);
    }

    /// Whether a resting stop or limit order trades at `price`
    pub fn is_triggered(&self, price: f64) -> bool {
        match (self.order_type, self.side) {
            (OrderType::Stop, OrderSide::Sell) => self.stop_price.is_some_and(|s| price <= s),
            (OrderType::Stop, OrderSide::Buy) => self.stop_price.is_some_and(|s| price >= s),
            (OrderType::Limit, OrderSide::Sell) => self.limit_price.is_some_and(|l| price >= l),
            (OrderType::Limit, OrderSide::Buy) => self.limit_price.is_some_and(|l| price <= l),
            (OrderType::Market, _) => false,
        }
    }

    /// Price the order fills at once triggered
    pub fn trigger_price(&self) -> Option<f64> {
        match self.order_type {
            OrderType::Stop => self.stop_price,
            OrderType::Limit => self.limit_price,
            OrderType::Market => self.reference_price,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_sides_for_position() {
        assert_eq!(OrderSide::to_open(Side::Long), OrderSide::Buy);
        assert_eq!(OrderSide::to_close(Side::Long), OrderSide::Sell);
        assert_eq!(OrderSide::to_close(Side::Short), OrderSide::Buy);
    }

    #[test]
    fn test_sell_stop_triggers_below() {
        let order = Order::stop("ES.c.0", OrderSide::Sell, 1, 4493.0);
        assert!(!order.is_triggered(4493.25));
        assert!(order.is_triggered(4493.0));
        assert!(order.is_triggered(4490.0));
    }

    #[test]
    fn test_limit_triggers() {
        let sell = Order::limit("ES.c.0", OrderSide::Sell, 1, 4510.0);
        assert!(sell.is_triggered(4510.25));
        assert!(!sell.is_triggered(4509.75));

        let buy = Order::limit("ES.c.0", OrderSide::Buy, 1, 4490.0);
        assert!(buy.is_triggered(4489.0));
        assert!(!buy.is_triggered(4491.0));
    }

    #[test]
    fn test_fill_is_terminal() {
        let mut order = Order::market("ES.c.0", OrderSide::Buy, 1, 4500.0);
        assert!(!order.is_terminal());
        order.record_fill(4500.25);
        assert!(order.is_terminal());
        assert_eq!(order.avg_fill_price, Some(4500.25));
    }
}
