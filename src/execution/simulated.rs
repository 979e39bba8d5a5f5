//! Simulated broker for replay and tests
//!
//! Market orders fill immediately at their reference price. Stop and limit
//! orders rest until a tick trades through them. Every market open creates a
//! separate position (no netting) so stacked units close individually, and
//! orders attached to a position are cancelled when that position closes.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::order::{Order, OrderSide, OrderState, OrderType};
use crate::error::TransportError;
use crate::ports::{BrokerPosition, ClosedPosition, OrderAck, OrderTransport, PositionBook, PositionEvent};
use crate::types::{Bar, Side, Tick};

/// Individual trade record for P&L history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub position_id: Uuid,
    pub side: Side,
    pub quantity: u32,
    pub entry_price: f64,
    pub exit_price: f64,
    /// P&L in points per contract
    pub pnl_points: f64,
    /// P&L in dollars for the whole quantity
    pub pnl_dollars: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub reason: String,
}

pub struct SimulatedBroker {
    symbol: String,
    point_value: f64,
    starting_balance: f64,
    balance: f64,
    positions: Vec<BrokerPosition>,
    working: Vec<Order>,
    events: Vec<PositionEvent>,
    trade_history: VecDeque<TradeRecord>,
    max_history: usize,
    clock: Option<DateTime<Utc>>,
    last_price: Option<f64>,
    fail_next: u32,
    unsupported: Vec<OrderType>,
}

impl SimulatedBroker {
    pub fn new(symbol: &str, starting_balance: f64, point_value: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            point_value,
            starting_balance,
            balance: starting_balance,
            positions: Vec::new(),
            working: Vec::new(),
            events: Vec::new(),
            trade_history: VecDeque::new(),
            max_history: 1000,
            clock: None,
            last_price: None,
            fail_next: 0,
            unsupported: Vec::new(),
        }
    }

    /// Reject the next `count` transport calls
    pub fn fail_next(&mut self, count: u32) {
        self.fail_next = count;
    }

    /// Stop accepting an order type
    pub fn without(mut self, order_type: OrderType) -> Self {
        self.unsupported.push(order_type);
        self
    }

    /// Advance the clock and mark positions to a bar's close
    pub fn on_bar(&mut self, bar: &Bar) {
        self.clock = Some(bar.timestamp);
        self.mark(bar.close);
    }

    /// Advance the clock, mark positions and fill any triggered resting orders
    pub fn on_tick(&mut self, tick: &Tick) {
        self.clock = Some(tick.timestamp);
        self.mark(tick.price);

        let triggered: Vec<Order> = self
            .working
            .iter()
            .filter(|o| {
                let exits = match o.side {
                    OrderSide::Sell => Side::Long,
                    OrderSide::Buy => Side::Short,
                };
                tick.applies_to(exits) && o.is_triggered(tick.price)
            })
            .cloned()
            .collect();

        for mut order in triggered {
            // Attached orders may have been cancelled by an earlier fill this tick
            if !self.working.iter().any(|o| o.id == order.id) {
                continue;
            }
            self.working.retain(|o| o.id != order.id);

            let trigger = order.trigger_price().unwrap_or(tick.price);
            let fill = match (order.order_type, order.side) {
                // Stops fill at the worse of trigger and print
                (OrderType::Stop, OrderSide::Sell) => trigger.min(tick.price),
                (OrderType::Stop, OrderSide::Buy) => trigger.max(tick.price),
                _ => trigger,
            };
            order.record_fill(fill);
            debug!("SIM: {:?} {} filled @ {:.2}", order.order_type, order.side, fill);

            let reason = match order.order_type {
                OrderType::Stop => "stop",
                OrderType::Limit => "target",
                OrderType::Market => "market",
            };
            match order.position_id {
                Some(position_id) => {
                    self.close(position_id, fill, reason);
                }
                None => self.open(&order, fill),
            }
        }
    }

    fn mark(&mut self, price: f64) {
        self.last_price = Some(price);
        let point_value = self.point_value;
        for p in self.positions.iter_mut() {
            p.current_price = price;
            p.unrealized_pnl = p.side.pnl_points(p.open_price, price) * p.quantity as f64 * point_value;
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.unwrap_or_else(Utc::now)
    }

    fn check_failure(&mut self) -> Result<(), TransportError> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(TransportError::Rejected("simulated rejection".to_string()));
        }
        Ok(())
    }

    fn open(&mut self, order: &Order, fill: f64) {
        let side = match order.side {
            OrderSide::Buy => Side::Long,
            OrderSide::Sell => Side::Short,
        };
        let position = BrokerPosition {
            id: Uuid::new_v4(),
            side,
            quantity: order.quantity,
            open_price: fill,
            current_price: fill,
            unrealized_pnl: 0.0,
            opened_at: self.now(),
        };
        debug!("SIM: opened {} x{} @ {:.2}", side, order.quantity, fill);
        self.events.push(PositionEvent::Opened(position.clone()));
        self.positions.push(position);
    }

    fn close(&mut self, position_id: Uuid, exit_price: f64, reason: &str) -> Option<ClosedPosition> {
        let index = self.positions.iter().position(|p| p.id == position_id)?;
        let position = self.positions.remove(index);

        let pnl_points = position.side.pnl_points(position.open_price, exit_price);
        let realized_pnl = pnl_points * position.quantity as f64 * self.point_value;
        self.balance += realized_pnl;

        let closed = ClosedPosition {
            id: position.id,
            side: position.side,
            quantity: position.quantity,
            open_price: position.open_price,
            exit_price,
            realized_pnl,
            opened_at: position.opened_at,
            closed_at: self.now(),
            reason: reason.to_string(),
        };

        self.working.retain(|o| o.position_id != Some(position_id));
        self.trade_history.push_back(TradeRecord {
            position_id,
            side: position.side,
            quantity: position.quantity,
            entry_price: position.open_price,
            exit_price,
            pnl_points,
            pnl_dollars: realized_pnl,
            entry_time: position.opened_at,
            exit_time: closed.closed_at,
            reason: reason.to_string(),
        });
        while self.trade_history.len() > self.max_history {
            self.trade_history.pop_front();
        }

        debug!(
            "SIM: closed {} {:.2} -> {:.2} ${:.2} ({})",
            position.side, position.open_price, exit_price, realized_pnl, reason
        );
        self.events.push(PositionEvent::Closed(closed.clone()));
        Some(closed)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn working_orders(&self) -> &[Order] {
        &self.working
    }

    pub fn trades(&self) -> &VecDeque<TradeRecord> {
        &self.trade_history
    }

    pub fn net_pnl(&self) -> f64 {
        self.balance - self.starting_balance
    }

    /// Get stats summary string
    pub fn stats_summary(&self) -> String {
        let wins = self.trade_history.iter().filter(|t| t.pnl_dollars > 0.0).count();
        format!(
            "{} | Balance: ${:.2} | Net: ${:.2} | Trades: {} ({} wins) | Open: {}",
            self.symbol,
            self.balance,
            self.net_pnl(),
            self.trade_history.len(),
            wins,
            self.positions.len()
        )
    }
}

impl PositionBook for SimulatedBroker {
    fn open_positions(&self) -> Vec<BrokerPosition> {
        self.positions.clone()
    }

    fn account_balance(&self) -> f64 {
        self.balance
    }

    fn drain_events(&mut self) -> Vec<PositionEvent> {
        std::mem::take(&mut self.events)
    }
}

impl OrderTransport for SimulatedBroker {
    fn submit(&mut self, order: &Order) -> Result<OrderAck, TransportError> {
        self.check_failure()?;
        if !self.supports(order.order_type) {
            return Err(TransportError::Unsupported(order.order_type));
        }

        match order.order_type {
            OrderType::Market => {
                let fill = order
                    .reference_price
                    .or(self.last_price)
                    .ok_or_else(|| TransportError::Rejected("no reference price".to_string()))?;
                match order.position_id {
                    Some(position_id) => {
                        self.close(position_id, fill, "market")
                            .ok_or(TransportError::UnknownPosition(position_id))?;
                    }
                    None => self.open(order, fill),
                }
                Ok(OrderAck {
                    order_id: order.id,
                    fill_price: Some(fill),
                    message: "filled".to_string(),
                })
            }
            OrderType::Stop | OrderType::Limit => {
                if let Some(position_id) = order.position_id {
                    if !self.positions.iter().any(|p| p.id == position_id) {
                        return Err(TransportError::UnknownPosition(position_id));
                    }
                }
                let mut resting = order.clone();
                resting.update_state(OrderState::Working);
                self.working.push(resting);
                Ok(OrderAck {
                    order_id: order.id,
                    fill_price: None,
                    message: "working".to_string(),
                })
            }
        }
    }

    fn modify_stop(&mut self, order_id: Uuid, stop_price: f64) -> Result<OrderAck, TransportError> {
        self.check_failure()?;
        let order = self
            .working
            .iter_mut()
            .find(|o| o.id == order_id && o.order_type == OrderType::Stop)
            .ok_or(TransportError::UnknownOrder(order_id))?;
        order.stop_price = Some(stop_price);
        order.updated_at = Utc::now();
        Ok(OrderAck {
            order_id,
            fill_price: None,
            message: format!("stop moved to {:.2}", stop_price),
        })
    }

    fn cancel(&mut self, order_id: Uuid) -> Result<(), TransportError> {
        self.check_failure()?;
        let index = self
            .working
            .iter()
            .position(|o| o.id == order_id)
            .ok_or(TransportError::UnknownOrder(order_id))?;
        self.working.remove(index);
        Ok(())
    }

    fn close_position(&mut self, position_id: Uuid, reference_price: f64) -> Result<OrderAck, TransportError> {
        self.check_failure()?;
        self.close(position_id, reference_price, "market close")
            .ok_or(TransportError::UnknownPosition(position_id))?;
        info!("SIM: {} closed at market {:.2}", position_id, reference_price);
        Ok(OrderAck {
            order_id: Uuid::new_v4(),
            fill_price: Some(reference_price),
            message: "closed".to_string(),
        })
    }

    fn supports(&self, order_type: OrderType) -> bool {
        !self.unsupported.contains(&order_type)
    }
}
