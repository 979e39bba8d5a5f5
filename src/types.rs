//! Market data and direction types shared by every component.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Buy- and sell-initiated volume for one bar interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeDelta {
    #[serde(rename = "buyVolume")]
    pub buy_volume: u64,
    #[serde(rename = "sellVolume")]
    pub sell_volume: u64,
}

impl VolumeDelta {
    pub fn new(buy_volume: u64, sell_volume: u64) -> Self {
        Self { buy_volume, sell_volume }
    }

    /// Signed delta: buy volume minus sell volume
    pub fn delta(&self) -> i64 {
        self.buy_volume as i64 - self.sell_volume as i64
    }
}

/// A finalized price bar, identified by its close timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    #[serde(rename = "volumeDelta", default)]
    pub volume_delta: Option<VolumeDelta>,
}

impl Bar {
    pub fn new(timestamp: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64, volume: u64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            volume_delta: None,
        }
    }

    pub fn with_delta(mut self, buy_volume: u64, sell_volume: u64) -> Self {
        self.volume_delta = Some(VolumeDelta::new(buy_volume, sell_volume));
        self
    }

    /// Signed volume delta, if the feed supplied one
    pub fn delta(&self) -> Option<i64> {
        self.volume_delta.map(|vd| vd.delta())
    }

    /// |open - close|
    pub fn body(&self) -> f64 {
        (self.open - self.close).abs()
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

/// Which quote or print a tick represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TickSide {
    Trade,
    Bid,
    Ask,
}

/// Intra-bar trade or quote update
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub side: TickSide,
}

impl Tick {
    pub fn trade(timestamp: DateTime<Utc>, price: f64) -> Self {
        Self { timestamp, price, side: TickSide::Trade }
    }

    /// Whether this tick is the price a position on `side` would exit at.
    /// Longs sell into the bid, shorts buy from the ask; trades apply to both.
    pub fn applies_to(&self, side: Side) -> bool {
        match (self.side, side) {
            (TickSide::Trade, _) => true,
            (TickSide::Bid, Side::Long) => true,
            (TickSide::Ask, Side::Short) => true,
            _ => false,
        }
    }
}

/// Position direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }

    /// +1 for long, -1 for short
    pub fn sign(&self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }

    /// Points gained per contract moving from `entry` to `exit`
    pub fn pnl_points(&self, entry: f64, exit: f64) -> f64 {
        (exit - entry) * self.sign()
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "Long"),
            Self::Short => write!(f, "Short"),
        }
    }
}

/// Round a price to the nearest multiple of `tick_size`
pub fn round_to_tick(price: f64, tick_size: f64) -> f64 {
    if tick_size <= 0.0 {
        return price;
    }
    (price / tick_size).round() * tick_size
}
