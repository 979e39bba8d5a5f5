//! ATR stop placement and trailing
//!
//! Stops sit one ATR multiple beyond the previous bar's extreme, clamped to a
//! tick distance band. Once registered a stop only ever tightens.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::StopConfig;
use crate::error::{EngineError, EngineResult};
use crate::types::{round_to_tick, Bar, Side};

/// Protective levels for one open position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopRecord {
    pub position_id: Uuid,
    pub side: Side,
    pub entry_price: f64,
    pub initial_stop: f64,
    pub current_stop: f64,
    pub take_profit: Option<f64>,
    pub update_count: u32,
    /// Set once the stop has moved off its initial level
    pub trailing: bool,
}

impl StopRecord {
    /// Distance from entry to the current stop in ticks
    pub fn risk_ticks(&self, tick_size: f64) -> f64 {
        (self.entry_price - self.current_stop).abs() / tick_size
    }
}

/// A committed stop move
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopUpdate {
    pub position_id: Uuid,
    pub old_stop: f64,
    pub new_stop: f64,
}

pub struct StopEngine {
    config: StopConfig,
    tick_size: f64,
    atr: Option<f64>,
    previous_bar: Option<Bar>,
    records: HashMap<Uuid, StopRecord>,
}

impl StopEngine {
    pub fn new(config: StopConfig, tick_size: f64) -> Self {
        Self {
            config,
            tick_size,
            atr: None,
            previous_bar: None,
            records: HashMap::new(),
        }
    }

    /// Latest ATR and the bar stops are measured from
    pub fn refresh(&mut self, atr: Option<f64>, previous_bar: &Bar) {
        self.atr = atr;
        self.previous_bar = Some(previous_bar.clone());
    }

    /// Unclamped ATR stop, if ATR and a previous bar are known
    fn raw_stop(&self, side: Side) -> Option<f64> {
        let atr = self.atr?;
        let bar = self.previous_bar.as_ref()?;
        let offset = atr * self.config.atr_multiplier;
        Some(match side {
            Side::Long => bar.low - offset,
            Side::Short => bar.high + offset,
        })
    }

    /// Clamp `stop` into [min, max] ticks from `reference` on the losing side
    pub fn clamp_distance(&self, side: Side, reference: f64, stop: f64) -> f64 {
        let min = self.config.min_distance_ticks as f64;
        let max = self.config.max_distance_ticks.max(self.config.min_distance_ticks) as f64;
        let ticks = ((reference - stop) * side.sign() / self.tick_size).round().clamp(min, max);
        round_to_tick(reference - side.sign() * ticks * self.tick_size, self.tick_size)
    }

    /// Stop for a position opened now at `entry_price`
    pub fn initial_stop(&self, side: Side, entry_price: f64) -> f64 {
        match self.raw_stop(side) {
            Some(raw) => self.clamp_distance(side, entry_price, raw),
            None => {
                warn!(
                    "STOP: ATR or previous bar unavailable, using max distance ({} ticks)",
                    self.config.max_distance_ticks
                );
                let ticks = self.config.max_distance_ticks as f64;
                round_to_tick(entry_price - side.sign() * ticks * self.tick_size, self.tick_size)
            }
        }
    }

    pub fn register(&mut self, position_id: Uuid, side: Side, entry_price: f64, take_profit: Option<f64>) -> &StopRecord {
        let stop = self.initial_stop(side, entry_price);
        debug!(
            "STOP: registered {} {} entry {:.2} stop {:.2} tp {:?}",
            side, position_id, entry_price, stop, take_profit
        );
        self.records.entry(position_id).or_insert(StopRecord {
            position_id,
            side,
            entry_price,
            initial_stop: stop,
            current_stop: stop,
            take_profit,
            update_count: 0,
            trailing: false,
        })
    }

    /// Recompute the trail for one position.
    ///
    /// The candidate is clamped into the distance band around the recorded
    /// entry and committed only when it improves the stored stop by at least
    /// one tick.
    pub fn update(&mut self, position_id: Uuid, current_price: f64, side: Side, entry_price: f64) -> EngineResult<Option<StopUpdate>> {
        let tick_size = self.tick_size;
        let (record_side, record_entry) = match self.records.get(&position_id) {
            Some(record) => (record.side, record.entry_price),
            None => return Err(EngineError::UnknownPosition(position_id)),
        };
        if record_side != side || (record_entry - entry_price).abs() > tick_size / 2.0 {
            warn!(
                "STOP: {} caller reports {} @ {:.2}, record has {} @ {:.2}",
                position_id, side, entry_price, record_side, record_entry
            );
        }
        let Some(raw) = self.raw_stop(record_side) else {
            return Err(EngineError::DataUnavailable("ATR or previous bar"));
        };
        let candidate = self.clamp_distance(record_side, record_entry, raw);

        let Some(record) = self.records.get_mut(&position_id) else {
            return Err(EngineError::UnknownPosition(position_id));
        };
        let improvement = (candidate - record.current_stop) * record.side.sign();
        if improvement < tick_size - 1e-9 {
            return Ok(None);
        }

        let update = StopUpdate {
            position_id,
            old_stop: record.current_stop,
            new_stop: candidate,
        };
        record.current_stop = candidate;
        record.update_count += 1;
        record.trailing = true;
        debug!(
            "STOP: {} trailed {:.2} -> {:.2} @ {:.2}",
            position_id, update.old_stop, update.new_stop, current_price
        );
        Ok(Some(update))
    }

    pub fn is_hit(&self, position_id: Uuid, price: f64) -> bool {
        self.records.get(&position_id).is_some_and(|r| match r.side {
            Side::Long => price <= r.current_stop,
            Side::Short => price >= r.current_stop,
        })
    }

    pub fn is_take_profit_hit(&self, position_id: Uuid, price: f64) -> bool {
        self.records.get(&position_id).is_some_and(|r| match (r.side, r.take_profit) {
            (Side::Long, Some(tp)) => price >= tp,
            (Side::Short, Some(tp)) => price <= tp,
            (_, None) => false,
        })
    }

    pub fn remove(&mut self, position_id: Uuid) -> Option<StopRecord> {
        self.records.remove(&position_id)
    }

    pub fn record(&self, position_id: Uuid) -> Option<&StopRecord> {
        self.records.get(&position_id)
    }

    pub fn records(&self) -> impl Iterator<Item = &StopRecord> {
        self.records.values()
    }

    pub fn position_ids(&self) -> Vec<Uuid> {
        self.records.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn prev_bar(high: f64, low: f64) -> Bar {
        let ts = Utc.with_ymd_and_hms(2025, 3, 3, 15, 0, 0).unwrap();
        Bar::new(ts, low, high, low, high, 1_000)
    }

    fn engine(atr: f64, high: f64, low: f64) -> StopEngine {
        let mut stops = StopEngine::new(StopConfig::default(), 0.25);
        stops.refresh(Some(atr), &prev_bar(high, low));
        stops
    }

    #[test]
    fn test_initial_long_stop_below_previous_low() {
        let mut stops = engine(2.0, 4502.0, 4495.0);
        let id = Uuid::new_v4();
        let record = stops.register(id, Side::Long, 4500.0, Some(4510.0));
        assert_eq!(record.current_stop, 4493.0);
        assert_eq!(record.risk_ticks(0.25), 28.0);
    }

    #[test]
    fn test_initial_stop_clamped_to_min_distance() {
        let stops = engine(0.25, 4500.5, 4499.75);
        // Raw 4499.5 is only 2 ticks away
        assert_eq!(stops.initial_stop(Side::Long, 4500.0), 4499.0);
        assert_eq!(stops.initial_stop(Side::Short, 4500.0), 4501.0);
    }

    #[test]
    fn test_initial_stop_clamped_to_max_distance() {
        let stops = engine(30.0, 4510.0, 4490.0);
        assert_eq!(stops.initial_stop(Side::Long, 4500.0), 4480.0);
        assert_eq!(stops.initial_stop(Side::Short, 4500.0), 4520.0);
    }

    #[test]
    fn test_missing_atr_uses_max_distance() {
        let stops = StopEngine::new(StopConfig::default(), 0.25);
        assert_eq!(stops.initial_stop(Side::Long, 4500.0), 4480.0);
    }

    #[test]
    fn test_trail_only_tightens() {
        let mut stops = engine(2.0, 4502.0, 4495.0);
        let id = Uuid::new_v4();
        stops.register(id, Side::Long, 4500.0, None);

        stops.refresh(Some(2.0), &prev_bar(4506.0, 4500.0));
        let update = stops.update(id, 4505.0, Side::Long, 4500.0).unwrap().unwrap();
        assert_eq!(update.old_stop, 4493.0);
        assert_eq!(update.new_stop, 4498.0);

        // Pullback: candidate is looser, nothing changes
        stops.refresh(Some(2.0), &prev_bar(4503.0, 4496.0));
        assert!(stops.update(id, 4497.0, Side::Long, 4500.0).unwrap().is_none());
        assert_eq!(stops.record(id).unwrap().current_stop, 4498.0);
        assert!(stops.record(id).unwrap().trailing);
    }

    #[test]
    fn test_trail_stays_min_distance_from_entry() {
        let mut stops = engine(2.0, 4502.0, 4495.0);
        let id = Uuid::new_v4();
        stops.register(id, Side::Long, 4500.0, None);

        // Raw 4500.75 would sit above entry
        stops.refresh(Some(0.25), &prev_bar(4503.0, 4501.0));
        let update = stops.update(id, 4501.0, Side::Long, 4500.0).unwrap().unwrap();
        assert_eq!(update.new_stop, 4499.0);
        assert_eq!(stops.record(id).unwrap().risk_ticks(0.25), 4.0);

        // Already at the band edge, a higher raw stop changes nothing
        stops.refresh(Some(0.25), &prev_bar(4510.0, 4508.0));
        assert!(stops.update(id, 4509.0, Side::Long, 4500.0).unwrap().is_none());
    }

    #[test]
    fn test_sub_tick_improvement_skipped() {
        let mut stops = engine(2.0, 4505.0, 4495.0);
        let id = Uuid::new_v4();
        stops.register(id, Side::Short, 4500.0, None);
        assert_eq!(stops.record(id).unwrap().current_stop, 4507.0);
        stops.refresh(Some(2.0), &prev_bar(4504.9, 4495.0));
        assert!(stops.update(id, 4500.0, Side::Short, 4500.0).unwrap().is_none());
    }

    #[test]
    fn test_update_unknown_position() {
        let mut stops = engine(2.0, 4502.0, 4495.0);
        let err = stops.update(Uuid::new_v4(), 4500.0, Side::Long, 4500.0).unwrap_err();
        assert!(matches!(err, EngineError::UnknownPosition(_)));
    }

    #[test]
    fn test_hit_tests() {
        let mut stops = engine(2.0, 4502.0, 4495.0);
        let id = Uuid::new_v4();
        stops.register(id, Side::Long, 4500.0, Some(4510.0));
        assert!(!stops.is_hit(id, 4493.25));
        assert!(stops.is_hit(id, 4493.0));
        assert!(!stops.is_take_profit_hit(id, 4509.75));
        assert!(stops.is_take_profit_hit(id, 4510.0));
        stops.remove(id);
        assert!(!stops.is_hit(id, 4000.0));
    }

    proptest! {
        #[test]
        fn prop_trail_is_monotonic(
            long in any::<bool>(),
            moves in prop::collection::vec((-20.0f64..20.0, 0.5f64..6.0, 0.25f64..8.0), 1..40),
        ) {
            let side = if long { Side::Long } else { Side::Short };
            let mut stops = engine(2.0, 4502.0, 4498.0);
            let id = Uuid::new_v4();
            let mut last = stops.register(id, side, 4500.0, None).current_stop;

            for (drift, half_range, atr) in moves {
                let mid = round_to_tick(4500.0 + drift, 0.25);
                stops.refresh(Some(atr), &prev_bar(mid + half_range, mid - half_range));
                stops.update(id, mid, side, 4500.0).unwrap();
                let current = stops.record(id).unwrap().current_stop;
                prop_assert!((current - last) * side.sign() >= -1e-9);
                let ticks = ((4500.0 - current) * side.sign() / 0.25).round();
                prop_assert!((4.0..=80.0).contains(&ticks));
                last = current;
            }
        }

        #[test]
        fn prop_initial_stop_within_distance_band(
            long in any::<bool>(),
            entry_ticks in 16_000i64..20_000,
            atr in 0.0f64..50.0,
            bar_offset in -40.0f64..40.0,
            half_range in 0.0f64..10.0,
        ) {
            let side = if long { Side::Long } else { Side::Short };
            let entry = entry_ticks as f64 * 0.25;
            let mid = entry + bar_offset;
            let stops = engine(atr, mid + half_range, mid - half_range);
            let stop = stops.initial_stop(side, entry);
            let ticks = ((entry - stop) * side.sign() / 0.25).round();
            prop_assert!((4.0..=80.0).contains(&ticks));
        }
    }
}
