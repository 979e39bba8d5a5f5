//! Daily loss limit and position size checks

use std::collections::VecDeque;

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::RiskConfig;
use crate::trading_core::time_filter::hhmm_to_minutes;

/// P&L book for one trading day (or one period when resetting per period)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRiskTracker {
    pub date: NaiveDate,
    pub period: Option<usize>,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub trade_count: u32,
    pub wins: u32,
    pub losses: u32,
    /// Largest give-back from the day's best total
    pub max_drawdown: f64,
    /// Best total reached
    pub max_profit: f64,
    pub halted: bool,
    pub halt_reason: Option<String>,
}

impl DailyRiskTracker {
    pub fn new(date: NaiveDate, period: Option<usize>) -> Self {
        Self {
            date,
            period,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            trade_count: 0,
            wins: 0,
            losses: 0,
            max_drawdown: 0.0,
            max_profit: 0.0,
            halted: false,
            halt_reason: None,
        }
    }

    pub fn total_pnl(&self) -> f64 {
        self.realized_pnl + self.unrealized_pnl
    }

    pub fn win_rate(&self) -> f64 {
        if self.trade_count == 0 {
            0.0
        } else {
            self.wins as f64 / self.trade_count as f64 * 100.0
        }
    }

    fn mark(&mut self) {
        let total = self.total_pnl();
        self.max_profit = self.max_profit.max(total);
        self.max_drawdown = self.max_drawdown.max(self.max_profit - total);
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SizeRejection {
    #[error("requested {requested} contracts exceeds max position size {max}")]
    TooLarge { requested: u32, max: u32 },

    #[error("exposure {total} contracts would exceed limit {limit}")]
    ExposureExceeded { total: u32, limit: u32 },
}

pub struct RiskGate {
    config: RiskConfig,
    tz: Tz,
    tracker: Option<DailyRiskTracker>,
    history: VecDeque<DailyRiskTracker>,
}

impl RiskGate {
    pub fn new(config: RiskConfig, tz: Tz) -> Self {
        Self {
            config,
            tz,
            tracker: None,
            history: VecDeque::new(),
        }
    }

    /// Exchange trading date; times at or after the rollover belong to the next day
    pub fn trading_date(&self, now: DateTime<Utc>) -> NaiveDate {
        let local = now.with_timezone(&self.tz);
        let minute = local.hour() * 60 + local.minute();
        let rollover = hhmm_to_minutes(self.config.day_rollover);
        if rollover > 0 && minute >= rollover {
            local.date_naive() + Duration::days(1)
        } else {
            local.date_naive()
        }
    }

    /// Roll the tracker if a new day (or period) began, then apply the loss limit.
    pub fn should_halt(&mut self, now: DateTime<Utc>, period: Option<usize>) -> bool {
        let date = self.trading_date(now);
        let reset_each_period = self.config.reset_each_period;

        let tracker = match self.tracker.take() {
            None => DailyRiskTracker::new(date, period),
            Some(current) => {
                let new_period =
                    reset_each_period && period.is_some() && current.period.is_some() && period != current.period;
                if current.date != date || new_period {
                    self.rollover(current, date, period)
                } else {
                    let mut current = current;
                    if period.is_some() {
                        current.period = period;
                    }
                    current
                }
            }
        };
        self.tracker = Some(tracker);
        self.evaluate_limit()
    }

    fn rollover(&mut self, old: DailyRiskTracker, date: NaiveDate, period: Option<usize>) -> DailyRiskTracker {
        info!(
            "RISK: {} closed | P&L ${:.2} | {} trades ({}W/{}L)",
            old.date, old.realized_pnl, old.trade_count, old.wins, old.losses
        );
        if old.halted {
            info!("HALT: cleared at rollover to {}", date);
        }
        self.history.push_back(old);
        while self.history.len() > self.config.history_len {
            self.history.pop_front();
        }
        DailyRiskTracker::new(date, period)
    }

    fn evaluate_limit(&mut self) -> bool {
        let enabled = self.config.enabled;
        let limit = self.config.max_daily_loss;
        let Some(tracker) = self.tracker.as_mut() else {
            return false;
        };
        if !tracker.halted && enabled && tracker.total_pnl().abs() >= limit {
            let reason = format!("daily P&L ${:.2} reached limit ${:.2}", tracker.total_pnl(), limit);
            warn!("HALT: {}", reason);
            tracker.halted = true;
            tracker.halt_reason = Some(reason);
        }
        tracker.halted
    }

    /// Book a closed trade's P&L in dollars
    pub fn record_close(&mut self, pnl: f64, now: DateTime<Utc>) {
        if self.tracker.is_none() {
            self.tracker = Some(DailyRiskTracker::new(self.trading_date(now), None));
        }
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.realized_pnl += pnl;
            tracker.trade_count += 1;
            if pnl > 0.0 {
                tracker.wins += 1;
            } else {
                tracker.losses += 1;
            }
            tracker.mark();
        }
        self.evaluate_limit();
    }

    /// Replace the open-position P&L in dollars
    pub fn update_unrealized(&mut self, unrealized: f64) {
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.unrealized_pnl = unrealized;
            tracker.mark();
        }
    }

    /// Reject an order larger than the max size, or one pushing total
    /// exposure past three times it.
    pub fn validate_size(&self, requested: u32, open: u32) -> Result<(), SizeRejection> {
        let max = self.config.max_position_size;
        if requested > max {
            return Err(SizeRejection::TooLarge { requested, max });
        }
        let limit = max.saturating_mul(3);
        let total = requested.saturating_add(open);
        if total > limit {
            return Err(SizeRejection::ExposureExceeded { total, limit });
        }
        Ok(())
    }

    /// Clear a halt before the next rollover
    pub fn resume(&mut self) {
        if let Some(tracker) = self.tracker.as_mut() {
            if tracker.halted {
                info!("HALT: manually resumed");
            }
            tracker.halted = false;
            tracker.halt_reason = None;
        }
    }

    pub fn is_halted(&self) -> bool {
        self.tracker.as_ref().is_some_and(|t| t.halted)
    }

    pub fn tracker(&self) -> Option<&DailyRiskTracker> {
        self.tracker.as_ref()
    }

    pub fn history(&self) -> &VecDeque<DailyRiskTracker> {
        &self.history
    }

    pub fn summary(&self) -> String {
        match &self.tracker {
            None => "no trading day started".to_string(),
            Some(t) => format!(
                "{} | P&L ${:.2} (realized ${:.2}, open ${:.2}) | {} trades, {:.0}% wins | max DD ${:.2}{}",
                t.date,
                t.total_pnl(),
                t.realized_pnl,
                t.unrealized_pnl,
                t.trade_count,
                t.win_rate(),
                t.max_drawdown,
                if t.halted { " | HALTED" } else { "" }
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::America::New_York;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        New_York
            .with_ymd_and_hms(2025, 3, day, hour, 0, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_trading_date_rolls_at_six_pm() {
        let gate = RiskGate::new(RiskConfig::default(), New_York);
        assert_eq!(gate.trading_date(at(3, 17)), NaiveDate::from_ymd_opt(2025, 3, 3).unwrap());
        assert_eq!(gate.trading_date(at(3, 18)), NaiveDate::from_ymd_opt(2025, 3, 4).unwrap());
    }

    #[test]
    fn test_loss_limit_halts_until_next_day() {
        let mut gate = RiskGate::new(RiskConfig::default(), New_York);
        assert!(!gate.should_halt(at(3, 10), Some(0)));

        gate.record_close(-600.0, at(3, 11));
        assert!(!gate.should_halt(at(3, 11), Some(0)));
        gate.record_close(-400.0, at(3, 12));
        assert!(gate.should_halt(at(3, 12), Some(0)));
        assert!(gate.should_halt(at(3, 15), Some(0)));

        assert!(!gate.should_halt(at(4, 10), Some(0)));
        assert_eq!(gate.history().len(), 1);
        assert!(gate.history()[0].halted);
        assert_eq!(gate.tracker().unwrap().realized_pnl, 0.0);
    }

    #[test]
    fn test_profit_at_limit_halts_until_next_day() {
        let mut gate = RiskGate::new(RiskConfig::default(), New_York);
        gate.should_halt(at(3, 10), Some(0));
        gate.record_close(999.0, at(3, 10));
        assert!(!gate.should_halt(at(3, 11), Some(0)));
        gate.record_close(1.0, at(3, 11));
        assert!(gate.should_halt(at(3, 11), Some(0)));
        assert!(!gate.should_halt(at(4, 10), Some(0)));
        assert!(gate.history()[0].halted);
    }

    #[test]
    fn test_unrealized_counts_toward_limit() {
        let mut gate = RiskGate::new(RiskConfig::default(), New_York);
        gate.should_halt(at(3, 10), Some(0));
        gate.record_close(-500.0, at(3, 10));
        gate.update_unrealized(-500.0);
        assert!(gate.should_halt(at(3, 11), Some(0)));
    }

    #[test]
    fn test_disabled_limit() {
        let config = RiskConfig {
            enabled: false,
            ..Default::default()
        };
        let mut gate = RiskGate::new(config, New_York);
        gate.should_halt(at(3, 10), Some(0));
        gate.record_close(-5_000.0, at(3, 10));
        assert!(!gate.should_halt(at(3, 11), Some(0)));
    }

    #[test]
    fn test_new_period_resumes_by_default() {
        let mut gate = RiskGate::new(RiskConfig::default(), New_York);
        gate.should_halt(at(3, 5), Some(2));
        gate.record_close(-1_200.0, at(3, 6));
        assert!(gate.should_halt(at(3, 7), Some(2)));
        assert!(gate.should_halt(at(3, 9), None));
        assert!(!gate.should_halt(at(3, 10), Some(0)));
        assert_eq!(gate.history().len(), 1);
        assert_eq!(gate.tracker().unwrap().period, Some(0));
    }

    #[test]
    fn test_day_only_rollover_keeps_halt_across_periods() {
        let config = RiskConfig {
            reset_each_period: false,
            ..Default::default()
        };
        let mut gate = RiskGate::new(config, New_York);
        gate.should_halt(at(3, 5), Some(2));
        gate.record_close(-1_200.0, at(3, 6));
        assert!(gate.should_halt(at(3, 7), Some(2)));
        assert!(gate.should_halt(at(3, 10), Some(0)));
    }

    #[test]
    fn test_drawdown_tracking() {
        let mut gate = RiskGate::new(RiskConfig::default(), New_York);
        gate.should_halt(at(3, 10), Some(0));
        gate.record_close(300.0, at(3, 10));
        gate.record_close(-450.0, at(3, 11));
        let t = gate.tracker().unwrap();
        assert_eq!(t.max_profit, 300.0);
        assert_eq!(t.max_drawdown, 450.0);
        assert_eq!((t.wins, t.losses), (1, 1));
    }

    #[test]
    fn test_validate_size() {
        let gate = RiskGate::new(RiskConfig::default(), New_York);
        assert!(gate.validate_size(1, 0).is_ok());
        assert_eq!(gate.validate_size(4, 0), Err(SizeRejection::TooLarge { requested: 4, max: 3 }));
        assert!(gate.validate_size(1, 8).is_ok());
        assert_eq!(
            gate.validate_size(2, 8),
            Err(SizeRejection::ExposureExceeded { total: 10, limit: 9 })
        );
    }
}
