//! Time-of-day trading filter
//!
//! Up to three HHMM windows in exchange-local time. A window whose start is
//! after its end wraps midnight (1800-0400 is active at 0200). Leaving a
//! window raises a one-shot "close positions" flag for the caller.

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::TimeFilterConfig;

const MINUTES_PER_DAY: u32 = 24 * 60;

/// HHMM (e.g. 1830) to minutes after midnight
pub fn hhmm_to_minutes(hhmm: u16) -> u32 {
    (hhmm / 100) as u32 * 60 + (hhmm % 100) as u32
}

/// Whether `minute` falls in [start, end), wrapping midnight when start > end.
/// Equal bounds cover the whole day.
pub fn window_contains(start: u32, end: u32, minute: u32) -> bool {
    if start == end {
        true
    } else if start < end {
        minute >= start && minute < end
    } else {
        minute >= start || minute < end
    }
}

/// One configured trading window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingPeriod {
    pub enabled: bool,
    /// HHMM
    pub start: u16,
    /// HHMM
    pub end: u16,
}

impl TradingPeriod {
    pub const fn new(start: u16, end: u16) -> Self {
        Self { enabled: true, start, end }
    }

    pub const fn disabled(start: u16, end: u16) -> Self {
        Self { enabled: false, start, end }
    }

    pub fn is_well_formed(&self) -> bool {
        let ok = |hhmm: u16| hhmm / 100 < 24 && hhmm % 100 < 60;
        ok(self.start) && ok(self.end)
    }

    pub fn wraps_midnight(&self) -> bool {
        self.start > self.end
    }

    pub fn contains_minute(&self, minute_of_day: u32) -> bool {
        window_contains(hhmm_to_minutes(self.start), hhmm_to_minutes(self.end), minute_of_day)
    }

    /// Same test on an HHMM value
    pub fn contains_hhmm(&self, hhmm: u16) -> bool {
        self.contains_minute(hhmm_to_minutes(hhmm))
    }

    fn minutes_to_end(&self, minute_of_day: u32) -> u32 {
        let end = hhmm_to_minutes(self.end);
        match (end + MINUTES_PER_DAY - minute_of_day) % MINUTES_PER_DAY {
            0 => MINUTES_PER_DAY,
            m => m,
        }
    }

    fn minutes_since_start(&self, minute_of_day: u32) -> u32 {
        let start = hhmm_to_minutes(self.start);
        (minute_of_day + MINUTES_PER_DAY - start) % MINUTES_PER_DAY
    }
}

impl std::fmt::Display for TradingPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:04}", self.start, self.end)
    }
}

/// What changed on the last check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeriodTransition {
    Unchanged,
    Entered(usize),
    Exited(usize),
    Switched { from: usize, to: usize },
}

pub struct TimeFilter {
    config: TimeFilterConfig,
    tz: Tz,
    current: Option<usize>,
    last_transition: PeriodTransition,
    should_close: bool,
    /// Period whose exit was already flagged ahead of its transition
    exit_flagged: Option<usize>,
    last_check: Option<DateTime<Utc>>,
}

impl TimeFilter {
    pub fn new(config: TimeFilterConfig, tz: Tz) -> Self {
        Self {
            config,
            tz,
            current: None,
            last_transition: PeriodTransition::Unchanged,
            should_close: false,
            exit_flagged: None,
            last_check: None,
        }
    }

    fn local_minute(&self, time: DateTime<Utc>) -> (NaiveDate, u32) {
        let local = time.with_timezone(&self.tz);
        (local.date_naive(), local.hour() * 60 + local.minute())
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !self.config.closed_weekdays.contains(&date.weekday()) && !self.config.holidays.contains(&date)
    }

    /// Index of the first enabled window containing `time`, ignoring the calendar
    fn period_at(&self, time: DateTime<Utc>) -> Option<usize> {
        let (_, minute) = self.local_minute(time);
        self.config
            .periods
            .iter()
            .position(|p| p.enabled && p.contains_minute(minute))
    }

    /// Enabled window active at `time` on a trading day
    pub fn active_period(&self, time: DateTime<Utc>) -> Option<usize> {
        let (date, _) = self.local_minute(time);
        if !self.is_trading_day(date) {
            return None;
        }
        self.period_at(time)
    }

    /// Whether window `index` covers `time` (calendar not considered)
    pub fn is_time_in_period(&self, time: DateTime<Utc>, index: usize) -> bool {
        let (_, minute) = self.local_minute(time);
        self.config
            .periods
            .get(index)
            .is_some_and(|p| p.enabled && p.contains_minute(minute))
    }

    /// Evaluate `time`, record enter/exit/switch transitions and report
    /// whether trading is allowed.
    pub fn is_trading_allowed(&mut self, time: DateTime<Utc>) -> bool {
        let active = self.active_period(time);
        self.last_check = Some(time);

        self.last_transition = match (self.current, active) {
            (None, Some(to)) => PeriodTransition::Entered(to),
            (Some(from), None) => PeriodTransition::Exited(from),
            (Some(from), Some(to)) if from != to => PeriodTransition::Switched { from, to },
            _ => PeriodTransition::Unchanged,
        };

        match self.last_transition {
            PeriodTransition::Entered(to) => {
                info!("TIME: entered period {} ({})", to + 1, self.config.periods[to]);
            }
            PeriodTransition::Exited(from) => {
                info!("TIME: exited period {} ({})", from + 1, self.config.periods[from]);
                if self.config.close_on_period_exit && self.exit_flagged != Some(from) {
                    self.should_close = true;
                }
            }
            PeriodTransition::Switched { from, to } => {
                info!(
                    "TIME: switched period {} ({}) -> {} ({})",
                    from + 1,
                    self.config.periods[from],
                    to + 1,
                    self.config.periods[to]
                );
            }
            PeriodTransition::Unchanged => {}
        }
        if self.last_transition != PeriodTransition::Unchanged {
            self.exit_flagged = None;
        }

        self.current = active;
        active.is_some()
    }

    /// Raise the close flag if `time` is past the end of the current period.
    /// Transitions are left for the next `is_trading_allowed` call.
    pub fn check_period_exit(&mut self, time: DateTime<Utc>) {
        let Some(from) = self.current else {
            return;
        };
        if !self.config.close_on_period_exit || self.exit_flagged == Some(from) {
            return;
        }
        if self.active_period(time).is_none() {
            debug!("TIME: period {} over at {}, close flagged", from + 1, time);
            self.exit_flagged = Some(from);
            self.should_close = true;
        }
    }

    /// Consume the close-positions flag
    pub fn take_should_close(&mut self) -> bool {
        std::mem::take(&mut self.should_close)
    }

    pub fn should_close(&self) -> bool {
        self.should_close
    }

    pub fn current_period(&self) -> Option<usize> {
        self.current
    }

    pub fn last_transition(&self) -> PeriodTransition {
        self.last_transition
    }

    pub fn minutes_to_period_end(&self, time: DateTime<Utc>) -> Option<u32> {
        let index = self.active_period(time)?;
        let (_, minute) = self.local_minute(time);
        Some(self.config.periods[index].minutes_to_end(minute))
    }

    pub fn minutes_since_period_start(&self, time: DateTime<Utc>) -> Option<u32> {
        let index = self.active_period(time)?;
        let (_, minute) = self.local_minute(time);
        Some(self.config.periods[index].minutes_since_start(minute))
    }

    pub fn is_approaching_period_end(&self, time: DateTime<Utc>) -> bool {
        self.minutes_to_period_end(time)
            .is_some_and(|m| m <= self.config.approaching_end_minutes)
    }

    pub fn is_recently_entered(&self, time: DateTime<Utc>) -> bool {
        self.minutes_since_period_start(time)
            .is_some_and(|m| m < self.config.recently_entered_minutes)
    }

    /// Inside a window and clear of both edge buffers
    pub fn entries_allowed(&self, time: DateTime<Utc>) -> bool {
        self.active_period(time).is_some() && !self.is_approaching_period_end(time) && !self.is_recently_entered(time)
    }

    pub fn status(&self) -> String {
        let Some(time) = self.last_check else {
            return "not checked".to_string();
        };
        match self.current {
            Some(index) => format!(
                "IN period {} ({}) | {} min to end",
                index + 1,
                self.config.periods[index],
                self.minutes_to_period_end(time).unwrap_or(0)
            ),
            None => "OUT of trading windows".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::America::New_York;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        // March 2025: the 3rd is a Monday, the 8th a Saturday
        New_York
            .with_ymd_and_hms(2025, 3, day, hour, minute, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn config(periods: [TradingPeriod; 3]) -> TimeFilterConfig {
        TimeFilterConfig {
            periods,
            ..Default::default()
        }
    }

    #[test]
    fn test_wrapping_window() {
        let period = TradingPeriod::new(1800, 400);
        assert!(period.contains_hhmm(200));
        assert!(period.contains_hhmm(1800));
        assert!(period.contains_hhmm(2359));
        assert!(!period.contains_hhmm(400));
        assert!(!period.contains_hhmm(1200));
    }

    #[test]
    fn test_is_time_in_period_wraps() {
        let tf = TimeFilter::new(
            config([
                TradingPeriod::new(930, 1600),
                TradingPeriod::new(1800, 400),
                TradingPeriod::disabled(0, 0),
            ]),
            New_York,
        );
        assert!(tf.is_time_in_period(at(4, 2, 0), 1));
        assert!(!tf.is_time_in_period(at(4, 2, 0), 0));
        assert!(!tf.is_time_in_period(at(4, 2, 0), 2));
    }

    #[test]
    fn test_transitions_and_close_flag() {
        let mut tf = TimeFilter::new(TimeFilterConfig::default(), New_York);

        assert!(!tf.is_trading_allowed(at(3, 9, 0)));
        assert_eq!(tf.last_transition(), PeriodTransition::Unchanged);

        assert!(tf.is_trading_allowed(at(3, 9, 30)));
        assert_eq!(tf.last_transition(), PeriodTransition::Entered(0));
        assert!(!tf.should_close());

        assert!(!tf.is_trading_allowed(at(3, 16, 0)));
        assert_eq!(tf.last_transition(), PeriodTransition::Exited(0));
        assert!(tf.take_should_close());
        assert!(!tf.take_should_close());
    }

    #[test]
    fn test_period_exit_flagged_once_between_bars() {
        let mut tf = TimeFilter::new(TimeFilterConfig::default(), New_York);
        tf.is_trading_allowed(at(3, 15, 59));

        tf.check_period_exit(at(3, 15, 59));
        assert!(!tf.should_close());
        tf.check_period_exit(at(3, 16, 0));
        assert!(tf.take_should_close());
        tf.check_period_exit(at(3, 16, 0));
        assert!(!tf.should_close());
        assert_eq!(tf.current_period(), Some(0));

        // The bar-close transition does not flag the same exit again
        assert!(!tf.is_trading_allowed(at(3, 16, 1)));
        assert_eq!(tf.last_transition(), PeriodTransition::Exited(0));
        assert!(!tf.should_close());
    }

    #[test]
    fn test_switch_between_adjacent_periods() {
        let mut tf = TimeFilter::new(
            config([
                TradingPeriod::new(400, 930),
                TradingPeriod::new(930, 1600),
                TradingPeriod::disabled(0, 0),
            ]),
            New_York,
        );
        tf.is_trading_allowed(at(3, 9, 0));
        tf.is_trading_allowed(at(3, 9, 30));
        assert_eq!(tf.last_transition(), PeriodTransition::Switched { from: 0, to: 1 });
        assert!(!tf.should_close());
    }

    #[test]
    fn test_closed_weekday_and_holiday() {
        let mut cfg = TimeFilterConfig::default();
        cfg.holidays.push(NaiveDate::from_ymd_opt(2025, 3, 4).unwrap());
        let mut tf = TimeFilter::new(cfg, New_York);
        assert!(!tf.is_trading_allowed(at(8, 10, 0)));
        assert!(!tf.is_trading_allowed(at(4, 10, 0)));
        assert!(tf.is_trading_allowed(at(5, 10, 0)));
    }

    #[test]
    fn test_edge_buffers() {
        let tf = TimeFilter::new(TimeFilterConfig::default(), New_York);
        assert_eq!(tf.minutes_to_period_end(at(3, 15, 50)), Some(10));
        assert!(!tf.is_approaching_period_end(at(3, 15, 50)));
        assert!(tf.is_approaching_period_end(at(3, 15, 56)));
        assert!(tf.is_recently_entered(at(3, 9, 30)));
        assert!(!tf.is_recently_entered(at(3, 9, 31)));
        assert!(tf.entries_allowed(at(3, 12, 0)));
        assert!(!tf.entries_allowed(at(3, 17, 0)));
    }

    #[test]
    fn test_minutes_to_end_across_midnight() {
        let tf = TimeFilter::new(
            config([
                TradingPeriod::new(1800, 400),
                TradingPeriod::disabled(0, 0),
                TradingPeriod::disabled(0, 0),
            ]),
            New_York,
        );
        assert_eq!(tf.minutes_to_period_end(at(3, 23, 0)), Some(300));
        assert_eq!(tf.minutes_since_period_start(at(4, 1, 0)), Some(420));
    }
}
