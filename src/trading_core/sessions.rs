//! Session high/low tracking and take-profit selection
//!
//! Tracks three rolling windows in exchange-local time:
//! - Prior session: regular trading hours (9:30am-4pm ET by default)
//! - Overnight: 6pm-8am ET, wraps midnight
//! - Pre-open: 8am-9:30am ET
//!
//! All three reset when the prior-session start is crossed on a new calendar
//! date; the outgoing sessions are archived first so their extremes remain
//! available as fallback targets.

use std::collections::VecDeque;

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::trading_core::time_filter::{hhmm_to_minutes, window_contains};
use crate::types::{round_to_tick, Bar, Side};

/// Live sessions needed before archived levels are no longer consulted
const MIN_LIVE_LEVELS: usize = 3;

/// Number of nearest levels tried before using the alternate target
const TARGET_ATTEMPTS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionKind {
    PriorSession,
    Overnight,
    PreOpen,
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PriorSession => write!(f, "PRIOR"),
            Self::Overnight => write!(f, "ON"),
            Self::PreOpen => write!(f, "PRE"),
        }
    }
}

/// Local HHMM window, may wrap midnight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionWindow {
    pub start: u16,
    pub end: u16,
}

impl SessionWindow {
    pub const fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, minute_of_day: u32) -> bool {
        window_contains(hhmm_to_minutes(self.start), hhmm_to_minutes(self.end), minute_of_day)
    }
}

/// One session's running extremes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingSession {
    pub kind: SessionKind,
    /// Calendar date of the reset that opened this cycle
    pub date: Option<NaiveDate>,
    pub window: SessionWindow,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub bar_count: u32,
    pub first_bar: Option<DateTime<Utc>>,
    pub last_bar: Option<DateTime<Utc>>,
}

impl TradingSession {
    fn new(kind: SessionKind, window: SessionWindow, date: Option<NaiveDate>) -> Self {
        Self {
            kind,
            date,
            window,
            high: None,
            low: None,
            bar_count: 0,
            first_bar: None,
            last_bar: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.high.is_some() && self.low.is_some()
    }

    fn apply(&mut self, bar: &Bar) {
        self.high = Some(self.high.map_or(bar.high, |h| h.max(bar.high)));
        self.low = Some(self.low.map_or(bar.low, |l| l.min(bar.low)));
        self.bar_count += 1;
        self.first_bar.get_or_insert(bar.timestamp);
        self.last_bar = Some(bar.timestamp);
    }

    /// The extreme a target on `side` would use
    fn extreme(&self, side: Side) -> Option<f64> {
        match side {
            Side::Long => self.high,
            Side::Short => self.low,
        }
    }
}

/// Where a take-profit level came from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TakeProfitSource {
    Session(SessionKind),
    Archived { kind: SessionKind, date: Option<NaiveDate> },
    Alternate,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TakeProfit {
    pub price: f64,
    pub source: TakeProfitSource,
}

pub struct SessionTracker {
    config: SessionConfig,
    tz: Tz,
    tick_size: f64,
    sessions: [TradingSession; 3],
    history: VecDeque<TradingSession>,
    last_reset: Option<NaiveDate>,
}

impl SessionTracker {
    pub fn new(config: SessionConfig, tz: Tz, tick_size: f64) -> Self {
        let sessions = Self::fresh_sessions(&config, None);
        Self {
            history: VecDeque::with_capacity(config.history_len),
            config,
            tz,
            tick_size,
            sessions,
            last_reset: None,
        }
    }

    fn fresh_sessions(config: &SessionConfig, date: Option<NaiveDate>) -> [TradingSession; 3] {
        [
            TradingSession::new(SessionKind::PriorSession, config.prior_session, date),
            TradingSession::new(SessionKind::Overnight, config.overnight, date),
            TradingSession::new(SessionKind::PreOpen, config.pre_open, date),
        ]
    }

    /// Apply a closed bar, resetting first when a new day's prior session starts
    pub fn process_bar(&mut self, bar: &Bar) {
        let local = bar.timestamp.with_timezone(&self.tz);
        let minute = local.hour() * 60 + local.minute();
        let date = local.date_naive();

        let reset_minute = hhmm_to_minutes(self.config.prior_session.start);
        if minute >= reset_minute && self.last_reset != Some(date) {
            self.reset(date);
        }

        for session in self.sessions.iter_mut() {
            if session.window.contains(minute) {
                session.apply(bar);
            }
        }
    }

    fn reset(&mut self, date: NaiveDate) {
        let outgoing = std::mem::replace(&mut self.sessions, Self::fresh_sessions(&self.config, Some(date)));
        let mut archived = 0;
        for session in outgoing.into_iter().filter(|s| s.is_valid()) {
            self.history.push_back(session);
            archived += 1;
        }
        while self.history.len() > self.config.history_len {
            self.history.pop_front();
        }
        self.last_reset = Some(date);
        info!("SESSION: reset for {} ({} archived, {} in history)", date, archived, self.history.len());
    }

    /// Candidate extremes for `side`: live sessions first, then recent archives if too few
    fn candidate_levels(&self, side: Side) -> Vec<(f64, TakeProfitSource)> {
        let mut levels: Vec<(f64, TakeProfitSource)> = self
            .sessions
            .iter()
            .filter(|s| s.is_valid())
            .filter_map(|s| s.extreme(side).map(|p| (p, TakeProfitSource::Session(s.kind))))
            .collect();

        if levels.len() < MIN_LIVE_LEVELS {
            levels.extend(
                self.history
                    .iter()
                    .rev()
                    .filter_map(|s| {
                        s.extreme(side).map(|p| {
                            (
                                p,
                                TakeProfitSource::Archived {
                                    kind: s.kind,
                                    date: s.date,
                                },
                            )
                        })
                    })
                    .take(self.config.fallback_levels),
            );
        }
        levels
    }

    fn alternate(&self, price: f64, side: Side) -> TakeProfit {
        let offset = self.config.alternate_target_ticks as f64 * self.tick_size;
        TakeProfit {
            price: round_to_tick(price + offset * side.sign(), self.tick_size),
            source: TakeProfitSource::Alternate,
        }
    }

    /// Pick a take-profit for a position entered at `price`.
    ///
    /// Longs target the nearest session high above price, shorts the nearest
    /// low below, provided it is at least `min_take_profit_ticks` away. The
    /// next-nearest level gets one more chance; otherwise the fixed
    /// alternate offset is used.
    pub fn select_take_profit(&self, price: f64, side: Side) -> TakeProfit {
        let levels = self.candidate_levels(side);
        if levels.is_empty() {
            debug!("TP: no session levels, using alternate target");
            return self.alternate(price, side);
        }

        let mut ahead: Vec<(f64, f64, TakeProfitSource)> = levels
            .into_iter()
            .map(|(level, source)| ((level - price) * side.sign(), level, source))
            .filter(|(distance, _, _)| *distance > 0.0)
            .collect();
        ahead.sort_by(|a, b| a.0.total_cmp(&b.0));

        let min_distance = self.config.min_take_profit_ticks as f64 * self.tick_size;
        for (distance, level, source) in ahead.into_iter().take(TARGET_ATTEMPTS) {
            if distance + 1e-9 >= min_distance {
                return TakeProfit {
                    price: round_to_tick(level, self.tick_size),
                    source,
                };
            }
        }

        self.alternate(price, side)
    }

    pub fn sessions(&self) -> &[TradingSession; 3] {
        &self.sessions
    }

    pub fn session(&self, kind: SessionKind) -> &TradingSession {
        match kind {
            SessionKind::PriorSession => &self.sessions[0],
            SessionKind::Overnight => &self.sessions[1],
            SessionKind::PreOpen => &self.sessions[2],
        }
    }

    pub fn history(&self) -> &VecDeque<TradingSession> {
        &self.history
    }

    pub fn status(&self) -> String {
        let fmt = |v: Option<f64>| v.map_or("-".to_string(), |p| format!("{:.2}", p));
        self.sessions
            .iter()
            .map(|s| format!("{} H:{} L:{}", s.kind, fmt(s.high), fmt(s.low)))
            .collect::<Vec<_>>()
            .join(" | ")
    }
}
