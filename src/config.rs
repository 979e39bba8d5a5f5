//! Strategy configuration
//!
//! One sub-config per component, all serde-loadable with defaults so a JSON
//! file only needs the fields it overrides.

use chrono::{NaiveDate, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::trading_core::indicators::AverageMode;
use crate::trading_core::sessions::SessionWindow;
use crate::trading_core::signals::CalculatorKind;
use crate::trading_core::time_filter::TradingPeriod;

/// Contract metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    /// Symbol to trade (e.g., "ES.c.0")
    pub symbol: String,
    /// Minimum price increment
    pub tick_size: f64,
    /// Dollar value per point (ES = $50, NQ = $20)
    pub point_value: f64,
    /// Contracts per stacked unit
    pub contracts: u32,
    /// IANA timezone used for sessions and trading windows
    pub timezone: String,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            symbol: "ES.c.0".to_string(),
            tick_size: 0.25,
            point_value: 50.0,
            contracts: 1,
            timezone: "America/New_York".to_string(),
        }
    }
}

impl InstrumentConfig {
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::UnknownTimezone(self.timezone.clone()))
    }

    /// Dollar value of one tick for one contract
    pub fn tick_value(&self) -> f64 {
        self.tick_size * self.point_value
    }
}

/// Per-calculator voting and threshold settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CalculatorSettings {
    /// Counts toward entry votes
    pub entry: bool,
    /// Counts toward exit votes
    pub exit: bool,
    /// Threshold multiplier (meaning depends on the calculator)
    pub threshold: f64,
    /// Trailing window length in bars
    pub lookback: usize,
}

impl Default for CalculatorSettings {
    fn default() -> Self {
        Self {
            entry: true,
            exit: true,
            threshold: 1.5,
            lookback: 20,
        }
    }
}

impl CalculatorSettings {
    pub fn is_enabled(&self) -> bool {
        self.entry || self.exit
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub rvol: CalculatorSettings,
    pub vd_strength: CalculatorSettings,
    pub vd_price_ratio: CalculatorSettings,
    pub custom_hma: CalculatorSettings,
    pub vd_volume_ratio: CalculatorSettings,
    pub vd_divergence: CalculatorSettings,
    /// RVOL short average window
    pub rvol_short_window: usize,
    /// RVOL long average window
    pub rvol_long_window: usize,
    /// Adaptive HMA period before ATR modulation
    pub hma_base_period: f64,
    /// Mean or median for window averages
    pub average_mode: AverageMode,
    /// Entry votes required (N of the entry-enabled calculators)
    pub entry_required: usize,
    /// Exit votes required (N of the exit-enabled calculators)
    pub exit_required: usize,
    /// Snapshots retained for reporting
    pub snapshot_history: usize,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            rvol: CalculatorSettings {
                threshold: 1.0,
                ..Default::default()
            },
            vd_strength: CalculatorSettings::default(),
            vd_price_ratio: CalculatorSettings::default(),
            custom_hma: CalculatorSettings {
                threshold: 0.0,
                ..Default::default()
            },
            vd_volume_ratio: CalculatorSettings::default(),
            vd_divergence: CalculatorSettings {
                threshold: 0.0,
                ..Default::default()
            },
            rvol_short_window: 5,
            rvol_long_window: 20,
            hma_base_period: 40.0,
            average_mode: AverageMode::Mean,
            entry_required: 3,
            exit_required: 3,
            snapshot_history: 500,
        }
    }
}

impl SignalConfig {
    pub fn settings(&self, kind: CalculatorKind) -> &CalculatorSettings {
        match kind {
            CalculatorKind::Rvol => &self.rvol,
            CalculatorKind::VdStrength => &self.vd_strength,
            CalculatorKind::VdPriceRatio => &self.vd_price_ratio,
            CalculatorKind::CustomHma => &self.custom_hma,
            CalculatorKind::VdVolumeRatio => &self.vd_volume_ratio,
            CalculatorKind::VdDivergence => &self.vd_divergence,
        }
    }

    pub fn settings_mut(&mut self, kind: CalculatorKind) -> &mut CalculatorSettings {
        match kind {
            CalculatorKind::Rvol => &mut self.rvol,
            CalculatorKind::VdStrength => &mut self.vd_strength,
            CalculatorKind::VdPriceRatio => &mut self.vd_price_ratio,
            CalculatorKind::CustomHma => &mut self.custom_hma,
            CalculatorKind::VdVolumeRatio => &mut self.vd_volume_ratio,
            CalculatorKind::VdDivergence => &mut self.vd_divergence,
        }
    }

    pub fn entry_enabled_count(&self) -> usize {
        CalculatorKind::ALL.iter().filter(|k| self.settings(**k).entry).count()
    }

    pub fn exit_enabled_count(&self) -> usize {
        CalculatorKind::ALL.iter().filter(|k| self.settings(**k).exit).count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Regular trading hours of the prior session; its start is the daily reset boundary
    pub prior_session: SessionWindow,
    /// Overnight (globex) window, wraps midnight
    pub overnight: SessionWindow,
    /// Pre-open window
    pub pre_open: SessionWindow,
    /// Minimum distance from entry to a session level for it to be a target
    pub min_take_profit_ticks: u32,
    /// Fixed target offset used when no session level qualifies
    pub alternate_target_ticks: u32,
    /// Archived sessions retained
    pub history_len: usize,
    /// Archived extremes consulted when live sessions supply too few levels
    pub fallback_levels: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            prior_session: SessionWindow::new(930, 1600),
            overnight: SessionWindow::new(1800, 800),
            pre_open: SessionWindow::new(800, 930),
            min_take_profit_ticks: 8,
            alternate_target_ticks: 40,
            history_len: 30,
            fallback_levels: 9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StopConfig {
    /// ATR multiple beyond the previous bar's extreme
    pub atr_multiplier: f64,
    /// Tightest allowed stop distance in ticks
    pub min_distance_ticks: u32,
    /// Widest allowed stop distance in ticks
    pub max_distance_ticks: u32,
}

impl Default for StopConfig {
    fn default() -> Self {
        Self {
            atr_multiplier: 1.0,
            min_distance_ticks: 4,
            max_distance_ticks: 80,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionConfig {
    /// Maximum same-direction units
    pub max_stack: u32,
    /// Close and flip on an opposite entry signal
    pub allow_reversal: bool,
    /// Slippage as a fraction of ATR
    pub slippage_multiplier: f64,
    /// Random +/- band applied to slippage (0.2 = 20%)
    pub slippage_jitter: f64,
    /// Fixed RNG seed for reproducible slippage; entropy when absent
    pub slippage_seed: Option<u64>,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            max_stack: 3,
            allow_reversal: true,
            slippage_multiplier: 0.1,
            slippage_jitter: 0.2,
            slippage_seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Daily loss limit switch
    pub enabled: bool,
    /// Halt once |realized + unrealized| reaches this many dollars
    pub max_daily_loss: f64,
    /// Largest single order in contracts; open exposure is capped at 3x this
    pub max_position_size: u32,
    /// Start a fresh tracker (and clear a halt) whenever a new trading period begins
    pub reset_each_period: bool,
    /// Local HHMM at which the trading day rolls (CME = 1800)
    pub day_rollover: u16,
    /// Archived trackers retained
    pub history_len: usize,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_daily_loss: 1000.0,
            max_position_size: 3,
            reset_each_period: true,
            day_rollover: 1800,
            history_len: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeFilterConfig {
    pub periods: [TradingPeriod; 3],
    /// Weekdays with no trading
    pub closed_weekdays: Vec<Weekday>,
    /// Exchange holidays
    pub holidays: Vec<NaiveDate>,
    /// Raise the close-positions flag when leaving a window
    pub close_on_period_exit: bool,
    /// No new entries this close to a window end
    pub approaching_end_minutes: u32,
    /// No new entries until this long after a window opens
    pub recently_entered_minutes: u32,
}

impl Default for TimeFilterConfig {
    fn default() -> Self {
        Self {
            periods: [
                TradingPeriod::new(930, 1600),
                TradingPeriod::disabled(1800, 400),
                TradingPeriod::disabled(400, 930),
            ],
            closed_weekdays: vec![Weekday::Sat],
            holidays: Vec::new(),
            close_on_period_exit: true,
            approaching_end_minutes: 5,
            recently_entered_minutes: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmupConfig {
    /// History span the strategy would ideally see before trading
    pub target_span_minutes: i64,
    /// Bar count that satisfies warmup on its own
    pub min_bars: usize,
    /// Span that satisfies warmup once indicators report ready
    pub data_ready_span_minutes: i64,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            target_span_minutes: 2 * 24 * 60,
            min_bars: 100,
            data_ready_span_minutes: 24 * 60,
        }
    }
}

/// Full engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub instrument: InstrumentConfig,
    pub signals: SignalConfig,
    pub sessions: SessionConfig,
    pub stops: StopConfig,
    pub positions: PositionConfig,
    pub risk: RiskConfig,
    pub time_filter: TimeFilterConfig,
    pub warmup: WarmupConfig,
    /// Trailing bars kept for calculator windows
    pub history_bars: usize,
}

impl StrategyConfig {
    /// E-mini S&P 500 defaults
    pub fn es() -> Self {
        Self {
            history_bars: 200,
            ..Default::default()
        }
    }

    /// E-mini Nasdaq defaults
    pub fn nq() -> Self {
        Self {
            instrument: InstrumentConfig {
                symbol: "NQ.c.0".to_string(),
                point_value: 20.0,
                ..Default::default()
            },
            stops: StopConfig {
                min_distance_ticks: 8,
                max_distance_ticks: 160,
                ..Default::default()
            },
            history_bars: 200,
            ..Default::default()
        }
    }

    /// Trailing window length, never below the longest calculator lookback
    pub fn history_capacity(&self) -> usize {
        let longest = CalculatorKind::ALL
            .iter()
            .map(|k| self.signals.settings(*k).lookback)
            .chain([self.signals.rvol_long_window, self.signals.rvol_short_window, 100])
            .max()
            .unwrap_or(100);
        self.history_bars.max(longest)
    }

    /// Collect every configuration problem
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if !(self.instrument.tick_size > 0.0) {
            errors.push(ConfigError::InvalidTickSize(self.instrument.tick_size));
        }
        if let Err(e) = self.instrument.tz() {
            errors.push(e);
        }

        let periods = &self.time_filter.periods;
        if !periods.iter().any(|p| p.enabled) {
            errors.push(ConfigError::NoEnabledPeriods);
        }
        for (index, period) in periods.iter().enumerate() {
            if period.enabled && !period.is_well_formed() {
                errors.push(ConfigError::InvalidPeriod {
                    index,
                    start: period.start,
                    end: period.end,
                });
            }
        }

        if self.stops.min_distance_ticks > self.stops.max_distance_ticks {
            errors.push(ConfigError::StopDistanceInverted {
                min: self.stops.min_distance_ticks,
                max: self.stops.max_distance_ticks,
            });
        }

        let entry_enabled = self.signals.entry_enabled_count();
        if self.signals.entry_required == 0 || self.signals.entry_required > entry_enabled {
            errors.push(ConfigError::UnreachableVote {
                kind: "entry",
                required: self.signals.entry_required,
                enabled: entry_enabled,
            });
        }
        let exit_enabled = self.signals.exit_enabled_count();
        if self.signals.exit_required == 0 || self.signals.exit_required > exit_enabled {
            errors.push(ConfigError::UnreachableVote {
                kind: "exit",
                required: self.signals.exit_required,
                enabled: exit_enabled,
            });
        }

        if self.positions.max_stack == 0 {
            errors.push(ConfigError::ZeroMaxStack);
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(StrategyConfig::es().validate().is_empty());
        assert!(StrategyConfig::nq().validate().is_empty());
    }

    #[test]
    fn test_no_enabled_periods() {
        let mut config = StrategyConfig::es();
        for period in config.time_filter.periods.iter_mut() {
            period.enabled = false;
        }
        assert!(config.validate().contains(&ConfigError::NoEnabledPeriods));
    }

    #[test]
    fn test_unreachable_vote() {
        let mut config = StrategyConfig::es();
        config.signals.entry_required = 7;
        let errors = config.validate();
        assert!(errors.iter().any(|e| matches!(e, ConfigError::UnreachableVote { kind: "entry", .. })));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "positions": { "max_stack": 2 }, "instrument": { "symbol": "MES.c.0" } }"#;
        let config: StrategyConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.positions.max_stack, 2);
        assert!(config.positions.allow_reversal);
        assert_eq!(config.instrument.symbol, "MES.c.0");
        assert_eq!(config.instrument.tick_size, 0.25);
    }

    #[test]
    fn test_tick_value() {
        assert_eq!(InstrumentConfig::default().tick_value(), 12.5);
    }
}
