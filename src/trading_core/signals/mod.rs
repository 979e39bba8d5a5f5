//! Signal aggregation
//!
//! Six independent calculators each read the closed bar plus a trailing
//! window of earlier bars and report long/short plus a raw value. The
//! aggregator turns those readings into entry and exit votes and freezes the
//! result once per bar close.
//!
//! Voting rules:
//! - entry long: at least `entry_required` entry-enabled calculators are long
//! - exit long: at least `exit_required` exit-enabled calculators are *short*
//! - an entry that is simultaneously long and short is discarded entirely

mod custom_hma;
mod rvol;
mod vd_divergence;
mod vd_price_ratio;
mod vd_strength;
mod vd_volume_ratio;

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SignalConfig;
use crate::types::Bar;

pub use custom_hma::CustomHma;
pub use rvol::Rvol;
pub use vd_divergence::VdDivergence;
pub use vd_price_ratio::VdPriceRatio;
pub use vd_strength::VdStrength;
pub use vd_volume_ratio::VdVolumeRatio;

/// The closed set of calculators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CalculatorKind {
    Rvol,
    VdStrength,
    VdPriceRatio,
    CustomHma,
    VdVolumeRatio,
    VdDivergence,
}

impl CalculatorKind {
    pub const ALL: [CalculatorKind; 6] = [
        CalculatorKind::Rvol,
        CalculatorKind::VdStrength,
        CalculatorKind::VdPriceRatio,
        CalculatorKind::CustomHma,
        CalculatorKind::VdVolumeRatio,
        CalculatorKind::VdDivergence,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Rvol => "rvol",
            Self::VdStrength => "vd_strength",
            Self::VdPriceRatio => "vd_price_ratio",
            Self::CustomHma => "custom_hma",
            Self::VdVolumeRatio => "vd_volume_ratio",
            Self::VdDivergence => "vd_divergence",
        }
    }
}

impl std::fmt::Display for CalculatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Inputs for one calculator update
#[derive(Debug, Clone, Copy)]
pub struct BarContext<'a> {
    /// The bar that just closed
    pub bar: &'a Bar,
    /// Earlier closed bars, oldest first; never includes `bar`
    pub history: &'a [Bar],
    pub atr: Option<f64>,
    pub smoothed_volume: Option<f64>,
}

/// One calculator's output for one bar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalculatorReading {
    pub kind: CalculatorKind,
    pub long: bool,
    pub short: bool,
    pub value: Option<f64>,
}

impl CalculatorReading {
    /// No signal and no value
    pub fn none(kind: CalculatorKind) -> Self {
        Self {
            kind,
            long: false,
            short: false,
            value: None,
        }
    }

    /// Threshold-exceed rule shared by the volume-delta calculators: fires
    /// when `current > baseline * threshold`, direction from the signed delta.
    pub fn exceeds(kind: CalculatorKind, current: f64, baseline: f64, threshold: f64, delta: i64) -> Self {
        if !(baseline > 0.0) || !current.is_finite() {
            return Self::none(kind);
        }
        let fires = current > baseline * threshold;
        Self {
            kind,
            long: fires && delta > 0,
            short: fires && delta < 0,
            value: Some(current / baseline),
        }
    }
}

/// Shared capability of every calculator
pub trait SignalCalculator: Send {
    fn kind(&self) -> CalculatorKind;

    /// Recompute from the newly closed bar. Missing inputs leave the
    /// calculator reporting no signal for this bar.
    fn update(&mut self, ctx: &BarContext<'_>);

    fn reading(&self) -> CalculatorReading;

    fn is_long(&self) -> bool {
        self.reading().long
    }

    fn is_short(&self) -> bool {
        self.reading().short
    }

    fn value(&self) -> Option<f64> {
        self.reading().value
    }
}

/// Build the calculator for `kind` from config
pub fn build_calculator(kind: CalculatorKind, config: &SignalConfig) -> Box<dyn SignalCalculator> {
    let settings = *config.settings(kind);
    match kind {
        CalculatorKind::Rvol => Box::new(Rvol::new(
            settings.threshold,
            config.rvol_short_window,
            config.rvol_long_window,
            config.average_mode,
        )),
        CalculatorKind::VdStrength => Box::new(VdStrength::new(settings.threshold, settings.lookback, config.average_mode)),
        CalculatorKind::VdPriceRatio => Box::new(VdPriceRatio::new(settings.threshold, settings.lookback, config.average_mode)),
        CalculatorKind::CustomHma => Box::new(CustomHma::new(config.hma_base_period)),
        CalculatorKind::VdVolumeRatio => Box::new(VdVolumeRatio::new(settings.threshold, settings.lookback, config.average_mode)),
        CalculatorKind::VdDivergence => Box::new(VdDivergence::new(settings.threshold)),
    }
}

/// Per-bar record of every reading and the resulting votes, frozen at bar close
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSnapshot {
    pub time: DateTime<Utc>,
    pub readings: Vec<CalculatorReading>,
    pub entry_long_votes: usize,
    pub entry_short_votes: usize,
    pub exit_long_votes: usize,
    pub exit_short_votes: usize,
    pub entry_long: bool,
    pub entry_short: bool,
    pub exit_long: bool,
    pub exit_short: bool,
    /// Entry long and short both reached their vote; both were discarded
    pub contradiction: bool,
}

impl SignalSnapshot {
    pub fn reading(&self, kind: CalculatorKind) -> Option<&CalculatorReading> {
        self.readings.iter().find(|r| r.kind == kind)
    }

    /// Compact one-line form for logs
    pub fn summary(&self) -> String {
        format!(
            "EL:{}({}) ES:{}({}) XL:{}({}) XS:{}({}){}",
            self.entry_long as u8,
            self.entry_long_votes,
            self.entry_short as u8,
            self.entry_short_votes,
            self.exit_long as u8,
            self.exit_long_votes,
            self.exit_short as u8,
            self.exit_short_votes,
            if self.contradiction { " CONTRADICTION" } else { "" }
        )
    }
}

/// Runs the enabled calculators and caches votes once per bar close
pub struct SignalAggregator {
    config: SignalConfig,
    calculators: Vec<Box<dyn SignalCalculator>>,
    cached: Option<SignalSnapshot>,
    history: VecDeque<SignalSnapshot>,
}

impl SignalAggregator {
    pub fn new(config: SignalConfig) -> Self {
        let calculators = CalculatorKind::ALL
            .iter()
            .filter(|k| config.settings(**k).is_enabled())
            .map(|k| build_calculator(*k, &config))
            .collect();
        Self::with_calculators(config, calculators)
    }

    /// Use caller-supplied calculators (voting still follows `config`)
    pub fn with_calculators(config: SignalConfig, calculators: Vec<Box<dyn SignalCalculator>>) -> Self {
        Self {
            history: VecDeque::with_capacity(config.snapshot_history.min(1024)),
            config,
            calculators,
            cached: None,
        }
    }

    /// Recompute every enabled calculator from the newly closed bar
    pub fn update(&mut self, ctx: &BarContext<'_>) {
        for calc in self.calculators.iter_mut() {
            calc.update(ctx);
        }
    }

    /// Freeze votes for the bar closing at `time`.
    ///
    /// Returns false (and changes nothing) unless `time` is strictly later
    /// than the last cached bar.
    pub fn cache_at_close(&mut self, time: DateTime<Utc>) -> bool {
        if let Some(ref cached) = self.cached {
            if time <= cached.time {
                return false;
            }
        }

        let snapshot = self.vote(time);
        if snapshot.contradiction {
            debug!("SIGNAL: contradiction at {} - entry long and short both discarded", time);
        }

        self.history.push_back(snapshot.clone());
        while self.history.len() > self.config.snapshot_history {
            self.history.pop_front();
        }
        self.cached = Some(snapshot);
        true
    }

    fn vote(&self, time: DateTime<Utc>) -> SignalSnapshot {
        let readings: Vec<CalculatorReading> = self.calculators.iter().map(|c| c.reading()).collect();

        let mut entry_long_votes = 0;
        let mut entry_short_votes = 0;
        let mut exit_long_votes = 0;
        let mut exit_short_votes = 0;
        for r in &readings {
            let settings = self.config.settings(r.kind);
            if settings.entry {
                entry_long_votes += r.long as usize;
                entry_short_votes += r.short as usize;
            }
            if settings.exit {
                // Exits need the opposite direction
                exit_long_votes += r.short as usize;
                exit_short_votes += r.long as usize;
            }
        }

        let entry_required = self.config.entry_required.max(1);
        let exit_required = self.config.exit_required.max(1);

        let mut entry_long = entry_long_votes >= entry_required;
        let mut entry_short = entry_short_votes >= entry_required;
        let contradiction = entry_long && entry_short;
        if contradiction {
            entry_long = false;
            entry_short = false;
        }

        SignalSnapshot {
            time,
            readings,
            entry_long_votes,
            entry_short_votes,
            exit_long_votes,
            exit_short_votes,
            entry_long,
            entry_short,
            exit_long: exit_long_votes >= exit_required,
            exit_short: exit_short_votes >= exit_required,
            contradiction,
        }
    }

    /// Votes frozen for the most recent bar close
    pub fn cached(&self) -> Option<&SignalSnapshot> {
        self.cached.as_ref()
    }

    /// Recent snapshots, oldest first
    pub fn history(&self) -> &VecDeque<SignalSnapshot> {
        &self.history
    }

    pub fn calculator(&self, kind: CalculatorKind) -> Option<&dyn SignalCalculator> {
        self.calculators.iter().find(|c| c.kind() == kind).map(|c| c.as_ref())
    }

    pub fn status(&self) -> String {
        match &self.cached {
            Some(s) => format!("{} @ {}", s.summary(), s.time.format("%Y-%m-%d %H:%M")),
            None => "no signals cached".to_string(),
        }
    }
}
