//! Relative volume
//!
//! Current volume against short and long window averages, blended with the
//! smoothed volume average when the provider has one, then divided by ATR.
//! Fires on a jump in that normalized value larger than the threshold:
//! long when rising, short when falling.

use super::{BarContext, CalculatorKind, CalculatorReading, SignalCalculator};
use crate::trading_core::indicators::{average, trailing_window, AverageMode};

pub struct Rvol {
    threshold: f64,
    short_window: usize,
    long_window: usize,
    mode: AverageMode,
    prev_normalized: Option<f64>,
    reading: CalculatorReading,
}

impl Rvol {
    pub fn new(threshold: f64, short_window: usize, long_window: usize, mode: AverageMode) -> Self {
        Self {
            threshold,
            short_window: short_window.max(1),
            long_window: long_window.max(1),
            mode,
            prev_normalized: None,
            reading: CalculatorReading::none(CalculatorKind::Rvol),
        }
    }

    fn window_average(&self, ctx: &BarContext<'_>, lookback: usize) -> Option<f64> {
        let volumes: Vec<f64> = trailing_window(ctx.history, lookback)
            .iter()
            .map(|b| b.volume as f64)
            .collect();
        average(&volumes, self.mode).filter(|avg| *avg > 0.0)
    }

    /// Blended relative volume before ATR normalization
    fn relative_volume(&self, ctx: &BarContext<'_>) -> Option<f64> {
        let volume = ctx.bar.volume as f64;
        let short_avg = self.window_average(ctx, self.short_window)?;
        let long_avg = self.window_average(ctx, self.long_window)?;

        let mut ratios = vec![volume / short_avg, volume / long_avg];
        if let Some(smoothed) = ctx.smoothed_volume.filter(|v| *v > 0.0) {
            ratios.push(volume / smoothed);
        }
        average(&ratios, AverageMode::Mean)
    }
}

impl SignalCalculator for Rvol {
    fn kind(&self) -> CalculatorKind {
        CalculatorKind::Rvol
    }

    fn update(&mut self, ctx: &BarContext<'_>) {
        self.reading = CalculatorReading::none(CalculatorKind::Rvol);

        let inputs = ctx.atr.filter(|a| *a > 0.0).zip(self.relative_volume(ctx));
        let Some((atr, rvol)) = inputs else {
            // Next comparison must be against an adjacent bar
            self.prev_normalized = None;
            return;
        };
        let normalized = rvol / atr;

        if let Some(prev) = self.prev_normalized {
            let change = normalized - prev;
            let fires = change.abs() > self.threshold;
            self.reading.long = fires && change > 0.0;
            self.reading.short = fires && change < 0.0;
        }
        self.reading.value = Some(normalized);
        self.prev_normalized = Some(normalized);
    }

    fn reading(&self) -> CalculatorReading {
        self.reading
    }
}
