//! Volume delta strength: |delta| of the closed bar against the window's average |delta|

use super::{BarContext, CalculatorKind, CalculatorReading, SignalCalculator};
use crate::trading_core::indicators::{average, trailing_window, AverageMode};

pub struct VdStrength {
    threshold: f64,
    lookback: usize,
    mode: AverageMode,
    reading: CalculatorReading,
}

impl VdStrength {
    pub fn new(threshold: f64, lookback: usize, mode: AverageMode) -> Self {
        Self {
            threshold,
            lookback: lookback.max(1),
            mode,
            reading: CalculatorReading::none(CalculatorKind::VdStrength),
        }
    }
}

impl SignalCalculator for VdStrength {
    fn kind(&self) -> CalculatorKind {
        CalculatorKind::VdStrength
    }

    fn update(&mut self, ctx: &BarContext<'_>) {
        self.reading = CalculatorReading::none(CalculatorKind::VdStrength);

        let Some(delta) = ctx.bar.delta() else {
            return;
        };
        let magnitudes: Vec<f64> = trailing_window(ctx.history, self.lookback)
            .iter()
            .filter_map(|b| b.delta())
            .map(|d| d.unsigned_abs() as f64)
            .collect();
        let Some(baseline) = average(&magnitudes, self.mode) else {
            return;
        };

        self.reading = CalculatorReading::exceeds(
            CalculatorKind::VdStrength,
            delta.unsigned_abs() as f64,
            baseline,
            self.threshold,
            delta,
        );
    }

    fn reading(&self) -> CalculatorReading {
        self.reading
    }
}
