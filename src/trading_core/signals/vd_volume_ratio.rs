//! Share of the bar's volume that was net aggression: |delta| / volume against the window average

use super::{BarContext, CalculatorKind, CalculatorReading, SignalCalculator};
use crate::trading_core::indicators::{average, trailing_window, AverageMode};
use crate::types::Bar;

pub struct VdVolumeRatio {
    threshold: f64,
    lookback: usize,
    mode: AverageMode,
    reading: CalculatorReading,
}

impl VdVolumeRatio {
    pub fn new(threshold: f64, lookback: usize, mode: AverageMode) -> Self {
        Self {
            threshold,
            lookback: lookback.max(1),
            mode,
            reading: CalculatorReading::none(CalculatorKind::VdVolumeRatio),
        }
    }

    fn ratio(bar: &Bar) -> Option<f64> {
        if bar.volume == 0 {
            return None;
        }
        bar.delta().map(|d| d.unsigned_abs() as f64 / bar.volume as f64)
    }
}

impl SignalCalculator for VdVolumeRatio {
    fn kind(&self) -> CalculatorKind {
        CalculatorKind::VdVolumeRatio
    }

    fn update(&mut self, ctx: &BarContext<'_>) {
        self.reading = CalculatorReading::none(CalculatorKind::VdVolumeRatio);

        let (Some(delta), Some(current)) = (ctx.bar.delta(), Self::ratio(ctx.bar)) else {
            return;
        };
        let ratios: Vec<f64> = trailing_window(ctx.history, self.lookback)
            .iter()
            .filter_map(Self::ratio)
            .collect();
        let Some(baseline) = average(&ratios, self.mode) else {
            return;
        };

        self.reading = CalculatorReading::exceeds(CalculatorKind::VdVolumeRatio, current, baseline, self.threshold, delta);
    }

    fn reading(&self) -> CalculatorReading {
        self.reading
    }
}
