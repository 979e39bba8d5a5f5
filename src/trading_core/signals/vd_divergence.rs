//! Price/delta divergence
//!
//! Long when the bar closed down while delta was positive (buying absorbed),
//! short when it closed up on negative delta. `min_delta` filters out noise.

use super::{BarContext, CalculatorKind, CalculatorReading, SignalCalculator};

pub struct VdDivergence {
    min_delta: f64,
    reading: CalculatorReading,
}

impl VdDivergence {
    pub fn new(min_delta: f64) -> Self {
        Self {
            min_delta: min_delta.max(0.0),
            reading: CalculatorReading::none(CalculatorKind::VdDivergence),
        }
    }
}

impl SignalCalculator for VdDivergence {
    fn kind(&self) -> CalculatorKind {
        CalculatorKind::VdDivergence
    }

    fn update(&mut self, ctx: &BarContext<'_>) {
        self.reading = CalculatorReading::none(CalculatorKind::VdDivergence);

        let Some(delta) = ctx.bar.delta() else {
            return;
        };
        let significant = delta.unsigned_abs() as f64 > self.min_delta;
        let fell = ctx.bar.close < ctx.bar.open;
        let rose = ctx.bar.close > ctx.bar.open;

        self.reading.long = significant && fell && delta > 0;
        self.reading.short = significant && rose && delta < 0;
        self.reading.value = Some(delta as f64);
    }

    fn reading(&self) -> CalculatorReading {
        self.reading
    }
}
