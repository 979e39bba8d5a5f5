//! Price move per unit of volume delta
//!
//! The bar's |open - close| / |delta| against the window's average move over
//! the window's average |delta|. A large ratio means price travelled far on
//! little net aggression.

use super::{BarContext, CalculatorKind, CalculatorReading, SignalCalculator};
use crate::trading_core::indicators::{average, trailing_window, AverageMode};

pub struct VdPriceRatio {
    threshold: f64,
    lookback: usize,
    mode: AverageMode,
    reading: CalculatorReading,
}

impl VdPriceRatio {
    pub fn new(threshold: f64, lookback: usize, mode: AverageMode) -> Self {
        Self {
            threshold,
            lookback: lookback.max(1),
            mode,
            reading: CalculatorReading::none(CalculatorKind::VdPriceRatio),
        }
    }
}

impl SignalCalculator for VdPriceRatio {
    fn kind(&self) -> CalculatorKind {
        CalculatorKind::VdPriceRatio
    }

    fn update(&mut self, ctx: &BarContext<'_>) {
        self.reading = CalculatorReading::none(CalculatorKind::VdPriceRatio);

        let Some(delta) = ctx.bar.delta().filter(|d| *d != 0) else {
            return;
        };
        let current = ctx.bar.body() / delta.unsigned_abs() as f64;

        let mut moves = Vec::new();
        let mut deltas = Vec::new();
        for b in trailing_window(ctx.history, self.lookback) {
            if let Some(d) = b.delta().filter(|d| *d != 0) {
                moves.push(b.body());
                deltas.push(d.unsigned_abs() as f64);
            }
        }
        let (Some(avg_move), Some(avg_delta)) = (average(&moves, self.mode), average(&deltas, self.mode)) else {
            return;
        };
        if avg_delta <= 0.0 {
            return;
        }

        self.reading = CalculatorReading::exceeds(
            CalculatorKind::VdPriceRatio,
            current,
            avg_move / avg_delta,
            self.threshold,
            delta,
        );
    }

    fn reading(&self) -> CalculatorReading {
        self.reading
    }
}
