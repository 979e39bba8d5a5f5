//! Volatility-adaptive Hull moving average
//!
//! The HMA period shrinks as ATR grows: `base_period / ATR`, clamped to
//! [2, 100]. Long while the close is above the average, short while below.

use super::{BarContext, CalculatorKind, CalculatorReading, SignalCalculator};
use crate::trading_core::indicators::hma;

const MIN_PERIOD: f64 = 2.0;
const MAX_PERIOD: f64 = 100.0;

pub struct CustomHma {
    base_period: f64,
    period: Option<usize>,
    reading: CalculatorReading,
}

impl CustomHma {
    pub fn new(base_period: f64) -> Self {
        Self {
            base_period,
            period: None,
            reading: CalculatorReading::none(CalculatorKind::CustomHma),
        }
    }

    /// Period used on the last update
    pub fn period(&self) -> Option<usize> {
        self.period
    }

    pub fn adaptive_period(base_period: f64, atr: f64) -> usize {
        (base_period / atr).round().clamp(MIN_PERIOD, MAX_PERIOD) as usize
    }
}

impl SignalCalculator for CustomHma {
    fn kind(&self) -> CalculatorKind {
        CalculatorKind::CustomHma
    }

    fn update(&mut self, ctx: &BarContext<'_>) {
        self.reading = CalculatorReading::none(CalculatorKind::CustomHma);
        self.period = None;

        let Some(atr) = ctx.atr.filter(|a| *a > 0.0) else {
            return;
        };
        let period = Self::adaptive_period(self.base_period, atr);

        let start = ctx.history.len().saturating_sub(period * 2);
        let mut closes: Vec<f64> = ctx.history[start..].iter().map(|b| b.close).collect();
        closes.push(ctx.bar.close);

        let Some(average) = hma(&closes, period) else {
            return;
        };
        self.period = Some(period);
        self.reading.long = ctx.bar.close > average;
        self.reading.short = ctx.bar.close < average;
        self.reading.value = Some(average);
    }

    fn reading(&self) -> CalculatorReading {
        self.reading
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Bar;
    use chrono::{Duration, TimeZone, Utc};

    fn closes(values: &[f64]) -> Vec<Bar> {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 3, 15, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, c)| Bar::new(t0 + Duration::minutes(i as i64), *c, c + 0.5, c - 0.5, *c, 100))
            .collect()
    }

    #[test]
    fn test_period_clamped() {
        assert_eq!(CustomHma::adaptive_period(40.0, 2.0), 20);
        assert_eq!(CustomHma::adaptive_period(40.0, 100.0), 2);
        assert_eq!(CustomHma::adaptive_period(40.0, 0.01), 100);
    }

    #[test]
    fn test_close_above_average_is_long() {
        let mut values: Vec<f64> = vec![100.0; 30];
        values.push(105.0);
        let series = closes(&values);
        let last = series.len() - 1;
        let mut calc = CustomHma::new(40.0);
        calc.update(&BarContext {
            bar: &series[last],
            history: &series[..last],
            atr: Some(4.0),
            smoothed_volume: None,
        });
        assert_eq!(calc.period(), Some(10));
        assert!(calc.is_long());
        assert!(!calc.is_short());
    }

    #[test]
    fn test_close_below_average_is_short() {
        let mut values: Vec<f64> = vec![100.0; 30];
        values.push(95.0);
        let series = closes(&values);
        let last = series.len() - 1;
        let mut calc = CustomHma::new(40.0);
        calc.update(&BarContext {
            bar: &series[last],
            history: &series[..last],
            atr: Some(4.0),
            smoothed_volume: None,
        });
        assert!(calc.is_short());
    }
}
