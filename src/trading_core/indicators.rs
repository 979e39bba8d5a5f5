//! Window averages and the default indicator provider
//!
//! ATR and the smoothed volume average are normally supplied by the host
//! platform. `RollingIndicators` is a self-contained provider used by the
//! replay driver and tests.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::ports::IndicatorProvider;
use crate::types::Bar;

/// How a window of values is averaged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AverageMode {
    #[default]
    Mean,
    Median,
}

/// Average of `values` using `mode`; `None` for an empty window
pub fn average(values: &[f64], mode: AverageMode) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    match mode {
        AverageMode::Mean => Some(values.iter().sum::<f64>() / values.len() as f64),
        AverageMode::Median => {
            let mut sorted = values.to_vec();
            sorted.sort_by(|a, b| a.total_cmp(b));
            let mid = sorted.len() / 2;
            if sorted.len() % 2 == 0 {
                Some((sorted[mid - 1] + sorted[mid]) / 2.0)
            } else {
                Some(sorted[mid])
            }
        }
    }
}

/// The last `lookback` bars of `history`, clipped to what exists
pub fn trailing_window(history: &[Bar], lookback: usize) -> &[Bar] {
    let start = history.len().saturating_sub(lookback);
    &history[start..]
}

/// Linearly weighted average, newest value weighted heaviest
pub fn wma(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut weighted = 0.0;
    let mut weights = 0.0;
    for (i, v) in values.iter().enumerate() {
        let w = (i + 1) as f64;
        weighted += v * w;
        weights += w;
    }
    Some(weighted / weights)
}

/// Hull moving average at the last element of `values`.
///
/// When fewer values exist than the period needs, the period is clipped to
/// the available history instead of returning nothing.
pub fn hma(values: &[f64], period: usize) -> Option<f64> {
    if values.is_empty() || period == 0 {
        return None;
    }
    let period = period.min(values.len());
    let half = (period / 2).max(1);
    let sqrt_len = ((period as f64).sqrt().round() as usize).max(1);
    let count = sqrt_len.min(values.len() - period + 1);

    let mut diff = Vec::with_capacity(count);
    for offset in (0..count).rev() {
        let end = values.len() - offset;
        let full = wma(&values[end - period..end])?;
        let fast = wma(&values[end - half..end])?;
        diff.push(2.0 * fast - full);
    }
    wma(&diff)
}

/// True range against the previous close
pub fn true_range(bar: &Bar, prev_close: Option<f64>) -> f64 {
    match prev_close {
        Some(pc) => (bar.high - bar.low)
            .max((bar.high - pc).abs())
            .max((bar.low - pc).abs()),
        None => bar.high - bar.low,
    }
}

/// Simple-average ATR plus an HMA of bar volume
#[derive(Debug, Clone)]
pub struct RollingIndicators {
    atr_period: usize,
    volume_period: usize,
    true_ranges: VecDeque<f64>,
    volumes: VecDeque<f64>,
    prev_close: Option<f64>,
}

impl RollingIndicators {
    pub fn new(atr_period: usize, volume_period: usize) -> Self {
        Self {
            atr_period: atr_period.max(1),
            volume_period: volume_period.max(1),
            true_ranges: VecDeque::with_capacity(atr_period + 1),
            volumes: VecDeque::new(),
            prev_close: None,
        }
    }
}

impl Default for RollingIndicators {
    fn default() -> Self {
        Self::new(14, 20)
    }
}

impl IndicatorProvider for RollingIndicators {
    fn update(&mut self, bar: &Bar) {
        self.true_ranges.push_back(true_range(bar, self.prev_close));
        if self.true_ranges.len() > self.atr_period {
            self.true_ranges.pop_front();
        }
        self.prev_close = Some(bar.close);

        // HMA needs period + sqrt(period) - 1 values for a full reading
        let keep = self.volume_period + (self.volume_period as f64).sqrt().ceil() as usize;
        self.volumes.push_back(bar.volume as f64);
        while self.volumes.len() > keep {
            self.volumes.pop_front();
        }
    }

    fn atr(&self) -> Option<f64> {
        if self.true_ranges.len() < self.atr_period {
            return None;
        }
        let atr = self.true_ranges.iter().sum::<f64>() / self.true_ranges.len() as f64;
        (atr > 0.0).then_some(atr)
    }

    fn smoothed_volume(&self) -> Option<f64> {
        if self.volumes.len() < self.volume_period {
            return None;
        }
        let values: Vec<f64> = self.volumes.iter().copied().collect();
        hma(&values, self.volume_period).filter(|v| *v > 0.0)
    }
}
