//! Warmup gate: no decisions until enough history has been seen

use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::WarmupConfig;

pub struct WarmupGate {
    config: WarmupConfig,
    first_bar: Option<DateTime<Utc>>,
    last_bar: Option<DateTime<Utc>>,
    bars: usize,
    complete: bool,
}

impl WarmupGate {
    pub fn new(config: WarmupConfig) -> Self {
        Self {
            config,
            first_bar: None,
            last_bar: None,
            bars: 0,
            complete: false,
        }
    }

    /// Account for one closed bar. Returns true once warmup is complete;
    /// stays true afterwards.
    pub fn observe(&mut self, time: DateTime<Utc>, indicators_ready: bool) -> bool {
        self.bars += 1;
        self.first_bar.get_or_insert(time);
        self.last_bar = Some(time);
        if self.complete {
            return true;
        }

        let span = self.span_minutes();
        let target = self.config.target_span_minutes as f64 * 0.9;
        let reason = if span as f64 >= target {
            Some("90% of target span")
        } else if indicators_ready && span >= self.config.data_ready_span_minutes {
            Some("data ready")
        } else if self.bars >= self.config.min_bars {
            Some("bar count")
        } else {
            None
        };

        if let Some(reason) = reason {
            info!("WARMUP: complete after {} bars / {} min ({})", self.bars, span, reason);
            self.complete = true;
        }
        self.complete
    }

    pub fn span_minutes(&self) -> i64 {
        match (self.first_bar, self.last_bar) {
            (Some(first), Some(last)) => (last - first).num_minutes(),
            _ => 0,
        }
    }

    pub fn bars(&self) -> usize {
        self.bars
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }
}
