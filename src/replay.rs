//! Bar replay
//!
//! Loads closed bars from CSV (optionally zstd-compressed), expands each bar
//! into synthetic intra-bar ticks and feeds both to an engine backed by the
//! simulated broker.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::execution::SimulatedBroker;
use crate::ports::IndicatorProvider;
use crate::trading_core::{BarOutcome, StrategyEngine, TickOutcome};
use crate::types::{Bar, Tick};

/// One row of a bar file; `time` is the bar close
#[derive(Debug, Deserialize)]
struct CsvBar {
    time: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
    #[serde(default)]
    buy_volume: Option<u64>,
    #[serde(default)]
    sell_volume: Option<u64>,
}

/// Event fed to the engine, in time order
#[derive(Debug, Clone, PartialEq)]
pub enum MarketEvent {
    Tick(Tick),
    BarClose(Bar),
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .with_context(|| format!("Failed to parse timestamp: {}", value))?;
    Ok(naive.and_utc())
}

/// Parse bars from any CSV reader
pub fn read_bars<R: Read>(reader: R) -> Result<Vec<Bar>> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let mut bars = Vec::new();

    for result in csv_reader.deserialize() {
        let row: CsvBar = result.with_context(|| "Failed to parse CSV row")?;
        let mut bar = Bar::new(parse_time(&row.time)?, row.open, row.high, row.low, row.close, row.volume);
        if let (Some(buy), Some(sell)) = (row.buy_volume, row.sell_volume) {
            bar = bar.with_delta(buy, sell);
        }
        bars.push(bar);
    }

    bars.sort_by_key(|b| b.timestamp);
    Ok(bars)
}

/// Load bars from a `.csv` or `.csv.zst` file
pub fn load_bars(path: &Path) -> Result<Vec<Bar>> {
    let file = File::open(path).with_context(|| format!("Failed to open file: {:?}", path))?;

    let bars = if path.extension().is_some_and(|e| e == "zst") {
        let decoder = zstd::stream::Decoder::new(file)
            .with_context(|| format!("Failed to create zstd decoder for: {:?}", path))?;
        read_bars(BufReader::new(decoder))?
    } else {
        read_bars(BufReader::new(file))?
    };

    debug!("Loaded {} bars from {:?}", bars.len(), path);
    Ok(bars)
}

/// Smallest positive gap between consecutive bars, one minute when unknown
pub fn infer_bar_duration(bars: &[Bar]) -> Duration {
    bars.windows(2)
        .map(|w| w[1].timestamp - w[0].timestamp)
        .filter(|d| *d > Duration::zero())
        .min()
        .unwrap_or_else(|| Duration::minutes(1))
}

/// Four trade ticks inside the bar: open, then the extreme nearer the
/// close's opposite side, then the other extreme, then close.
pub fn synthetic_ticks(bar: &Bar, duration: Duration) -> Vec<Tick> {
    let start = bar.timestamp - duration;
    let step = duration / 4;
    let path = if bar.close >= bar.open {
        [bar.open, bar.low, bar.high, bar.close]
    } else {
        [bar.open, bar.high, bar.low, bar.close]
    };
    path.iter()
        .enumerate()
        .map(|(i, price)| Tick::trade(start + step * i as i32, *price))
        .collect()
}

/// Every tick followed by its bar close, for all bars
pub fn market_events(bars: &[Bar], duration: Duration) -> Vec<MarketEvent> {
    let mut events = Vec::with_capacity(bars.len() * 5);
    for bar in bars {
        events.extend(synthetic_ticks(bar, duration).into_iter().map(MarketEvent::Tick));
        events.push(MarketEvent::BarClose(bar.clone()));
    }
    events
}

/// Send every event; stops early when the receiver is gone
pub async fn stream_events(bars: Vec<Bar>, duration: Duration, tx: mpsc::Sender<MarketEvent>) -> Result<()> {
    for event in market_events(&bars, duration) {
        if tx.send(event).await.is_err() {
            debug!("Replay receiver dropped, stopping feed");
            break;
        }
    }
    Ok(())
}

/// What one event did
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventOutcome {
    Tick(TickOutcome),
    Bar(BarOutcome),
}

/// Feed one event to the simulated broker first, then to the engine
pub fn apply_event<I: IndicatorProvider>(
    engine: &mut StrategyEngine<SimulatedBroker, I>,
    event: &MarketEvent,
) -> EventOutcome {
    match event {
        MarketEvent::Tick(tick) => {
            engine.broker_mut().on_tick(tick);
            EventOutcome::Tick(engine.process_tick(tick))
        }
        MarketEvent::BarClose(bar) => {
            engine.broker_mut().on_bar(bar);
            EventOutcome::Bar(engine.process_bar_close(bar))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const CSV: &str = "time,open,high,low,close,volume,buy_volume,sell_volume
2025-03-03T14:32:00Z,4500.0,4502.0,4499.0,4501.5,1200,700,500
2025-03-03 14:31:00,4499.0,4500.5,4498.5,4500.0,900,,
";

    #[test]
    fn test_read_bars_sorts_and_reads_delta() {
        let bars = read_bars(CSV.as_bytes()).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].timestamp, Utc.with_ymd_and_hms(2025, 3, 3, 14, 31, 0).unwrap());
        assert_eq!(bars[0].delta(), None);
        assert_eq!(bars[1].delta(), Some(200));
        assert_eq!(infer_bar_duration(&bars), Duration::minutes(1));
    }

    #[test]
    fn test_zstd_file_round_trip() {
        let path = std::env::temp_dir().join(format!("bars-{}.csv.zst", uuid::Uuid::new_v4()));
        let compressed = zstd::encode_all(CSV.as_bytes(), 3).unwrap();
        std::fs::write(&path, compressed).unwrap();
        let bars = load_bars(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(bars.len(), 2);
    }

    #[test]
    fn test_synthetic_tick_path() {
        let bars = read_bars(CSV.as_bytes()).unwrap();
        let up = synthetic_ticks(&bars[1], Duration::minutes(1));
        let prices: Vec<f64> = up.iter().map(|t| t.price).collect();
        assert_eq!(prices, vec![4500.0, 4499.0, 4502.0, 4501.5]);
        assert!(up.iter().all(|t| t.timestamp < bars[1].timestamp));
        assert_eq!(up[0].timestamp, bars[0].timestamp);

        let events = market_events(&bars, Duration::minutes(1));
        assert_eq!(events.len(), 10);
        assert!(matches!(events[4], MarketEvent::BarClose(_)));
    }

    #[tokio::test]
    async fn test_stream_events_over_channel() {
        let bars = read_bars(CSV.as_bytes()).unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        let feed = tokio::spawn(stream_events(bars, Duration::minutes(1), tx));
        let mut count = 0;
        while rx.recv().await.is_some() {
            count += 1;
        }
        feed.await.unwrap().unwrap();
        assert_eq!(count, 10);
    }
}
