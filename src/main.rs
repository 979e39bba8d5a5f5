use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use vd_futures_engine::config::StrategyConfig;
use vd_futures_engine::execution::SimulatedBroker;
use vd_futures_engine::replay::{self, MarketEvent};
use vd_futures_engine::trading_core::{RollingIndicators, StrategyEngine};

#[derive(Parser, Debug)]
#[command(name = "vd-replay")]
#[command(about = "Replay closed bars through the volume-delta decision engine")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Print verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Preset {
    Es,
    Nq,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a bar file (.csv or .csv.zst) through the engine
    Replay {
        /// Bar file: time,open,high,low,close,volume,buy_volume,sell_volume
        #[arg(short, long)]
        bars: PathBuf,

        /// JSON strategy config (missing fields use preset defaults)
        #[arg(short, long, env = "VD_CONFIG")]
        config: Option<PathBuf>,

        /// Instrument defaults when no config file is given
        #[arg(short, long, value_enum, default_value = "es")]
        preset: Preset,

        /// Override the traded symbol
        #[arg(short, long)]
        symbol: Option<String>,

        /// Seed the slippage RNG for a reproducible run
        #[arg(long, env = "VD_SLIPPAGE_SEED")]
        seed: Option<u64>,

        /// Starting account balance
        #[arg(long, default_value = "50000")]
        balance: f64,

        /// Write the JSON summary here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the effective config as JSON and report problems
    Config {
        #[arg(short, long, env = "VD_CONFIG")]
        config: Option<PathBuf>,

        #[arg(short, long, value_enum, default_value = "es")]
        preset: Preset,
    },
}

fn load_config(path: Option<&Path>, preset: Preset) -> Result<StrategyConfig> {
    let Some(path) = path else {
        return Ok(match preset {
            Preset::Es => StrategyConfig::es(),
            Preset::Nq => StrategyConfig::nq(),
        });
    };
    let json = std::fs::read_to_string(path).with_context(|| format!("Failed to read config: {:?}", path))?;
    serde_json::from_str(&json).with_context(|| format!("Failed to parse config: {:?}", path))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("vd_futures_engine={}", default_level).parse()?)
                .add_directive(format!("vd_replay={}", default_level).parse()?),
        )
        .init();

    match args.command {
        Commands::Replay {
            bars,
            config,
            preset,
            symbol,
            seed,
            balance,
            output,
        } => {
            let mut config = load_config(config.as_deref(), preset)?;
            if let Some(symbol) = symbol {
                config.instrument.symbol = symbol;
            }
            if seed.is_some() {
                config.positions.slippage_seed = seed;
            }
            run_replay(config, &bars, balance, output.as_deref()).await?;
        }
        Commands::Config { config, preset } => {
            let config = load_config(config.as_deref(), preset)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            let errors = config.validate();
            for e in &errors {
                error!("CONFIG: {}", e);
            }
            if !errors.is_empty() {
                bail!("{} configuration problem(s)", errors.len());
            }
        }
    }

    Ok(())
}

async fn run_replay(config: StrategyConfig, path: &Path, balance: f64, output: Option<&Path>) -> Result<()> {
    let bars = replay::load_bars(path)?;
    if bars.is_empty() {
        bail!("No bars in {:?}", path);
    }
    let duration = replay::infer_bar_duration(&bars);
    info!(
        "Replaying {} bars ({} -> {}), {} min bars",
        bars.len(),
        bars[0].timestamp,
        bars[bars.len() - 1].timestamp,
        duration.num_minutes()
    );

    let broker = SimulatedBroker::new(&config.instrument.symbol, balance, config.instrument.point_value);
    let mut engine = StrategyEngine::new(config, broker, RollingIndicators::default());
    if !engine.is_enabled() {
        bail!("Strategy config invalid: {} problem(s)", engine.config_errors().len());
    }

    let (tx, mut rx) = mpsc::channel::<MarketEvent>(1024);
    let feed = tokio::spawn(replay::stream_events(bars, duration, tx));

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                replay::apply_event(&mut engine, &event);
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, shutting down");
                break;
            }
        }
    }
    drop(rx);
    if let Err(e) = feed.await {
        warn!("Replay feed task failed: {}", e);
    }

    engine.shutdown();
    info!("{}", engine.position_status());
    info!("{}", engine.daily_risk_summary());
    info!("{}", engine.broker().stats_summary());

    let summary = serde_json::to_string_pretty(&engine.summary())?;
    match output {
        Some(path) => {
            std::fs::write(path, &summary).with_context(|| format!("Failed to write summary: {:?}", path))?;
            info!("Summary written to {:?}", path);
        }
        None => println!("{}", summary),
    }
    Ok(())
}
