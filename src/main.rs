//! Regime engine - diagnostic entry point
//!
//! This binary provides two subcommands:
//! - classify: Classify the volatility regime of a symbol from CSV candles
//! - breakouts: List (and optionally expire) breakouts in the ledger

use anyhow::Result;
use clap::{Parser, Subcommand};
use regime_engine::Timeframe;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "regime-engine")]
#[command(about = "Multi-timeframe volatility regime classification", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write logs (without colours) to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify the current regime from per-timeframe CSV files
    Classify {
        /// Instrument symbol, e.g. EURUSD
        #[arg(short, long)]
        symbol: String,

        /// Timeframe and CSV path, repeatable. E.g. --data 15m=eurusd_m15.csv
        #[arg(short, long = "data", value_parser = parse_data_arg, required = true)]
        data: Vec<(Timeframe, PathBuf)>,

        /// Path to JSON configuration (defaults, then REGIME_CONFIG)
        #[arg(short, long)]
        config: Option<String>,

        /// SQLite breakout ledger (overrides config and REGIME_LEDGER_PATH)
        #[arg(long)]
        ledger: Option<PathBuf>,

        /// Evaluation time, RFC 3339 (defaults to the newest candle)
        #[arg(long)]
        now: Option<String>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,

        /// Include strategy guidance for the regime
        #[arg(long)]
        guidance: bool,
    },

    /// List breakout events recorded in the ledger
    Breakouts {
        /// Path to JSON configuration
        #[arg(short, long)]
        config: Option<String>,

        /// SQLite breakout ledger
        #[arg(long)]
        ledger: Option<PathBuf>,

        /// Start of the range, RFC 3339 (default: 7 days ago)
        #[arg(long)]
        since: Option<String>,

        /// End of the range, RFC 3339 (default: now)
        #[arg(long)]
        until: Option<String>,

        /// Deactivate breakouts older than the configured expiry first
        #[arg(long)]
        expire: bool,
    },
}

fn parse_data_arg(s: &str) -> Result<(Timeframe, PathBuf), String> {
    let (tf, path) = s
        .split_once('=')
        .ok_or_else(|| format!("expected TIMEFRAME=PATH, got {}", s))?;
    Ok((tf.parse()?, PathBuf::from(path)))
}

fn setup_logging(verbose: bool, log_file: Option<&PathBuf>) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Console layer
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);

    // File layer - same format but without ANSI colors
    let file_layer = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            std::fs::create_dir_all(&dir)?;
            let file_name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("Invalid log file path: {}", path.display()))?;
            let appender = tracing_appender::rolling::never(dir, file_name);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(appender)
                    .with_target(true)
                    .with_line_number(true)
                    .with_file(true)
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if let Some(path) = log_file {
        info!("Log file: {}", path.display());
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.log_file.as_ref())?;

    match cli.command {
        Commands::Classify {
            symbol,
            data,
            config,
            ledger,
            now,
            json,
            guidance,
        } => commands::classify::run(symbol, data, config, ledger, now, json, guidance),

        Commands::Breakouts {
            config,
            ledger,
            since,
            until,
            expire,
        } => commands::breakouts::run(config, ledger, since, until, expire),
    }
}
