//! Breakouts command implementation

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use itertools::Itertools;
use regime_engine::TrackingStore;
use std::path::PathBuf;
use tracing::{info, warn};

use super::{load_config, parse_time};

pub fn run(
    config_path: Option<String>,
    ledger: Option<PathBuf>,
    since: Option<String>,
    until: Option<String>,
    expire: bool,
) -> Result<()> {
    let config = load_config(config_path, ledger)?;
    if config.tracking.ledger_path.is_none() {
        warn!("No ledger configured; the in-memory ledger is always empty");
    }
    let store =
        TrackingStore::from_config(config.tracking).context("Failed to open breakout ledger")?;

    let now = Utc::now();
    if expire {
        let expired = store.expire_breakouts(now)?;
        info!("Expired {} breakouts", expired);
    }

    let until = until.as_deref().map(parse_time).transpose()?.unwrap_or(now);
    let since = since
        .as_deref()
        .map(parse_time)
        .transpose()?
        .unwrap_or(until - Duration::days(7));

    let events = store.breakouts_between(since, until)?;

    println!("\n{}", "=".repeat(60));
    println!("BREAKOUTS {} .. {}", since.format("%Y-%m-%d %H:%M"), until.format("%Y-%m-%d %H:%M"));
    println!("{}", "=".repeat(60));

    let by_symbol = events
        .iter()
        .sorted_by(|a, b| a.symbol.cmp(&b.symbol).then(a.timestamp.cmp(&b.timestamp)))
        .chunk_by(|e| e.symbol.clone());
    for (symbol, group) in &by_symbol {
        println!("{}", symbol);
        for event in group {
            println!(
                "  #{:<5} {:>4} {:<8} {:>12.5} {}  {}",
                event.id,
                event.timeframe,
                event.break_type,
                event.price,
                event.timestamp.format("%Y-%m-%d %H:%M"),
                if event.is_active { "active" } else { "inactive" }
            );
        }
    }
    println!("{}", "-".repeat(60));
    println!("Total: {}", events.len());

    Ok(())
}
