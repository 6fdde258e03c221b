//! Subcommand implementations

pub mod breakouts;
pub mod classify;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regime_engine::RegimeConfig;
use std::path::PathBuf;
use tracing::info;

/// Config from `--config`, else `.env` / `REGIME_CONFIG`, with `--ledger` applied last
pub fn load_config(config_path: Option<String>, ledger: Option<PathBuf>) -> Result<RegimeConfig> {
    let mut config = match config_path {
        Some(path) => {
            let config = RegimeConfig::from_file(&path)?;
            info!("Loaded configuration from: {}", path);
            config
        }
        None => RegimeConfig::from_env_or_default()?,
    };

    if let Some(ledger) = ledger {
        info!("Using breakout ledger: {}", ledger.display());
        config.tracking.ledger_path = Some(ledger);
    }

    Ok(config)
}

pub fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid RFC 3339 time: {}", value))
}
