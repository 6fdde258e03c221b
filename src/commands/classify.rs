//! Classify command implementation

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regime_engine::{load_csv, RegimeClassifier, StrategyMapper, Symbol, Timeframe};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info};

use super::{load_config, parse_time};

pub fn run(
    symbol: String,
    data: Vec<(Timeframe, PathBuf)>,
    config_path: Option<String>,
    ledger: Option<PathBuf>,
    now: Option<String>,
    json: bool,
    guidance: bool,
) -> Result<()> {
    let config = load_config(config_path, ledger)?;
    let classifier =
        RegimeClassifier::from_config(config).context("Failed to initialise classifier")?;
    let symbol = Symbol::new(symbol.trim().to_uppercase());

    let mut series = HashMap::new();
    for (tf, path) in data {
        let loaded = load_csv(&path)?;
        info!("Loaded {} {} candles from {}", loaded.len(), tf, path.display());
        series.insert(tf, loaded);
    }

    let now: DateTime<Utc> = match now {
        Some(value) => parse_time(&value)?,
        None => series
            .values()
            .filter_map(|s| s.last().map(|c| c.datetime))
            .max()
            .unwrap_or_else(Utc::now),
    };
    debug!("Evaluating at {}", now);

    let result = classifier.classify(&symbol, &series, now);
    let strategy = guidance.then(|| {
        StrategyMapper::new().map_regime(
            result.regime,
            &result.signals.session.active_sessions,
            Some(&symbol),
        )
    });

    if json {
        let output = serde_json::json!({
            "result": result,
            "guidance": strategy,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("\n{}", "=".repeat(60));
    println!("REGIME: {} {}", symbol, result.regime);
    println!("{}", "=".repeat(60));
    println!("Confidence:         {}", result.confidence);
    println!("Basic regime:       {}", result.basic_regime);
    println!("Reasoning:          {}", result.reasoning);
    let composite = result.composite();
    println!("ATR ratio:          {}", fmt_opt(composite.atr_ratio, 3));
    println!("BB width pct:       {}", fmt_opt(composite.bb_percentile, 0));
    println!("ADX:                {}", fmt_opt(composite.adx, 1));
    println!("Coverage:           {:.0}%", composite.coverage * 100.0);

    for (tf, metrics) in &result.timeframes {
        println!(
            "  {:>4}  bars={:<4} atr_ratio={:<7} slope={:+.1}%  wick={:+.0}%  reversals={}  spike={}",
            tf,
            metrics.bars,
            fmt_opt(metrics.atr_ratio, 3),
            metrics.atr_trend.slope_pct,
            metrics.wick.change_pct,
            metrics.whipsaw.reversals,
            metrics.spike.is_spike
        );
    }

    if let Some(g) = strategy {
        println!("{}", "-".repeat(60));
        println!("Prioritize:         {}", g.prioritize.join(", "));
        println!("Avoid:              {}", g.avoid.join(", "));
        println!("Confidence adj:     {:+}", g.confidence_adjustment);
        if g.block_trading {
            println!("TRADING BLOCKED until the regime clears");
        }
        for note in &g.notes {
            println!("Note:               {}", note);
        }
    }
    println!("{}", "=".repeat(60));

    Ok(())
}

fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{:.*}", precision, v))
}
