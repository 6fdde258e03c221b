//! Volatility spike detection and resolution tracking

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::or_neutral;
use crate::config::SpikeParams;
use crate::error::RegimeError;
use crate::indicators::median;
use crate::tracking::VolatilitySpikeRecord;
use crate::types::{Symbol, Timeframe};

const MIN_BASELINE_SAMPLES: usize = 5;

pub struct SpikeInput<'a> {
    pub symbol: &'a Symbol,
    pub timeframe: Timeframe,
    pub current_atr: f64,
    /// Fast-ATR readings before the current one
    pub baseline: &'a [f64],
    pub last_true_range: f64,
    /// Spike still open from an earlier call, if any
    pub prior: Option<&'a VolatilitySpikeRecord>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolatilitySpike {
    pub determined: bool,
    /// Current ATR over the baseline median
    pub ratio: f64,
    pub baseline: f64,
    pub is_spike: bool,
    pub spike_start: Option<DateTime<Utc>>,
    pub age_minutes: f64,
    /// Young spike already retracing from its peak: a flare, not an expansion
    pub is_resolving: bool,
    /// Spike record to keep in the store; `None` clears it
    #[serde(skip)]
    pub record: Option<VolatilitySpikeRecord>,
}

pub fn volatility_spike(input: &SpikeInput<'_>, params: &SpikeParams) -> VolatilitySpike {
    or_neutral("volatility_spike", try_spike(input, params))
}

fn try_spike(input: &SpikeInput<'_>, params: &SpikeParams) -> Result<VolatilitySpike, RegimeError> {
    if input.baseline.len() < MIN_BASELINE_SAMPLES {
        return Err(RegimeError::insufficient(
            "volatility_spike",
            MIN_BASELINE_SAMPLES,
            input.baseline.len(),
        ));
    }
    if !input.current_atr.is_finite() || input.current_atr <= 0.0 {
        return Err(RegimeError::MalformedInput(format!(
            "current ATR {} not positive",
            input.current_atr
        )));
    }

    let baseline = median(input.baseline).unwrap_or(0.0);
    if baseline <= 0.0 {
        return Err(RegimeError::MalformedInput("ATR baseline is zero".to_string()));
    }

    let ratio = input.current_atr / baseline;
    if ratio < params.threshold_ratio {
        return Ok(VolatilitySpike {
            determined: true,
            ratio,
            baseline,
            ..VolatilitySpike::default()
        });
    }

    let record = match input.prior {
        Some(prior) => VolatilitySpikeRecord {
            peak_atr: prior.peak_atr.max(input.current_atr),
            ..prior.clone()
        },
        None => VolatilitySpikeRecord {
            symbol: input.symbol.clone(),
            timeframe: input.timeframe,
            spike_start: input.now,
            spike_atr: input.current_atr,
            peak_atr: input.current_atr,
        },
    };

    let age_minutes = (input.now - record.spike_start).num_seconds().max(0) as f64 / 60.0;
    let retraced = input.current_atr < record.peak_atr * (1.0 - params.resolve_retrace_pct / 100.0);
    let cooling_bar = input.last_true_range < input.current_atr;
    let is_resolving = age_minutes <= params.max_flare_minutes as f64 && (retraced || cooling_bar);

    Ok(VolatilitySpike {
        determined: true,
        ratio,
        baseline,
        is_spike: true,
        spike_start: Some(record.spike_start),
        age_minutes,
        is_resolving,
        record: Some(record),
    })
}
