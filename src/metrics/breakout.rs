//! Structural breakout detection
//!
//! Range variant: the last `confirm_bars` closes all sit beyond the prior
//! `range_lookback`-bar high/low by at least `atr_multiple * ATR`. The signal
//! is timestamped at the first confirming bar, so repeated calls over the same
//! break report the same event.
//! Volume variant: the last bar's volume spikes against the range average
//! while the bar before did not, and the close is beyond the range.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::or_neutral;
use crate::config::BreakoutParams;
use crate::error::RegimeError;
use crate::indicators::mean;
use crate::tracking::BreakType;
use crate::types::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakoutMethod {
    Range,
    Volume,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BreakoutSignal {
    pub determined: bool,
    pub detected: bool,
    pub break_type: Option<BreakType>,
    pub method: Option<BreakoutMethod>,
    /// Range boundary that was broken
    pub level: f64,
    pub price: f64,
    /// Bar on which the break first closed beyond the range
    pub timestamp: Option<DateTime<Utc>>,
}

pub fn detect_breakout(candles: &[Candle], atr: Option<f64>, params: &BreakoutParams) -> BreakoutSignal {
    or_neutral("breakout", try_detect(candles, atr, params))
}

fn try_detect(
    candles: &[Candle],
    atr: Option<f64>,
    params: &BreakoutParams,
) -> Result<BreakoutSignal, RegimeError> {
    let confirm = params.confirm_bars.max(1);
    let lookback = params.range_lookback.max(1);
    let required = lookback + confirm;
    if candles.len() < required {
        return Err(RegimeError::insufficient("breakout", required, candles.len()));
    }
    let atr = atr
        .filter(|a| a.is_finite() && *a >= 0.0)
        .ok_or_else(|| RegimeError::insufficient("breakout", 1, 0))?;

    let n = candles.len();
    let confirm_bars = &candles[n - confirm..];
    let range = &candles[n - confirm - lookback..n - confirm];
    let range_high = range.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let range_low = range.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    let margin = params.atr_multiple * atr;

    let last = &candles[n - 1];
    let first_confirm = &confirm_bars[0];

    if confirm_bars.iter().all(|c| c.close > range_high + margin) {
        return Ok(signal(BreakType::Bullish, BreakoutMethod::Range, range_high, last, first_confirm));
    }
    if confirm_bars.iter().all(|c| c.close < range_low - margin) {
        return Ok(signal(BreakType::Bearish, BreakoutMethod::Range, range_low, last, first_confirm));
    }

    if params.volume_variant && n > lookback + 1 {
        let vol_range = &candles[n - 1 - lookback..n - 1];
        let volumes: Vec<f64> = vol_range.iter().map(|c| c.volume).collect();
        let avg_volume = mean(&volumes).unwrap_or(0.0);
        let prior = &candles[n - 2];

        if avg_volume > 0.0
            && last.volume >= params.volume_multiple * avg_volume
            && prior.volume < params.volume_multiple * avg_volume
        {
            let high = vol_range.iter().map(|c| c.high).fold(f64::MIN, f64::max);
            let low = vol_range.iter().map(|c| c.low).fold(f64::MAX, f64::min);
            if last.close > high {
                return Ok(signal(BreakType::Bullish, BreakoutMethod::Volume, high, last, last));
            }
            if last.close < low {
                return Ok(signal(BreakType::Bearish, BreakoutMethod::Volume, low, last, last));
            }
        }
    }

    Ok(BreakoutSignal {
        determined: true,
        ..BreakoutSignal::default()
    })
}

fn signal(
    break_type: BreakType,
    method: BreakoutMethod,
    level: f64,
    last: &Candle,
    first: &Candle,
) -> BreakoutSignal {
    BreakoutSignal {
        determined: true,
        detected: true,
        break_type: Some(break_type),
        method: Some(method),
        level,
        price: last.close,
        timestamp: Some(first.datetime),
    }
}
