//! ATR trend: slope of recent fast-ATR values and position against baseline

use serde::{Deserialize, Serialize};

use super::or_neutral;
use crate::config::AtrParams;
use crate::error::RegimeError;
use crate::indicators::{linear_slope, mean, median};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AtrTrend {
    pub determined: bool,
    pub current: f64,
    /// Fitted change across the trend window as a percentage of its mean
    pub slope_pct: f64,
    /// Median of the baseline window
    pub baseline: f64,
    pub is_declining: bool,
    pub is_above_baseline: bool,
}

/// Evaluate the trend of `fast_atr` (oldest first, newest last)
pub fn atr_trend(fast_atr: &[f64], params: &AtrParams) -> AtrTrend {
    or_neutral("atr_trend", try_atr_trend(fast_atr, params))
}

fn try_atr_trend(fast_atr: &[f64], params: &AtrParams) -> Result<AtrTrend, RegimeError> {
    let required = params.min_samples.max(2);
    if fast_atr.len() < required {
        return Err(RegimeError::insufficient("atr_trend", required, fast_atr.len()));
    }
    if fast_atr.iter().any(|v| !v.is_finite()) {
        return Err(RegimeError::MalformedInput("non-finite ATR value".to_string()));
    }

    let trend = &fast_atr[fast_atr.len().saturating_sub(params.trend_window.max(2))..];
    let baseline_values = &fast_atr[fast_atr.len().saturating_sub(params.baseline_window.max(1))..];

    let current = *fast_atr
        .last()
        .ok_or_else(|| RegimeError::insufficient("atr_trend", required, 0))?;
    let slope = linear_slope(trend)
        .ok_or_else(|| RegimeError::insufficient("atr_trend", 2, trend.len()))?;
    let window_mean = mean(trend).unwrap_or(0.0);
    let baseline = median(baseline_values).unwrap_or(0.0);

    let slope_pct = if window_mean > 0.0 {
        slope * (trend.len() - 1) as f64 / window_mean * 100.0
    } else {
        0.0
    };

    Ok(AtrTrend {
        determined: true,
        current,
        slope_pct,
        baseline,
        is_declining: slope_pct <= params.declining_slope_pct,
        is_above_baseline: baseline > 0.0 && current > baseline * params.above_baseline_multiple,
    })
}
