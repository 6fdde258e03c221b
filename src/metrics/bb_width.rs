//! Bollinger Band width trend and percentile

use serde::{Deserialize, Serialize};

use super::or_neutral;
use crate::config::BollingerParams;
use crate::error::RegimeError;
use crate::indicators::{band_width, bollinger_bands, linear_slope, percentile_rank};
use crate::normalize::CandleSeries;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BbWidthTrend {
    pub determined: bool,
    /// (upper - lower) / middle of the newest bar
    pub current_width: f64,
    pub slope: f64,
    /// Rank of the current width within the lookback window, 0-100
    pub percentile: f64,
    pub is_narrow: bool,
}

/// Uses precomputed band columns when the caller supplied them
pub fn bb_width_trend(series: &CandleSeries, params: &BollingerParams) -> BbWidthTrend {
    or_neutral("bb_width", try_bb_width(series, params))
}

fn widths(series: &CandleSeries, params: &BollingerParams) -> Vec<f64> {
    let cols = series.indicators();
    if let (Some(upper), Some(middle), Some(lower)) = (
        series.aligned_column(&cols.bb_upper),
        series.aligned_column(&cols.bb_middle),
        series.aligned_column(&cols.bb_lower),
    ) {
        let wrap = |v: &[f64]| v.iter().map(|x| Some(*x)).collect::<Vec<_>>();
        return band_width(&wrap(upper), &wrap(middle), &wrap(lower));
    }

    let (upper, middle, lower) = bollinger_bands(&series.closes(), params.period, params.num_std);
    band_width(&upper, &middle, &lower)
}

fn try_bb_width(series: &CandleSeries, params: &BollingerParams) -> Result<BbWidthTrend, RegimeError> {
    let widths = widths(series, params);
    let required = params.min_widths.max(2);
    if widths.len() < required {
        return Err(RegimeError::insufficient("bb_width", required, widths.len()));
    }

    let window = &widths[widths.len().saturating_sub(params.percentile_lookback.max(1))..];
    let current_width = window[window.len() - 1];
    let percentile = percentile_rank(window, current_width)
        .ok_or_else(|| RegimeError::insufficient("bb_width", 1, 0))?;
    let slope = linear_slope(window).unwrap_or(0.0);

    Ok(BbWidthTrend {
        determined: true,
        current_width,
        slope,
        percentile,
        is_narrow: percentile < params.narrow_percentile,
    })
}
