//! Technical indicators and rolling statistics
//!
//! Moving averages and Bollinger Bands are driven by the `ta` crate; ATR and
//! ADX use Wilder's smoothing, which `ta` does not expose. Order statistics
//! come from `statrs`.
//!
//! Every function returns an empty vector (or `None`) for empty input or a
//! zero period rather than panicking: short data is "undetermined", not an
//! error.

use statrs::statistics::{Data, Median, Statistics};
use ta::indicators::{BollingerBands as TaBB, ExponentialMovingAverage};
use ta::Next;

/// Type alias for band indicators (upper, middle, lower)
pub type BandOutput = (Vec<Option<f64>>, Vec<Option<f64>>, Vec<Option<f64>>);

/// Type alias for two-line indicators (line1, line2)
pub type DualLineOutput = (Vec<Option<f64>>, Vec<Option<f64>>);

// =============================================================================
// Moving Averages
// =============================================================================

/// Calculate Exponential Moving Average
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut indicator = match ExponentialMovingAverage::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let ema_val = indicator.next(value);
            (i + 1 >= period).then_some(ema_val)
        })
        .collect()
}

// =============================================================================
// Volatility Indicators
// =============================================================================

/// Calculate True Range
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let n = high.len().min(low.len()).min(close.len());
    let mut tr = Vec::with_capacity(n);

    for i in 0..n {
        let tr_value = if i == 0 {
            high[i] - low[i]
        } else {
            let hl = high[i] - low[i];
            let hc = (high[i] - close[i - 1]).abs();
            let lc = (low[i] - close[i - 1]).abs();
            hl.max(hc).max(lc)
        };
        tr.push(tr_value);
    }

    tr
}

/// Calculate Average True Range (ATR) using Wilder's smoothing
///
/// ATR = (prev_ATR * (period - 1) + current_TR) / period, seeded with the
/// SMA of the first `period` true ranges.
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<Option<f64>> {
    if high.is_empty() || period == 0 || high.len() != low.len() || high.len() != close.len() {
        return vec![];
    }

    let tr = true_range(high, low, close);
    wilders_smooth(&tr, period)
}

/// Calculate Bollinger Bands using ta crate
pub fn bollinger_bands(values: &[f64], period: usize, num_std: f64) -> BandOutput {
    if values.is_empty() || period == 0 {
        return (vec![], vec![], vec![]);
    }

    let mut indicator = match TaBB::new(period, num_std) {
        Ok(i) => i,
        Err(_) => {
            return (
                vec![None; values.len()],
                vec![None; values.len()],
                vec![None; values.len()],
            )
        }
    };

    let mut upper = Vec::with_capacity(values.len());
    let mut middle = Vec::with_capacity(values.len());
    let mut lower = Vec::with_capacity(values.len());

    for (i, &value) in values.iter().enumerate() {
        let bb = indicator.next(value);
        if i + 1 >= period {
            upper.push(Some(bb.upper));
            middle.push(Some(bb.average));
            lower.push(Some(bb.lower));
        } else {
            upper.push(None);
            middle.push(None);
            lower.push(None);
        }
    }

    (upper, middle, lower)
}

/// Normalized band width: (upper - lower) / middle
pub fn band_width(upper: &[Option<f64>], middle: &[Option<f64>], lower: &[Option<f64>]) -> Vec<f64> {
    upper
        .iter()
        .zip(middle)
        .zip(lower)
        .filter_map(|((u, m), l)| match (u, m, l) {
            (Some(u), Some(m), Some(l)) if *m > 0.0 => Some((u - l) / m),
            _ => None,
        })
        .collect()
}

// =============================================================================
// Trend Strength
// =============================================================================

/// Apply Wilder's smoothing to a series
fn wilders_smooth(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut result = Vec::with_capacity(values.len());
    let mut smoothed: Option<f64> = None;

    for i in 0..values.len() {
        if i + 1 < period {
            result.push(None);
        } else if i + 1 == period {
            let sum: f64 = values[0..period].iter().sum();
            smoothed = Some(sum / period as f64);
            result.push(smoothed);
        } else if let Some(prev) = smoothed {
            let new_val = (prev * (period - 1) as f64 + values[i]) / period as f64;
            smoothed = Some(new_val);
            result.push(smoothed);
        } else {
            result.push(None);
        }
    }

    result
}

/// Calculate Directional Movement Index (DMI) components using Wilder's smoothing
/// Returns (+DI, -DI)
pub fn dmi(high: &[f64], low: &[f64], close: &[f64], period: usize) -> DualLineOutput {
    if high.is_empty() || period == 0 || high.len() != low.len() || high.len() != close.len() {
        return (vec![], vec![]);
    }

    let mut plus_dm = vec![0.0; high.len()];
    let mut minus_dm = vec![0.0; high.len()];

    for i in 1..high.len() {
        let up_move = high[i] - high[i - 1];
        let down_move = low[i - 1] - low[i];

        if up_move > down_move && up_move > 0.0 {
            plus_dm[i] = up_move;
        }
        if down_move > up_move && down_move > 0.0 {
            minus_dm[i] = down_move;
        }
    }

    let smoothed_plus_dm = wilders_smooth(&plus_dm, period);
    let smoothed_minus_dm = wilders_smooth(&minus_dm, period);
    let atr_values = atr(high, low, close, period);

    let mut plus_di = Vec::with_capacity(high.len());
    let mut minus_di = Vec::with_capacity(high.len());

    for i in 0..high.len() {
        match (
            smoothed_plus_dm.get(i),
            smoothed_minus_dm.get(i),
            atr_values.get(i),
        ) {
            (Some(Some(pdm)), Some(Some(mdm)), Some(Some(atr_val))) if *atr_val > 0.0 => {
                plus_di.push(Some(pdm / atr_val * 100.0));
                minus_di.push(Some(mdm / atr_val * 100.0));
            }
            _ => {
                plus_di.push(None);
                minus_di.push(None);
            }
        }
    }

    (plus_di, minus_di)
}

/// Calculate Average Directional Index (ADX) using Wilder's smoothing
///
/// First value appears at bar `2 * period - 2`.
pub fn adx(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<Option<f64>> {
    let (plus_di, minus_di) = dmi(high, low, close, period);
    if plus_di.is_empty() {
        return vec![];
    }

    let di_start = period - 1;
    let mut result = vec![None; high.len()];

    let dx_values: Vec<f64> = (di_start..high.len())
        .map(|i| match (plus_di[i], minus_di[i]) {
            (Some(pdi), Some(mdi)) if pdi + mdi > 0.0 => (pdi - mdi).abs() / (pdi + mdi) * 100.0,
            _ => 0.0,
        })
        .collect();

    for (j, value) in wilders_smooth(&dx_values, period).into_iter().enumerate() {
        result[di_start + j] = value;
    }

    result
}

// =============================================================================
// Volume Indicators
// =============================================================================

/// Calculate Volume Weighted Average Price (VWAP), cumulative over the slice
pub fn vwap(high: &[f64], low: &[f64], close: &[f64], volume: &[f64]) -> Vec<f64> {
    let n = high.len().min(low.len()).min(close.len()).min(volume.len());
    let mut cumulative_tp_vol = 0.0;
    let mut cumulative_vol = 0.0;
    let mut result = Vec::with_capacity(n);

    for i in 0..n {
        let typical_price = (high[i] + low[i] + close[i]) / 3.0;
        cumulative_tp_vol += typical_price * volume[i];
        cumulative_vol += volume[i];

        if cumulative_vol > 0.0 {
            result.push(cumulative_tp_vol / cumulative_vol);
        } else {
            result.push(close[i]);
        }
    }

    result
}

// =============================================================================
// Rolling Statistics
// =============================================================================

/// Least-squares slope of `values` against their index
pub fn linear_slope(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }

    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = values.iter().mean();

    let (num, den) = values
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (i, &y)| {
            let dx = i as f64 - x_mean;
            (num + dx * (y - y_mean), den + dx * dx)
        });

    (den > 0.0).then(|| num / den)
}

/// Median of the values, `None` when empty
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(Data::new(values.to_vec()).median())
}

/// Sample variance, `None` for fewer than two values
pub fn variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let v = values.iter().variance();
    v.is_finite().then_some(v)
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().mean())
}

/// Percentile rank (0-100) of `value` within `window`: share of values strictly below it
pub fn percentile_rank(window: &[f64], value: f64) -> Option<f64> {
    if window.is_empty() {
        return None;
    }
    let below = window.iter().filter(|&&v| v < value).count();
    Some(below as f64 / window.len() as f64 * 100.0)
}

/// Most recent defined value of an indicator series
pub fn last_value(series: &[Option<f64>]) -> Option<f64> {
    series.iter().rev().find_map(|v| *v)
}

// =============================================================================
// Tests
// =============================================================================
