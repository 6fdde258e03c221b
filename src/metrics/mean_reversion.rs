//! Mean-reversion oscillation around VWAP or EMA

use serde::{Deserialize, Serialize};

use super::or_neutral;
use crate::config::MeanReversionParams;
use crate::error::RegimeError;
use crate::indicators::{ema, vwap};
use crate::normalize::CandleSeries;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceLine {
    #[default]
    Vwap,
    Ema,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeanReversion {
    pub determined: bool,
    pub crossings: usize,
    pub reference: ReferenceLine,
    pub is_oscillating: bool,
}

pub fn mean_reversion(series: &CandleSeries, params: &MeanReversionParams) -> MeanReversion {
    or_neutral("mean_reversion", try_mean_reversion(series, params))
}

fn try_mean_reversion(
    series: &CandleSeries,
    params: &MeanReversionParams,
) -> Result<MeanReversion, RegimeError> {
    let window = params.window.max(2);
    if series.len() < window {
        return Err(RegimeError::insufficient("mean_reversion", window, series.len()));
    }

    let recent = series.tail(window);
    let has_volume = recent.iter().any(|c| c.volume > 0.0);

    let (reference, line): (ReferenceLine, Vec<f64>) = if params.prefer_vwap && has_volume {
        let highs: Vec<f64> = recent.iter().map(|c| c.high).collect();
        let lows: Vec<f64> = recent.iter().map(|c| c.low).collect();
        let closes: Vec<f64> = recent.iter().map(|c| c.close).collect();
        let volumes: Vec<f64> = recent.iter().map(|c| c.volume).collect();
        (ReferenceLine::Vwap, vwap(&highs, &lows, &closes, &volumes))
    } else {
        let full = ema(&series.closes(), params.ema_period);
        let line: Option<Vec<f64>> = full[full.len().saturating_sub(window)..].iter().copied().collect();
        let line = line.ok_or_else(|| {
            RegimeError::insufficient("mean_reversion", params.ema_period + window - 1, series.len())
        })?;
        (ReferenceLine::Ema, line)
    };

    let sides: Vec<bool> = recent
        .iter()
        .zip(&line)
        .map(|(c, r)| c.close - r)
        .filter(|d| *d != 0.0)
        .map(|d| d > 0.0)
        .collect();
    let crossings = sides.windows(2).filter(|w| w[0] != w[1]).count();

    Ok(MeanReversion {
        determined: true,
        crossings,
        reference,
        is_oscillating: crossings >= params.min_crossings,
    })
}
