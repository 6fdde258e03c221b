//! Intrabar volatility: range relative to body

use serde::{Deserialize, Serialize};

use super::{or_neutral, pct_change};
use crate::config::IntrabarParams;
use crate::error::RegimeError;
use crate::indicators::mean;
use crate::types::Candle;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntrabarVolatility {
    pub determined: bool,
    pub current_avg: f64,
    pub previous_avg: f64,
    pub change_pct: f64,
    pub is_rising: bool,
}

fn range_to_body(candle: &Candle, min_body_fraction: f64) -> f64 {
    let range = candle.range();
    if range <= 0.0 {
        return 1.0;
    }
    range / candle.body().max(range * min_body_fraction)
}

pub fn intrabar_volatility(candles: &[Candle], params: &IntrabarParams) -> IntrabarVolatility {
    or_neutral("intrabar", try_intrabar(candles, params))
}

fn try_intrabar(candles: &[Candle], params: &IntrabarParams) -> Result<IntrabarVolatility, RegimeError> {
    let window = params.window.max(1);
    let required = window * 2;
    if candles.len() < required {
        return Err(RegimeError::insufficient("intrabar", required, candles.len()));
    }

    let ratios: Vec<f64> = candles[candles.len() - required..]
        .iter()
        .map(|c| range_to_body(c, params.min_body_fraction))
        .collect();

    let previous_avg = mean(&ratios[..window]).unwrap_or(0.0);
    let current_avg = mean(&ratios[window..]).unwrap_or(0.0);
    let change_pct = pct_change(previous_avg, current_avg);

    Ok(IntrabarVolatility {
        determined: true,
        current_avg,
        previous_avg,
        change_pct,
        is_rising: change_pct >= params.rising_threshold_pct,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn candle(i: i64, body: f64, range: f64) -> Candle {
        let open = 100.0;
        let close = open + body;
        let high = close.max(open) + (range - body.abs()) / 2.0;
        let low = close.min(open) - (range - body.abs()) / 2.0;
        Candle::new(Utc::now() + Duration::minutes(i), open, high, low, close, 1.0).unwrap()
    }

    #[test]
    fn test_rising_when_bodies_shrink() {
        let mut candles: Vec<Candle> = (0..5).map(|i| candle(i, 1.5, 2.0)).collect();
        candles.extend((5..10).map(|i| candle(i, 0.5, 2.0)));
        let result = intrabar_volatility(&candles, &IntrabarParams::default());
        assert!(result.determined);
        assert!(result.current_avg > result.previous_avg);
        assert!(result.is_rising);
    }

    #[test]
    fn test_steady_bars_not_rising() {
        let candles: Vec<Candle> = (0..10).map(|i| candle(i, 1.0, 2.0)).collect();
        let result = intrabar_volatility(&candles, &IntrabarParams::default());
        assert!(result.determined);
        assert!(!result.is_rising);
    }

    #[test]
    fn test_short_input_is_neutral() {
        let candles: Vec<Candle> = (0..4).map(|i| candle(i, 1.0, 2.0)).collect();
        assert_eq!(
            intrabar_volatility(&candles, &IntrabarParams::default()),
            IntrabarVolatility::default()
        );
    }
}
