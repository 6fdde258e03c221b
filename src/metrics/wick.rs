//! Wick-to-body ratio variance

use serde::{Deserialize, Serialize};

use super::{or_neutral, pct_change};
use crate::config::WickParams;
use crate::error::RegimeError;
use crate::indicators::variance;
use crate::types::Candle;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WickVariance {
    pub determined: bool,
    pub latest_ratio: f64,
    pub current_variance: f64,
    pub previous_variance: f64,
    pub change_pct: f64,
    pub is_increasing: bool,
}

/// Combined wick length over body, with the body floored at a fraction of the range
pub fn wick_ratio(candle: &Candle, min_body_fraction: f64) -> f64 {
    let range = candle.range();
    if range <= 0.0 {
        return 0.0;
    }
    let body = candle.body().max(range * min_body_fraction);
    (range - candle.body()) / body
}

pub fn wick_ratios(candles: &[Candle], min_body_fraction: f64) -> Vec<f64> {
    candles
        .iter()
        .map(|c| wick_ratio(c, min_body_fraction))
        .collect()
}

/// Compare the variance of the latest `window` ratios against the window before it
pub fn wick_variance(ratios: &[f64], params: &WickParams) -> WickVariance {
    or_neutral("wick_variance", try_wick_variance(ratios, params))
}

fn try_wick_variance(ratios: &[f64], params: &WickParams) -> Result<WickVariance, RegimeError> {
    let window = params.window.max(2);
    let required = window * 2;
    if ratios.len() < required {
        return Err(RegimeError::insufficient("wick_variance", required, ratios.len()));
    }

    let n = ratios.len();
    let current = &ratios[n - window..];
    let previous = &ratios[n - required..n - window];

    let current_variance = variance(current)
        .ok_or_else(|| RegimeError::MalformedInput("wick variance not finite".to_string()))?;
    let previous_variance = variance(previous)
        .ok_or_else(|| RegimeError::MalformedInput("wick variance not finite".to_string()))?;
    let change_pct = pct_change(previous_variance, current_variance);

    Ok(WickVariance {
        determined: true,
        latest_ratio: current[window - 1],
        current_variance,
        previous_variance,
        change_pct,
        is_increasing: change_pct >= params.increase_threshold_pct,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::Utc;

    #[test]
    fn test_wick_ratio() {
        let c = Candle::new(Utc::now(), 100.0, 104.0, 96.0, 102.0, 0.0).unwrap();
        // range 8, body 2, wicks 6
        assert_relative_eq!(wick_ratio(&c, 0.1), 3.0);

        let doji = Candle::new(Utc::now(), 100.0, 104.0, 96.0, 100.0, 0.0).unwrap();
        // body floored to 0.8
        assert_relative_eq!(wick_ratio(&doji, 0.1), 10.0);

        let flat = Candle::new(Utc::now(), 100.0, 100.0, 100.0, 100.0, 0.0).unwrap();
        assert_eq!(wick_ratio(&flat, 0.1), 0.0);
    }

    #[test]
    fn test_increasing_variance() {
        let mut ratios = vec![1.0, 1.1, 0.9, 1.0, 1.05, 0.95, 1.0, 1.1, 0.9, 1.0];
        ratios.extend([0.5, 2.0, 0.4, 2.5, 0.3, 2.2, 0.6, 1.9, 0.5, 2.4]);
        let result = wick_variance(&ratios, &WickParams::default());
        assert!(result.determined);
        assert!(result.change_pct > 30.0);
        assert!(result.is_increasing);
        assert_relative_eq!(result.latest_ratio, 2.4);
    }

    #[test]
    fn test_stable_variance_not_increasing() {
        let ratios: Vec<f64> = (0..20).map(|i| if i % 2 == 0 { 1.0 } else { 1.2 }).collect();
        let result = wick_variance(&ratios, &WickParams::default());
        assert!(result.determined);
        assert!(!result.is_increasing);
    }

    #[test]
    fn test_short_input_is_neutral() {
        assert_eq!(wick_variance(&[1.0; 5], &WickParams::default()), WickVariance::default());
        assert_eq!(wick_variance(&[], &WickParams::default()), WickVariance::default());
    }
}
