//! Metric calculators
//!
//! Each calculator is a pure function of candle data and rolling history that
//! returns a metric struct whose `Default` is the neutral, "undetermined"
//! reading. Internally they work in `Result<_, RegimeError>` and collapse any
//! error to that neutral value at the public boundary, so short or malformed
//! input never aborts a classification.

pub mod atr_trend;
pub mod bb_width;
pub mod breakout;
pub mod intrabar;
pub mod mean_reversion;
pub mod session;
pub mod spike;
pub mod whipsaw;
pub mod wick;

pub use atr_trend::{atr_trend, AtrTrend};
pub use bb_width::{bb_width_trend, BbWidthTrend};
pub use breakout::{detect_breakout, BreakoutMethod, BreakoutSignal};
pub use intrabar::{intrabar_volatility, IntrabarVolatility};
pub use mean_reversion::{mean_reversion, MeanReversion, ReferenceLine};
pub use session::{session_transition, Boundary, Session, SessionTransition, SessionWindow};
pub use spike::{volatility_spike, SpikeInput, VolatilitySpike};
pub use whipsaw::{whipsaw, Whipsaw};
pub use wick::{wick_ratio, wick_ratios, wick_variance, WickVariance};

use tracing::{debug, warn};

use crate::error::RegimeError;

/// Collapse a calculator error into the metric's neutral value
pub(crate) fn or_neutral<T: Default>(metric: &str, result: Result<T, RegimeError>) -> T {
    match result {
        Ok(value) => value,
        Err(e) if e.is_insufficient_data() => {
            debug!("{} undetermined: {}", metric, e);
            T::default()
        }
        Err(e) => {
            warn!("{} failed, using neutral value: {}", metric, e);
            T::default()
        }
    }
}

/// Percentage change from `previous` to `current`; 100 when rising from zero
pub(crate) fn pct_change(previous: f64, current: f64) -> f64 {
    if previous.abs() < f64::EPSILON {
        if current > 0.0 {
            100.0
        } else {
            0.0
        }
    } else {
        (current - previous) / previous.abs() * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_or_neutral_swallows_errors() {
        let value: f64 = or_neutral("test", Err(RegimeError::insufficient("test", 5, 1)));
        assert_eq!(value, 0.0);
        let value: f64 = or_neutral("test", Err(RegimeError::MalformedInput("nan".into())));
        assert_eq!(value, 0.0);
        assert_eq!(or_neutral("test", Ok(3.0)), 3.0);
    }

    #[test]
    fn test_pct_change() {
        assert_eq!(pct_change(10.0, 14.0), 40.0);
        assert_eq!(pct_change(0.0, 1.0), 100.0);
        assert_eq!(pct_change(0.0, 0.0), 0.0);
    }
}
