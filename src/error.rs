//! Error taxonomy for the regime engine
//!
//! None of these escape [`crate::classifier::RegimeClassifier::classify`]:
//! calculators degrade to neutral values and storage failures degrade to
//! "time since breakout unknown".

use thiserror::Error;

use crate::types::CandleValidationError;

#[derive(Debug, Error)]
pub enum RegimeError {
    /// Not enough history for a calculator. Non-fatal, the metric is undetermined.
    #[error("insufficient data for {metric}: need {required}, have {available}")]
    InsufficientData {
        metric: &'static str,
        required: usize,
        available: usize,
    },

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("invalid candle: {0}")]
    InvalidCandle(#[from] CandleValidationError),

    /// Breakout ledger unreachable or failing
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<rusqlite::Error> for RegimeError {
    fn from(e: rusqlite::Error) -> Self {
        RegimeError::StorageUnavailable(e.to_string())
    }
}

impl RegimeError {
    pub fn insufficient(metric: &'static str, required: usize, available: usize) -> Self {
        RegimeError::InsufficientData {
            metric,
            required,
            available,
        }
    }

    pub fn is_insufficient_data(&self) -> bool {
        matches!(self, RegimeError::InsufficientData { .. })
    }
}
