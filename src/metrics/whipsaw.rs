//! Whipsaw: direction reversals of close-to-close moves

use serde::{Deserialize, Serialize};

use super::or_neutral;
use crate::config::WhipsawParams;
use crate::error::RegimeError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Whipsaw {
    pub determined: bool,
    pub reversals: usize,
    /// Number of close-to-close deltas inspected
    pub window: usize,
    pub is_whipsaw: bool,
}

pub fn whipsaw(closes: &[f64], params: &WhipsawParams) -> Whipsaw {
    or_neutral("whipsaw", try_whipsaw(closes, params))
}

fn try_whipsaw(closes: &[f64], params: &WhipsawParams) -> Result<Whipsaw, RegimeError> {
    let window = params.window.max(2);
    if closes.len() < window + 1 {
        return Err(RegimeError::insufficient("whipsaw", window + 1, closes.len()));
    }

    let recent = &closes[closes.len() - window - 1..];
    // Unchanged closes carry no direction and are skipped
    let directions: Vec<bool> = recent
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|d| *d != 0.0)
        .map(|d| d > 0.0)
        .collect();

    let reversals = directions.windows(2).filter(|w| w[0] != w[1]).count();

    Ok(Whipsaw {
        determined: true,
        reversals,
        window,
        is_whipsaw: reversals >= params.min_reversals,
    })
}
