//! Regime labels and classification results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::signals::{CompositeIndicators, RegimeSignals};
use crate::metrics::{
    AtrTrend, BbWidthTrend, BreakoutSignal, IntrabarVolatility, MeanReversion, VolatilitySpike,
    Whipsaw, WickVariance,
};
use crate::tracking::BreakoutAge;
use crate::types::{Symbol, Timeframe};

/// Volatility regime classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolatilityRegime {
    Stable,
    Transitional,
    Volatile,
    PreBreakoutTension,
    PostBreakoutDecay,
    FragmentedChop,
    SessionSwitchFlare,
}

impl VolatilityRegime {
    pub const ALL: [VolatilityRegime; 7] = [
        VolatilityRegime::Stable,
        VolatilityRegime::Transitional,
        VolatilityRegime::Volatile,
        VolatilityRegime::PreBreakoutTension,
        VolatilityRegime::PostBreakoutDecay,
        VolatilityRegime::FragmentedChop,
        VolatilityRegime::SessionSwitchFlare,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VolatilityRegime::Stable => "STABLE",
            VolatilityRegime::Transitional => "TRANSITIONAL",
            VolatilityRegime::Volatile => "VOLATILE",
            VolatilityRegime::PreBreakoutTension => "PRE_BREAKOUT_TENSION",
            VolatilityRegime::PostBreakoutDecay => "POST_BREAKOUT_DECAY",
            VolatilityRegime::FragmentedChop => "FRAGMENTED_CHOP",
            VolatilityRegime::SessionSwitchFlare => "SESSION_SWITCH_FLARE",
        }
    }

    /// Overlay states that can replace the basic three-state label
    pub fn is_advanced(&self) -> bool {
        !matches!(
            self,
            VolatilityRegime::Stable | VolatilityRegime::Transitional | VolatilityRegime::Volatile
        )
    }

    pub fn description(&self) -> &'static str {
        match self {
            VolatilityRegime::Stable => "Contained volatility, bands and ATR below their norms",
            VolatilityRegime::Transitional => "Volatility between regimes, no dominant state",
            VolatilityRegime::Volatile => "Expanded ATR and wide bands",
            VolatilityRegime::PreBreakoutTension => {
                "Compressed bands with growing wick and intrabar noise ahead of a break"
            }
            VolatilityRegime::PostBreakoutDecay => {
                "Recent breakout with ATR declining but still elevated"
            }
            VolatilityRegime::FragmentedChop => {
                "Repeated reversals around the mean with no directional strength"
            }
            VolatilityRegime::SessionSwitchFlare => {
                "Short-lived volatility flare around a session open or close"
            }
        }
    }
}

impl std::fmt::Display for VolatilityRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for VolatilityRegime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase().replace([' ', '-'], "_");
        VolatilityRegime::ALL
            .into_iter()
            .find(|r| r.as_str() == normalized)
            .ok_or_else(|| format!("Unknown volatility regime: {}", s))
    }
}

/// Everything computed for one timeframe during a classification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeframeMetrics {
    pub bars: usize,
    pub atr_fast: Option<f64>,
    pub atr_slow: Option<f64>,
    /// Fast over slow ATR
    pub atr_ratio: Option<f64>,
    pub adx: Option<f64>,
    pub volume_confirms: bool,
    pub atr_trend: AtrTrend,
    pub wick: WickVariance,
    pub intrabar: IntrabarVolatility,
    pub bb_width: BbWidthTrend,
    pub whipsaw: Whipsaw,
    pub mean_reversion: MeanReversion,
    pub spike: VolatilitySpike,
    pub breakout: BreakoutSignal,
    pub time_since_breakout: Option<BreakoutAge>,
}

impl TimeframeMetrics {
    /// A timeframe contributes to the composites once its ATR ratio is known
    pub fn is_determined(&self) -> bool {
        self.atr_ratio.is_some()
    }
}

/// Output of one classification call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeResult {
    pub symbol: Symbol,
    pub regime: VolatilityRegime,
    /// Label from the three-state classifier before the overlays ran
    pub basic_regime: VolatilityRegime,
    /// 0-100
    pub confidence: u8,
    pub timeframes: BTreeMap<Timeframe, TimeframeMetrics>,
    pub signals: RegimeSignals,
    pub reasoning: String,
    /// True when no timeframe had enough data and the result is the fallback
    pub degraded: bool,
    pub evaluated_at: DateTime<Utc>,
}

impl RegimeResult {
    pub fn composite(&self) -> &CompositeIndicators {
        &self.signals.composite
    }

    /// Fallback when nothing could be measured
    pub fn insufficient_data(symbol: Symbol, reason: &str, evaluated_at: DateTime<Utc>) -> Self {
        RegimeResult {
            symbol,
            regime: VolatilityRegime::Stable,
            basic_regime: VolatilityRegime::Stable,
            confidence: 0,
            timeframes: BTreeMap::new(),
            signals: RegimeSignals::default(),
            reasoning: format!("insufficient data: {}", reason),
            degraded: true,
            evaluated_at,
        }
    }
}
