//! Strategy mapping
//!
//! Translates a volatility regime into strategy guidance: which strategy
//! families to prioritize or avoid, how much to adjust downstream confidence,
//! and whether trading should pause until the regime clears. Pure lookup,
//! no I/O.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::classifier::VolatilityRegime;
use crate::metrics::Session;
use crate::types::Symbol;

/// Guidance for downstream strategy selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyGuidance {
    pub regime: VolatilityRegime,
    pub prioritize: Vec<String>,
    pub avoid: Vec<String>,
    /// Signed points added to a strategy's own confidence
    pub confidence_adjustment: i32,
    /// Stand aside entirely until the regime changes
    pub block_trading: bool,
    pub notes: Vec<String>,
}

/// How a named strategy fits the current regime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyVerdict {
    Preferred,
    Neutral,
    Discouraged,
    Blocked,
}

#[derive(Debug, Clone)]
struct RegimeProfile {
    prioritize: &'static [&'static str],
    avoid: &'static [&'static str],
    confidence_adjustment: i32,
    block_trading: bool,
}

/// Regime → strategy table
#[derive(Debug, Clone)]
pub struct StrategyMapper {
    profiles: HashMap<VolatilityRegime, RegimeProfile>,
}

impl Default for StrategyMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyMapper {
    pub fn new() -> Self {
        let profiles = HashMap::from([
            (
                VolatilityRegime::Stable,
                RegimeProfile {
                    prioritize: &["range_trading", "mean_reversion", "grid"],
                    avoid: &["breakout", "momentum"],
                    confidence_adjustment: 5,
                    block_trading: false,
                },
            ),
            (
                VolatilityRegime::Transitional,
                RegimeProfile {
                    prioritize: &["pullback", "swing"],
                    avoid: &["grid", "scalping"],
                    confidence_adjustment: -10,
                    block_trading: false,
                },
            ),
            (
                VolatilityRegime::Volatile,
                RegimeProfile {
                    prioritize: &["trend_following", "momentum", "breakout"],
                    avoid: &["range_trading", "grid", "mean_reversion"],
                    confidence_adjustment: -5,
                    block_trading: false,
                },
            ),
            (
                VolatilityRegime::PreBreakoutTension,
                RegimeProfile {
                    prioritize: &["breakout", "volatility_expansion"],
                    avoid: &["mean_reversion", "range_trading", "grid"],
                    confidence_adjustment: 10,
                    block_trading: false,
                },
            ),
            (
                VolatilityRegime::PostBreakoutDecay,
                RegimeProfile {
                    prioritize: &["pullback", "trend_continuation"],
                    avoid: &["breakout", "momentum"],
                    confidence_adjustment: 0,
                    block_trading: false,
                },
            ),
            (
                VolatilityRegime::FragmentedChop,
                RegimeProfile {
                    prioritize: &["mean_reversion", "range_trading"],
                    avoid: &["trend_following", "breakout", "momentum"],
                    confidence_adjustment: -15,
                    block_trading: false,
                },
            ),
            (
                VolatilityRegime::SessionSwitchFlare,
                RegimeProfile {
                    prioritize: &[],
                    avoid: &[],
                    confidence_adjustment: -50,
                    block_trading: true,
                },
            ),
        ]);
        Self { profiles }
    }

    fn profile(&self, regime: VolatilityRegime) -> Option<&RegimeProfile> {
        self.profiles.get(&regime)
    }

    /// Guidance for `regime`, tuned by the active sessions and the instrument
    pub fn map_regime(
        &self,
        regime: VolatilityRegime,
        active_sessions: &[Session],
        symbol: Option<&Symbol>,
    ) -> StrategyGuidance {
        let mut guidance = match self.profile(regime) {
            Some(p) => StrategyGuidance {
                regime,
                prioritize: p.prioritize.iter().map(|s| s.to_string()).collect(),
                avoid: p.avoid.iter().map(|s| s.to_string()).collect(),
                confidence_adjustment: p.confidence_adjustment,
                block_trading: p.block_trading,
                notes: Vec::new(),
            },
            None => StrategyGuidance {
                regime,
                prioritize: Vec::new(),
                avoid: Vec::new(),
                confidence_adjustment: 0,
                block_trading: false,
                notes: vec!["no profile for regime".to_string()],
            },
        };

        if guidance.block_trading {
            guidance
                .notes
                .push("session flare: stand aside until the regime clears".to_string());
            return guidance;
        }

        let overlap = active_sessions.contains(&Session::London)
            && active_sessions.contains(&Session::NewYork);
        let asia_only = active_sessions == [Session::Asia];

        match regime {
            VolatilityRegime::PreBreakoutTension if overlap => {
                guidance.confidence_adjustment += 5;
                guidance
                    .notes
                    .push("London/New York overlap favours the break resolving".to_string());
            }
            VolatilityRegime::Volatile if asia_only => {
                guidance.confidence_adjustment -= 5;
                guidance
                    .notes
                    .push("volatility in the Asia session often lacks follow-through".to_string());
            }
            VolatilityRegime::Stable if overlap => {
                guidance.confidence_adjustment -= 5;
                guidance
                    .notes
                    .push("quiet regime during the overlap may not last".to_string());
            }
            _ => {}
        }

        if let Some(symbol) = symbol {
            let is_metal = ["XAU", "XAG"].iter().any(|m| symbol.as_str().starts_with(m));
            if is_metal && matches!(regime, VolatilityRegime::Volatile | VolatilityRegime::FragmentedChop) {
                guidance.confidence_adjustment -= 5;
                if !guidance.avoid.iter().any(|s| s == "scalping") {
                    guidance.avoid.push("scalping".to_string());
                }
                guidance
                    .notes
                    .push(format!("{} spreads widen in this regime", symbol));
            }
        }

        guidance
    }

    /// Check a named strategy against the regime
    pub fn evaluate_strategy(&self, regime: VolatilityRegime, strategy: &str) -> StrategyVerdict {
        let Some(profile) = self.profile(regime) else {
            return StrategyVerdict::Neutral;
        };
        if profile.block_trading {
            return StrategyVerdict::Blocked;
        }

        let name = strategy.trim().to_lowercase().replace([' ', '-'], "_");
        if profile.avoid.contains(&name.as_str()) {
            StrategyVerdict::Discouraged
        } else if profile.prioritize.contains(&name.as_str()) {
            StrategyVerdict::Preferred
        } else {
            StrategyVerdict::Neutral
        }
    }
}

/// Apply a signed adjustment to a 0-100 confidence, clamping the result
pub fn apply_adjustment(confidence: u8, adjustment: i32) -> u8 {
    (confidence as i32 + adjustment).clamp(0, 100) as u8
}
