//! Flattened signal set the detectors read
//!
//! Per-timeframe metrics are reduced to one set of composites (weighted across
//! timeframes) and one set of overlay flags (read from the reference
//! timeframe, or from any timeframe for breakouts and spikes). Detectors only
//! ever see this struct, so scenarios can be built synthetically in tests.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::regime::TimeframeMetrics;
use crate::config::TimeframeConfig;
use crate::metrics::SessionTransition;
use crate::tracking::BreakType;
use crate::types::Timeframe;

/// Timeframe-weighted indicators
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompositeIndicators {
    pub atr_ratio: Option<f64>,
    pub bb_width: Option<f64>,
    pub bb_percentile: Option<f64>,
    /// ADX-equivalent directional strength
    pub adx: Option<f64>,
    /// Weighted majority of timeframes show above-average volume on the last bar
    pub volume_confirms: bool,
    /// Share of the supplied timeframe weight that produced an ATR ratio, 0-1
    pub coverage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegimeSignals {
    pub composite: CompositeIndicators,
    /// Timeframe the overlay flags were read from
    pub reference_timeframe: Option<Timeframe>,

    pub bb_narrow: bool,
    pub wick_change_pct: f64,
    pub wick_increasing: bool,
    pub intrabar_change_pct: f64,
    pub intrabar_rising: bool,

    pub atr_slope_pct: f64,
    pub atr_declining: bool,
    pub atr_above_baseline: bool,

    pub breakout_type: Option<BreakType>,
    pub breakout_minutes: Option<f64>,
    pub recent_breakout: bool,

    pub reversals: usize,
    pub whipsaw: bool,
    pub crossings: usize,
    pub mean_reverting: bool,

    pub session: SessionTransition,
    pub spike_ratio: Option<f64>,
    pub spike: bool,
    pub spike_resolving: bool,
}

/// Weighted mean over the timeframes that have a value
///
/// Weights are renormalised over the present values; when all present
/// weights are zero a plain mean is used instead.
fn weighted<I>(items: I) -> Option<f64>
where
    I: IntoIterator<Item = (f64, Option<f64>)>,
{
    let present: Vec<(f64, f64)> = items
        .into_iter()
        .filter_map(|(w, v)| v.filter(|v| v.is_finite()).map(|v| (w, v)))
        .collect();
    if present.is_empty() {
        return None;
    }

    let total: f64 = present.iter().map(|(w, _)| w).sum();
    if total > 0.0 {
        Some(present.iter().map(|(w, v)| w * v).sum::<f64>() / total)
    } else {
        Some(present.iter().map(|(_, v)| v).sum::<f64>() / present.len() as f64)
    }
}

impl CompositeIndicators {
    pub fn from_timeframes(
        timeframes: &BTreeMap<Timeframe, TimeframeMetrics>,
        config: &TimeframeConfig,
    ) -> Self {
        let weight = |tf: &Timeframe| config.weight(*tf);

        let supplied: f64 = timeframes.keys().map(weight).sum();
        let determined: f64 = timeframes
            .iter()
            .filter(|(_, m)| m.is_determined())
            .map(|(tf, _)| weight(tf))
            .sum();
        let coverage = if supplied > 0.0 {
            determined / supplied
        } else if timeframes.is_empty() {
            0.0
        } else {
            timeframes.values().filter(|m| m.is_determined()).count() as f64
                / timeframes.len() as f64
        };

        let bb = |m: &TimeframeMetrics, f: fn(&TimeframeMetrics) -> f64| {
            m.bb_width.determined.then(|| f(m))
        };

        let confirming = weighted(
            timeframes
                .iter()
                .filter(|(_, m)| m.is_determined())
                .map(|(tf, m)| (weight(tf), Some(if m.volume_confirms { 1.0 } else { 0.0 }))),
        );

        CompositeIndicators {
            atr_ratio: weighted(timeframes.iter().map(|(tf, m)| (weight(tf), m.atr_ratio))),
            bb_width: weighted(
                timeframes
                    .iter()
                    .map(|(tf, m)| (weight(tf), bb(m, |m| m.bb_width.current_width))),
            ),
            bb_percentile: weighted(
                timeframes
                    .iter()
                    .map(|(tf, m)| (weight(tf), bb(m, |m| m.bb_width.percentile))),
            ),
            adx: weighted(timeframes.iter().map(|(tf, m)| (weight(tf), m.adx))),
            volume_confirms: confirming.is_some_and(|share| share >= 0.5),
            coverage: coverage.clamp(0.0, 1.0),
        }
    }
}

/// The primary timeframe when it is determined, else the heaviest determined one
pub fn reference_timeframe(
    timeframes: &BTreeMap<Timeframe, TimeframeMetrics>,
    config: &TimeframeConfig,
) -> Option<Timeframe> {
    if timeframes
        .get(&config.primary)
        .is_some_and(|m| m.is_determined())
    {
        return Some(config.primary);
    }

    timeframes
        .iter()
        .filter(|(_, m)| m.is_determined())
        .map(|(tf, _)| *tf)
        .fold(None, |best: Option<Timeframe>, tf| match best {
            Some(b) if config.weight(b) >= config.weight(tf) => Some(b),
            _ => Some(tf),
        })
}

impl RegimeSignals {
    pub fn from_timeframes(
        timeframes: &BTreeMap<Timeframe, TimeframeMetrics>,
        session: SessionTransition,
        config: &TimeframeConfig,
    ) -> Self {
        let composite = CompositeIndicators::from_timeframes(timeframes, config);
        let reference_timeframe = reference_timeframe(timeframes, config);

        let mut signals = RegimeSignals {
            composite,
            reference_timeframe,
            session,
            ..RegimeSignals::default()
        };

        if let Some(m) = reference_timeframe.and_then(|tf| timeframes.get(&tf)) {
            signals.bb_narrow = m.bb_width.is_narrow;
            signals.wick_change_pct = m.wick.change_pct;
            signals.wick_increasing = m.wick.is_increasing;
            signals.intrabar_change_pct = m.intrabar.change_pct;
            signals.intrabar_rising = m.intrabar.is_rising;
            signals.atr_slope_pct = m.atr_trend.slope_pct;
            signals.atr_declining = m.atr_trend.is_declining;
            signals.atr_above_baseline = m.atr_trend.is_above_baseline;
            signals.reversals = m.whipsaw.reversals;
            signals.whipsaw = m.whipsaw.is_whipsaw;
            signals.crossings = m.mean_reversion.crossings;
            signals.mean_reverting = m.mean_reversion.is_oscillating;
        }

        // Youngest breakout on any timeframe
        if let Some(age) = timeframes
            .values()
            .filter_map(|m| m.time_since_breakout.as_ref())
            .min_by(|a, b| a.minutes.total_cmp(&b.minutes))
        {
            signals.breakout_type = Some(age.event.break_type);
            signals.breakout_minutes = Some(age.minutes);
            signals.recent_breakout = age.is_recent;
        }

        let spikes: Vec<_> = timeframes.values().filter(|m| m.spike.is_spike).collect();
        signals.spike = !spikes.is_empty();
        signals.spike_resolving = spikes.iter().any(|m| m.spike.is_resolving);
        signals.spike_ratio = timeframes
            .values()
            .filter(|m| m.spike.determined)
            .map(|m| m.spike.ratio)
            .reduce(f64::max);

        signals
    }
}
