//! Basic three-state classifier and the ordered advanced-state chain
//!
//! The chain is data: a list of (regime, predicate, strength, explanation)
//! entries evaluated in order, first match wins. Reordering or adding a state
//! is a change to [`advanced_detectors`] only.

use super::regime::VolatilityRegime;
use super::signals::RegimeSignals;
use crate::config::RegimeConfig;

type Predicate = fn(&RegimeSignals, &RegimeConfig) -> bool;
type Strength = fn(&RegimeSignals, &RegimeConfig) -> f64;
type Explain = fn(&RegimeSignals) -> String;

pub struct Detector {
    pub regime: VolatilityRegime,
    pub matches: Predicate,
    /// How far past its thresholds the state is, 0-1
    pub strength: Strength,
    pub explain: Explain,
}

/// Outcome of running the basic classifier and the overlay chain
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub regime: VolatilityRegime,
    pub basic: VolatilityRegime,
    pub strength: f64,
    pub reasoning: String,
}

fn clamp01(x: f64) -> f64 {
    if x.is_finite() {
        x.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Distance of `value` past `threshold`, scaled by `span`
fn excess(value: f64, threshold: f64, span: f64) -> f64 {
    if span <= 0.0 {
        return 0.0;
    }
    clamp01((value - threshold) / span)
}

fn average(parts: &[f64]) -> f64 {
    if parts.is_empty() {
        return 0.0;
    }
    parts.iter().sum::<f64>() / parts.len() as f64
}

fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{:.*}", precision, v))
}

// =============================================================================
// Basic classifier
// =============================================================================

/// VOLATILE / STABLE / TRANSITIONAL from the composites
///
/// `None` when the composite ATR ratio is unknown. Without a BB percentile the
/// label rests on the ATR ratio alone at half strength.
pub fn classify_basic(signals: &RegimeSignals, config: &RegimeConfig) -> Option<(VolatilityRegime, f64)> {
    let t = &config.thresholds;
    let ratio = signals.composite.atr_ratio?;
    let percentile = signals.composite.bb_percentile;

    let volatile_ratio = ratio >= t.volatile_atr_ratio;
    let stable_ratio = ratio <= t.stable_atr_ratio;

    let (regime, strength) = match percentile {
        Some(pct) if volatile_ratio && pct >= t.volatile_bb_percentile => {
            let mut parts = vec![
                excess(ratio, t.volatile_atr_ratio, 0.5),
                excess(pct, t.volatile_bb_percentile, 100.0 - t.volatile_bb_percentile),
            ];
            if signals.composite.volume_confirms {
                parts.push(1.0);
            }
            (VolatilityRegime::Volatile, average(&parts))
        }
        Some(pct) if stable_ratio && pct <= t.stable_bb_percentile => (
            VolatilityRegime::Stable,
            average(&[
                excess(t.stable_atr_ratio, ratio, 0.3),
                excess(t.stable_bb_percentile, pct, t.stable_bb_percentile),
            ]),
        ),
        Some(_) => (VolatilityRegime::Transitional, transitional_strength(ratio, config)),
        None if volatile_ratio => (
            VolatilityRegime::Volatile,
            0.5 * excess(ratio, t.volatile_atr_ratio, 0.5),
        ),
        None if stable_ratio => (
            VolatilityRegime::Stable,
            0.5 * excess(t.stable_atr_ratio, ratio, 0.3),
        ),
        None => (
            VolatilityRegime::Transitional,
            0.5 * transitional_strength(ratio, config),
        ),
    };

    Some((regime, strength))
}

/// Strongest midway between the stable and volatile ATR thresholds
fn transitional_strength(ratio: f64, config: &RegimeConfig) -> f64 {
    let t = &config.thresholds;
    let half_band = (t.volatile_atr_ratio - t.stable_atr_ratio) / 2.0;
    if half_band <= 0.0 {
        return 0.0;
    }
    let from_edge = (t.volatile_atr_ratio - ratio).min(ratio - t.stable_atr_ratio);
    0.6 * clamp01(from_edge / half_band)
}

fn explain_basic(regime: VolatilityRegime, signals: &RegimeSignals) -> String {
    let c = &signals.composite;
    let mut text = format!(
        "{}: ATR ratio {}, BB width percentile {}, ADX {}",
        regime,
        fmt_opt(c.atr_ratio, 2),
        fmt_opt(c.bb_percentile, 0),
        fmt_opt(c.adx, 1)
    );
    if c.volume_confirms {
        text.push_str(", volume confirms");
    }
    text
}

// =============================================================================
// Advanced overlays
// =============================================================================

fn flare_matches(s: &RegimeSignals, _: &RegimeConfig) -> bool {
    s.session.in_transition && s.spike && s.spike_resolving
}

fn flare_strength(s: &RegimeSignals, config: &RegimeConfig) -> f64 {
    let threshold = config.spike.threshold_ratio;
    let window = config.session.window_minutes.max(1) as f64;
    let proximity = s
        .session
        .minutes_from_boundary
        .map_or(0.0, |m| clamp01(1.0 - m.abs() as f64 / window));
    average(&[
        excess(s.spike_ratio.unwrap_or(threshold), threshold, threshold),
        proximity,
    ])
}

fn flare_explain(s: &RegimeSignals) -> String {
    let boundary = match (s.session.session, s.session.boundary) {
        (Some(session), Some(boundary)) => format!("{} {:?}", session, boundary).to_lowercase(),
        _ => "session boundary".to_string(),
    };
    format!(
        "SESSION_SWITCH_FLARE: {} {} min away, ATR spike {}x baseline and resolving",
        boundary,
        s.session.minutes_from_boundary.map_or(0, |m| m.abs()),
        fmt_opt(s.spike_ratio, 2)
    )
}

fn tension_matches(s: &RegimeSignals, config: &RegimeConfig) -> bool {
    s.bb_narrow
        && s.wick_increasing
        && s.intrabar_rising
        && s
            .composite
            .atr_ratio
            .is_some_and(|r| r < config.thresholds.tension_max_atr_ratio)
}

fn tension_strength(s: &RegimeSignals, config: &RegimeConfig) -> f64 {
    let narrow = config.bollinger.narrow_percentile;
    let squeeze = s
        .composite
        .bb_percentile
        .map_or(0.5, |p| excess(narrow, p, narrow));
    average(&[
        squeeze,
        excess(s.wick_change_pct, config.wick.increase_threshold_pct, 100.0),
        excess(s.intrabar_change_pct, config.intrabar.rising_threshold_pct, 50.0),
        excess(
            config.thresholds.tension_max_atr_ratio,
            s.composite.atr_ratio.unwrap_or(config.thresholds.tension_max_atr_ratio),
            0.3,
        ),
    ])
}

fn tension_explain(s: &RegimeSignals) -> String {
    format!(
        "PRE_BREAKOUT_TENSION: BB width percentile {} (narrow), wick variance {:+.0}%, intrabar volatility {:+.0}%, ATR ratio {}",
        fmt_opt(s.composite.bb_percentile, 0),
        s.wick_change_pct,
        s.intrabar_change_pct,
        fmt_opt(s.composite.atr_ratio, 2)
    )
}

fn decay_matches(s: &RegimeSignals, config: &RegimeConfig) -> bool {
    let elevated = s.atr_above_baseline
        || s
            .composite
            .atr_ratio
            .is_some_and(|r| r >= config.thresholds.decay_min_atr_ratio);
    s.recent_breakout && s.atr_declining && elevated
}

fn decay_strength(s: &RegimeSignals, config: &RegimeConfig) -> f64 {
    let recent_window = config.tracking.recent_breakout_minutes.max(1) as f64;
    let declining = -config.atr.declining_slope_pct;
    average(&[
        excess(-s.atr_slope_pct, declining, 15.0),
        excess(s.composite.atr_ratio.unwrap_or(1.0), 1.0, 0.5),
        s.breakout_minutes
            .map_or(0.0, |m| clamp01(1.0 - m / recent_window)),
    ])
}

fn decay_explain(s: &RegimeSignals) -> String {
    format!(
        "POST_BREAKOUT_DECAY: {} breakout {} min ago, ATR slope {:+.1}%, ATR ratio {}",
        s.breakout_type.map_or("recent", |b| b.as_str()),
        fmt_opt(s.breakout_minutes, 0),
        s.atr_slope_pct,
        fmt_opt(s.composite.atr_ratio, 2)
    )
}

fn chop_matches(s: &RegimeSignals, config: &RegimeConfig) -> bool {
    s.whipsaw
        && s.mean_reverting
        && s
            .composite
            .adx
            .is_some_and(|adx| adx < config.thresholds.chop_max_adx)
}

fn chop_strength(s: &RegimeSignals, config: &RegimeConfig) -> f64 {
    let max_adx = config.thresholds.chop_max_adx;
    let min_crossings = config.mean_reversion.min_crossings as f64;
    average(&[
        clamp01(s.reversals as f64 / config.whipsaw.window.max(1) as f64),
        excess(max_adx, s.composite.adx.unwrap_or(max_adx), max_adx),
        excess(s.crossings as f64, min_crossings - 1.0, min_crossings.max(1.0)),
    ])
}

fn chop_explain(s: &RegimeSignals) -> String {
    format!(
        "FRAGMENTED_CHOP: {} direction changes, {} mean crossings, ADX {}",
        s.reversals,
        s.crossings,
        fmt_opt(s.composite.adx, 1)
    )
}

/// Overlays in priority order
pub fn advanced_detectors() -> Vec<Detector> {
    vec![
        Detector {
            regime: VolatilityRegime::SessionSwitchFlare,
            matches: flare_matches,
            strength: flare_strength,
            explain: flare_explain,
        },
        Detector {
            regime: VolatilityRegime::PreBreakoutTension,
            matches: tension_matches,
            strength: tension_strength,
            explain: tension_explain,
        },
        Detector {
            regime: VolatilityRegime::PostBreakoutDecay,
            matches: decay_matches,
            strength: decay_strength,
            explain: decay_explain,
        },
        Detector {
            regime: VolatilityRegime::FragmentedChop,
            matches: chop_matches,
            strength: chop_strength,
            explain: chop_explain,
        },
    ]
}

/// Basic label, then the first matching overlay replaces it
pub fn evaluate(
    signals: &RegimeSignals,
    config: &RegimeConfig,
    detectors: &[Detector],
) -> Option<Verdict> {
    let (basic, basic_strength) = classify_basic(signals, config)?;

    let verdict = match detectors.iter().find(|d| (d.matches)(signals, config)) {
        Some(detector) => Verdict {
            regime: detector.regime,
            basic,
            strength: clamp01((detector.strength)(signals, config)),
            reasoning: format!("{} (basic: {})", (detector.explain)(signals), basic),
        },
        None => Verdict {
            regime: basic,
            basic,
            strength: clamp01(basic_strength),
            reasoning: explain_basic(basic, signals),
        },
    };

    Some(verdict)
}

/// Map detector strength and data coverage onto 0-100
pub fn confidence(strength: f64, coverage: f64) -> u8 {
    let score = (40.0 + 60.0 * clamp01(strength)) * clamp01(coverage);
    score.round().clamp(0.0, 100.0) as u8
}
