//! Integration tests for the regime engine
//!
//! These tests drive the public API end to end: candles in, regime out, with
//! the tracking store and breakout ledger underneath.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashMap;

use regime_engine::classifier::CompositeIndicators;
use regime_engine::config::TrackingConfig;
use regime_engine::metrics::{Boundary, Session, SessionTransition};
use regime_engine::{
    BreakType, Candle, CandleSeries, ClassificationRequest, RateInput, RegimeClassifier,
    RegimeConfig, RegimeSignals, StrategyMapper, Symbol, Timeframe, TrackingStore,
    VolatilityRegime,
};

// =============================================================================
// Test Utilities
// =============================================================================

fn quiet_noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 6, 11, 0, 0).unwrap()
}

/// Oscillating candles ending at `end`, one every `step_minutes`
fn generate_candles(
    count: usize,
    base_price: f64,
    amplitude: f64,
    end: DateTime<Utc>,
    step_minutes: i64,
) -> Vec<Candle> {
    (0..count)
        .map(|i| {
            let t = end - Duration::minutes(step_minutes * (count - 1 - i) as i64);
            let phase = i as f64 * 0.45;
            let open = base_price + phase.sin() * amplitude;
            let close = base_price + (phase + 0.45).sin() * amplitude;
            let high = open.max(close) + amplitude * (0.2 + 0.1 * (i % 3) as f64);
            let low = open.min(close) - amplitude * (0.2 + 0.1 * ((i + 1) % 3) as f64);
            Candle::new(t, open, high, low, close, 1000.0 + (i % 7) as f64 * 50.0).unwrap()
        })
        .collect()
}

fn multi_timeframe(base_price: f64, end: DateTime<Utc>) -> HashMap<Timeframe, CandleSeries> {
    HashMap::from([
        (
            Timeframe::M15,
            CandleSeries::new(generate_candles(120, base_price, base_price * 0.002, end, 15)),
        ),
        (
            Timeframe::H1,
            CandleSeries::new(generate_candles(120, base_price, base_price * 0.004, end, 60)),
        ),
    ])
}

/// M15-only input from `(open, high, low, close)` bars, the last one ending at `end`
fn m15_bars(bars: &[(f64, f64, f64, f64)], end: DateTime<Utc>) -> HashMap<Timeframe, CandleSeries> {
    let n = bars.len();
    let candles = bars
        .iter()
        .enumerate()
        .map(|(i, &(open, high, low, close))| {
            let t = end - Duration::minutes(15 * (n - 1 - i) as i64);
            Candle::new(t, open, high, low, close, 1000.0).unwrap()
        })
        .collect();
    HashMap::from([(Timeframe::M15, CandleSeries::new(candles))])
}

/// +1 on even bars, -1 on odd
fn alternate(i: usize) -> f64 {
    if i % 2 == 0 {
        1.0
    } else {
        -1.0
    }
}

/// Symmetric bar centred on 100 with range `range` and body half of it
fn centred_bar(range: f64, direction: f64) -> (f64, f64, f64, f64) {
    let half_body = range / 4.0;
    (100.0 - direction * half_body, 100.0 + range / 2.0, 100.0 - range / 2.0, 100.0 + direction * half_body)
}

fn determined(atr_ratio: f64, bb_percentile: f64, adx: f64) -> RegimeSignals {
    RegimeSignals {
        composite: CompositeIndicators {
            atr_ratio: Some(atr_ratio),
            bb_width: Some(0.01),
            bb_percentile: Some(bb_percentile),
            adx: Some(adx),
            volume_confirms: false,
            coverage: 1.0,
        },
        reference_timeframe: Some(Timeframe::M15),
        ..RegimeSignals::default()
    }
}

fn small_store(capacity: usize) -> TrackingStore {
    TrackingStore::in_memory(TrackingConfig {
        history_capacity: capacity,
        ..TrackingConfig::default()
    })
}

// =============================================================================
// Classification
// =============================================================================

#[test]
fn test_classification_is_deterministic() {
    let input = multi_timeframe(1.0850, quiet_noon());
    let symbol = Symbol::new("EURUSD");

    let first = RegimeClassifier::in_memory(RegimeConfig::default()).classify(&symbol, &input, quiet_noon());
    let second = RegimeClassifier::in_memory(RegimeConfig::default()).classify(&symbol, &input, quiet_noon());

    assert!(!first.degraded);
    assert_eq!(first.regime, second.regime);
    assert_eq!(first.confidence, second.confidence);
    assert_eq!(first.reasoning, second.reasoning);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[test]
fn test_result_shape() {
    let classifier = RegimeClassifier::in_memory(RegimeConfig::default());
    let result = classifier.classify(&Symbol::new("EURUSD"), &multi_timeframe(1.0850, quiet_noon()), quiet_noon());

    assert!(result.confidence <= 100);
    assert_eq!(result.timeframes.len(), 2);
    assert!(result.timeframes.values().all(|m| m.is_determined()));
    assert!(result.composite().coverage > 0.0);
    assert_eq!(result.signals.reference_timeframe, Some(Timeframe::M15));
    assert!(!result.reasoning.is_empty());
    assert_eq!(result.evaluated_at, quiet_noon());
}

#[test]
fn test_empty_input_degrades() {
    let classifier = RegimeClassifier::in_memory(RegimeConfig::default());
    let result = classifier.classify(&Symbol::new("XAUUSD"), &HashMap::new(), quiet_noon());

    assert_eq!(result.regime, VolatilityRegime::Stable);
    assert_eq!(result.confidence, 0);
    assert!(result.degraded);
    assert!(result.reasoning.contains("insufficient data"));
}

#[test]
fn test_session_transition_flows_into_signals() {
    let near_open = Utc.with_ymd_and_hms(2024, 5, 6, 7, 55, 0).unwrap();
    let classifier = RegimeClassifier::in_memory(RegimeConfig::default());
    let result = classifier.classify(&Symbol::new("GBPUSD"), &multi_timeframe(1.2500, near_open), near_open);

    assert!(result.signals.session.in_transition);
    assert_eq!(result.signals.session.session, Some(Session::London));
    assert_eq!(result.signals.session.boundary, Some(Boundary::Open));
}

#[test]
fn test_batch_matches_sequential() {
    let now = quiet_noon();
    let requests: Vec<ClassificationRequest> = [("EURUSD", 1.0850), ("GBPUSD", 1.2500), ("XAUUSD", 2300.0)]
        .into_iter()
        .map(|(name, price)| ClassificationRequest {
            symbol: Symbol::new(name),
            series: multi_timeframe(price, now),
        })
        .collect();

    let batch = RegimeClassifier::in_memory(RegimeConfig::default()).classify_batch(&requests, now);

    let sequential_classifier = RegimeClassifier::in_memory(RegimeConfig::default());
    let sequential: Vec<_> = requests
        .iter()
        .map(|r| sequential_classifier.classify(&r.symbol, &r.series, now))
        .collect();

    assert_eq!(batch.len(), 3);
    for (b, s) in batch.iter().zip(&sequential) {
        assert_eq!(b.symbol, s.symbol);
        assert_eq!(b.regime, s.regime);
        assert_eq!(b.confidence, s.confidence);
        assert_eq!(b.reasoning, s.reasoning);
        assert_eq!(b.composite(), s.composite());
    }
}

#[test]
fn test_repeated_calls_accumulate_history() {
    let classifier = RegimeClassifier::in_memory(RegimeConfig::default());
    let symbol = Symbol::new("EURUSD");

    for step in 0..3 {
        let now = quiet_noon() + Duration::minutes(15 * step);
        classifier.classify(&symbol, &multi_timeframe(1.0850, now), now);
    }

    let store = classifier.store();
    assert_eq!(store.atr_history(&symbol, Timeframe::M15).len(), 3);
    assert_eq!(store.wick_history(&symbol, Timeframe::H1).len(), 3);
    assert_eq!(store.tracked_symbols(), vec![symbol]);
}

#[test]
fn test_classify_rates_from_json_matrix() {
    let end = quiet_noon();
    let rows: Vec<serde_json::Value> = generate_candles(80, 1.0850, 0.002, end, 15)
        .iter()
        .map(|c| {
            serde_json::json!([c.datetime.timestamp(), c.open, c.high, c.low, c.close, c.volume])
        })
        .collect();
    let input = RateInput::from_json(serde_json::Value::Array(rows)).unwrap();

    let classifier = RegimeClassifier::in_memory(RegimeConfig::default());
    let rates = HashMap::from([(Timeframe::M15, input)]);
    let result = classifier.classify_rates(&Symbol::new("EURUSD"), &rates, end);

    assert!(!result.degraded);
    assert_eq!(result.timeframes[&Timeframe::M15].bars, 80);
}

#[test]
fn test_classify_rates_skips_malformed_timeframe() {
    let classifier = RegimeClassifier::in_memory(RegimeConfig::default());
    let bad = RateInput::from_json(serde_json::json!([[1714993200, -1.0, -1.0, -1.0, -1.0]])).unwrap();
    let rates = HashMap::from([(Timeframe::M15, bad)]);
    let result = classifier.classify_rates(&Symbol::new("EURUSD"), &rates, quiet_noon());

    assert!(result.degraded);
    assert!(result.timeframes.is_empty());
}

// =============================================================================
// Regime Scenarios
// =============================================================================

#[test]
fn test_pre_breakout_tension() {
    let classifier = RegimeClassifier::in_memory(RegimeConfig::default());
    let signals = RegimeSignals {
        bb_narrow: true,
        wick_change_pct: 40.0,
        wick_increasing: true,
        intrabar_change_pct: 25.0,
        intrabar_rising: true,
        ..determined(0.9, 10.0, 18.0)
    };

    let result = classifier.classify_signals(&Symbol::new("EURUSD"), signals, quiet_noon());
    assert_eq!(result.regime, VolatilityRegime::PreBreakoutTension);
    assert_eq!(result.basic_regime, VolatilityRegime::Stable);
    assert!(result.reasoning.contains("narrow"));
}

#[test]
fn test_post_breakout_decay() {
    let classifier = RegimeClassifier::in_memory(RegimeConfig::default());
    let signals = RegimeSignals {
        breakout_type: Some(BreakType::Bullish),
        breakout_minutes: Some(10.0),
        recent_breakout: true,
        atr_slope_pct: -8.0,
        atr_declining: true,
        ..determined(1.4, 75.0, 30.0)
    };

    let result = classifier.classify_signals(&Symbol::new("EURUSD"), signals, quiet_noon());
    assert_eq!(result.regime, VolatilityRegime::PostBreakoutDecay);
    assert_eq!(result.basic_regime, VolatilityRegime::Volatile);
    assert!(result.reasoning.contains("bullish breakout 10 min ago"));
}

#[test]
fn test_fragmented_chop() {
    let classifier = RegimeClassifier::in_memory(RegimeConfig::default());
    let signals = RegimeSignals {
        reversals: 4,
        whipsaw: true,
        crossings: 5,
        mean_reverting: true,
        ..determined(1.1, 50.0, 10.0)
    };

    let result = classifier.classify_signals(&Symbol::new("EURUSD"), signals, quiet_noon());
    assert_eq!(result.regime, VolatilityRegime::FragmentedChop);
    assert_eq!(result.basic_regime, VolatilityRegime::Transitional);
    assert!(result.confidence > 0);
}

#[test]
fn test_session_switch_flare() {
    let classifier = RegimeClassifier::in_memory(RegimeConfig::default());
    let signals = RegimeSignals {
        session: SessionTransition {
            in_transition: true,
            session: Some(Session::London),
            boundary: Some(Boundary::Open),
            minutes_from_boundary: Some(3),
            active_sessions: vec![Session::London],
        },
        spike_ratio: Some(2.0),
        spike: true,
        spike_resolving: true,
        ..determined(1.5, 80.0, 25.0)
    };

    let result = classifier.classify_signals(&Symbol::new("GBPUSD"), signals, quiet_noon());
    assert_eq!(result.regime, VolatilityRegime::SessionSwitchFlare);

    let guidance = StrategyMapper::new().map_regime(
        result.regime,
        &result.signals.session.active_sessions,
        Some(&result.symbol),
    );
    assert!(guidance.block_trading);
}

#[test]
fn test_flare_takes_priority_over_chop() {
    let classifier = RegimeClassifier::in_memory(RegimeConfig::default());
    let signals = RegimeSignals {
        reversals: 4,
        whipsaw: true,
        crossings: 5,
        mean_reverting: true,
        session: SessionTransition {
            in_transition: true,
            session: Some(Session::NewYork),
            boundary: Some(Boundary::Open),
            minutes_from_boundary: Some(-2),
            active_sessions: vec![Session::London],
        },
        spike_ratio: Some(1.8),
        spike: true,
        spike_resolving: true,
        ..determined(1.1, 50.0, 10.0)
    };

    let result = classifier.classify_signals(&Symbol::new("EURUSD"), signals, quiet_noon());
    assert_eq!(result.regime, VolatilityRegime::SessionSwitchFlare);
}

#[test]
fn test_unresolved_spike_is_not_a_flare() {
    let classifier = RegimeClassifier::in_memory(RegimeConfig::default());
    let signals = RegimeSignals {
        session: SessionTransition {
            in_transition: true,
            session: Some(Session::London),
            boundary: Some(Boundary::Open),
            minutes_from_boundary: Some(3),
            active_sessions: vec![Session::London],
        },
        spike_ratio: Some(2.0),
        spike: true,
        spike_resolving: false,
        ..determined(1.5, 80.0, 25.0)
    };

    let result = classifier.classify_signals(&Symbol::new("GBPUSD"), signals, quiet_noon());
    assert_eq!(result.regime, VolatilityRegime::Volatile);
}

// =============================================================================
// Regime Scenarios From Candles
// =============================================================================

#[test]
fn test_candles_squeeze_into_pre_breakout_tension() {
    // Wide alternating bars, then a tight drift whose wicks grow against the body
    let mut bars: Vec<_> = (0..60)
        .map(|i| {
            let s = alternate(i);
            (100.0 - s, 101.2, 98.8, 100.0 + s)
        })
        .collect();
    bars.extend((0..20).map(|k| {
        let close = 100.0 + 0.002 * k as f64;
        let (body, wick) = if k < 15 { (0.5, 0.25) } else { (0.2, 0.4) };
        (close - body, close + wick, close - body - wick, close)
    }));

    let classifier = RegimeClassifier::in_memory(RegimeConfig::default());
    let result = classifier.classify(&Symbol::new("EURUSD"), &m15_bars(&bars, quiet_noon()), quiet_noon());

    assert!(!result.degraded);
    assert!(result.signals.bb_narrow);
    assert!(result.signals.wick_increasing);
    assert!(result.signals.intrabar_rising);
    assert!(result.composite().atr_ratio.unwrap() < 1.0);
    assert_eq!(result.regime, VolatilityRegime::PreBreakoutTension);
    assert_eq!(result.basic_regime, VolatilityRegime::Stable);
}

#[test]
fn test_candles_alternating_in_flat_range_are_chop() {
    let bars: Vec<_> = (0..80)
        .map(|i| {
            let s = alternate(i);
            (100.0 - 0.3 * s, 100.4, 99.6, 100.0 + 0.3 * s)
        })
        .collect();

    let classifier = RegimeClassifier::in_memory(RegimeConfig::default());
    let result = classifier.classify(&Symbol::new("EURUSD"), &m15_bars(&bars, quiet_noon()), quiet_noon());

    assert!(result.signals.whipsaw);
    assert!(result.signals.mean_reverting);
    assert!(result.composite().adx.unwrap() < 20.0);
    assert!(!result.signals.intrabar_rising);
    assert_eq!(result.regime, VolatilityRegime::FragmentedChop);
}

#[test]
fn test_candles_spike_at_london_open_is_flare() {
    let london_open = Utc.with_ymd_and_hms(2024, 5, 6, 8, 5, 0).unwrap();
    let mut bars: Vec<_> = (0..75)
        .map(|i| (100.0, 100.1, 99.9, 100.0 + 0.05 * alternate(i)))
        .collect();
    bars.extend((0..4).map(|i| (100.0, 101.0, 99.0, 100.0 + 0.05 * alternate(i))));
    // Last bar already narrower than the spiked ATR
    bars.push((100.0, 100.2, 99.8, 100.0));

    let classifier = RegimeClassifier::in_memory(RegimeConfig::default());
    let result = classifier.classify(&Symbol::new("GBPUSD"), &m15_bars(&bars, london_open), london_open);

    assert!(result.signals.session.in_transition);
    assert_eq!(result.signals.session.session, Some(Session::London));
    assert!(result.signals.spike);
    assert!(result.signals.spike_resolving);
    assert_eq!(result.regime, VolatilityRegime::SessionSwitchFlare);

    let guidance = StrategyMapper::new().map_regime(
        result.regime,
        &result.signals.session.active_sessions,
        Some(&result.symbol),
    );
    assert!(guidance.block_trading);
}

#[test]
fn test_candles_fading_after_recorded_breakout_are_decay() {
    let now = quiet_noon();
    let symbol = Symbol::new("EURUSD");
    let classifier = RegimeClassifier::in_memory(RegimeConfig::default());
    classifier
        .store()
        .record_breakout(&symbol, Timeframe::M15, BreakType::Bullish, 101.5, now - Duration::minutes(10))
        .unwrap();

    // Quiet base, an expansion, then ranges shrinking bar by bar
    let mut bars: Vec<_> = (0..60).map(|i| centred_bar(0.2, alternate(i))).collect();
    bars.extend((0..10).map(|i| centred_bar(3.0, alternate(i))));
    bars.extend((0..10).map(|k| centred_bar(2.0 - 0.2 * k as f64, alternate(k))));

    let result = classifier.classify(&symbol, &m15_bars(&bars, now), now);

    assert!(result.signals.recent_breakout);
    assert!(result.signals.atr_declining);
    assert!(result.signals.atr_above_baseline);
    assert!(!result.signals.bb_narrow);
    assert_eq!(result.regime, VolatilityRegime::PostBreakoutDecay);
    assert!(result.reasoning.contains("breakout"));
}

// =============================================================================
// Tracking Store and Breakout Ledger
// =============================================================================

#[test]
fn test_history_capacity_evicts_oldest() {
    let store = small_store(3);
    let symbol = Symbol::new("EURUSD");
    for i in 0..5 {
        store.record_atr(&symbol, Timeframe::M15, quiet_noon() + Duration::minutes(15 * i), i as f64, 1.0);
    }

    let history = store.atr_history(&symbol, Timeframe::M15);
    assert_eq!(history.len(), 3);
    assert_eq!(history.first().unwrap().atr_fast, 2.0);
    assert_eq!(history.last().unwrap().atr_fast, 4.0);
}

#[test]
fn test_breakout_visible_immediately() {
    let store = small_store(10);
    let symbol = Symbol::new("EURUSD");
    let now = quiet_noon();

    store
        .record_breakout(&symbol, Timeframe::M15, BreakType::Bullish, 1.0900, now)
        .unwrap();

    let age = store.time_since_breakout(&symbol, Timeframe::M15, now).unwrap().unwrap();
    assert!(age.minutes.abs() < 1e-9);
    assert!(age.is_recent);
    assert_eq!(age.event.break_type, BreakType::Bullish);
}

#[test]
fn test_opposing_breakout_invalidates_prior() {
    let store = small_store(10);
    let symbol = Symbol::new("EURUSD");
    let t0 = quiet_noon();

    store
        .record_breakout(&symbol, Timeframe::M15, BreakType::Bullish, 1.0900, t0)
        .unwrap();
    let recorded = store
        .record_breakout(&symbol, Timeframe::M15, BreakType::Bearish, 1.0820, t0 + Duration::minutes(30))
        .unwrap();
    assert_eq!(recorded.invalidated, 1);

    let latest = store.latest_breakout(&symbol, Timeframe::M15).unwrap().unwrap();
    assert_eq!(latest.break_type, BreakType::Bearish);

    let events = store
        .breakouts_between(t0 - Duration::hours(1), t0 + Duration::hours(1))
        .unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events.iter().filter(|e| e.is_active).count(), 1);
}

#[test]
fn test_sqlite_ledger_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrackingConfig {
        ledger_path: Some(dir.path().join("breakouts.db")),
        ..TrackingConfig::default()
    };
    let symbol = Symbol::new("XAUUSD");
    let now = quiet_noon();

    {
        let store = TrackingStore::from_config(config.clone()).unwrap();
        store
            .record_breakout(&symbol, Timeframe::H1, BreakType::Bearish, 2310.5, now - Duration::minutes(20))
            .unwrap();
    }

    let reopened = TrackingStore::from_config(config).unwrap();
    let age = reopened.time_since_breakout(&symbol, Timeframe::H1, now).unwrap().unwrap();
    assert_eq!(age.event.break_type, BreakType::Bearish);
    assert!((age.minutes - 20.0).abs() < 1e-6);
    assert!(age.is_recent);
}

#[test]
fn test_expire_breakouts() {
    let store = small_store(10);
    let symbol = Symbol::new("EURUSD");
    let now = quiet_noon();

    store
        .record_breakout(&symbol, Timeframe::M15, BreakType::Bullish, 1.0900, now - Duration::days(2))
        .unwrap();

    assert_eq!(store.expire_breakouts(now).unwrap(), 1);
    assert!(store.latest_breakout(&symbol, Timeframe::M15).unwrap().is_none());
}
