//! Regime classifier
//!
//! Per call: run every calculator on every supplied timeframe (writing ATR,
//! wick and spike state back into the tracking store), reduce the results to
//! composite signals, classify the basic regime, then let the first matching
//! advanced overlay replace it.
//!
//! `classify` never fails. Calculator errors, panics and budget overruns
//! collapse to neutral metrics; with nothing measurable the result is STABLE
//! at confidence 0.

pub mod detectors;
pub mod regime;
pub mod signals;

pub use detectors::{advanced_detectors, Detector, Verdict};
pub use regime::{RegimeResult, TimeframeMetrics, VolatilityRegime};
pub use signals::{CompositeIndicators, RegimeSignals};

use chrono::{DateTime, Utc};
use itertools::Itertools;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::RegimeConfig;
use crate::error::RegimeError;
use crate::indicators::{adx, atr, last_value, mean, true_range};
use crate::metrics::{
    atr_trend, bb_width_trend, detect_breakout, intrabar_volatility, mean_reversion,
    session_transition, volatility_spike, whipsaw, wick_ratio, wick_ratios, wick_variance,
    BreakoutSignal, SpikeInput,
};
use crate::normalize::{CandleSeries, RateInput};
use crate::tracking::TrackingStore;
use crate::types::{Candle, Symbol, Timeframe};

/// One symbol's candles for a batch run
#[derive(Debug, Clone)]
pub struct ClassificationRequest {
    pub symbol: Symbol,
    pub series: HashMap<Timeframe, CandleSeries>,
}

pub struct RegimeClassifier {
    config: RegimeConfig,
    store: Arc<TrackingStore>,
    detectors: Vec<Detector>,
}

impl RegimeClassifier {
    pub fn new(config: RegimeConfig, store: Arc<TrackingStore>) -> Self {
        Self {
            config,
            store,
            detectors: advanced_detectors(),
        }
    }

    /// Classifier over a fresh store with an in-memory ledger
    pub fn in_memory(config: RegimeConfig) -> Self {
        let store = Arc::new(TrackingStore::in_memory(config.tracking.clone()));
        Self::new(config, store)
    }

    /// Validate the config and open the ledger it names
    pub fn from_config(config: RegimeConfig) -> Result<Self, RegimeError> {
        config.validate()?;
        let store = Arc::new(TrackingStore::from_config(config.tracking.clone())?);
        Ok(Self::new(config, store))
    }

    pub fn config(&self) -> &RegimeConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<TrackingStore> {
        &self.store
    }

    // =========================================================================
    // Entry points
    // =========================================================================

    pub fn classify(
        &self,
        symbol: &Symbol,
        series: &HashMap<Timeframe, CandleSeries>,
        now: DateTime<Utc>,
    ) -> RegimeResult {
        self.store.ensure_tracking(symbol);

        let mut timeframes = BTreeMap::new();
        for (tf, candles) in series.iter().sorted_by_key(|(tf, _)| **tf) {
            let metrics = self.analyze_timeframe(symbol, *tf, candles, now);
            debug!(
                "{} {}: bars={} atr_ratio={:?} bb_pct={:.0} adx={:?} spike={} breakout={}",
                symbol,
                tf,
                metrics.bars,
                metrics.atr_ratio,
                metrics.bb_width.percentile,
                metrics.adx,
                metrics.spike.is_spike,
                metrics.breakout.detected
            );
            timeframes.insert(*tf, metrics);
        }

        let session = self.guarded("session_transition", || {
            session_transition(now, &self.config.session)
        });
        let signals = RegimeSignals::from_timeframes(&timeframes, session, &self.config.timeframes);

        self.assemble(symbol, timeframes, signals, now)
    }

    /// Normalize raw rate inputs, then classify; unusable timeframes are skipped
    pub fn classify_rates(
        &self,
        symbol: &Symbol,
        rates: &HashMap<Timeframe, RateInput>,
        now: DateTime<Utc>,
    ) -> RegimeResult {
        let series: HashMap<Timeframe, CandleSeries> = rates
            .iter()
            .filter_map(|(tf, input)| match input.normalize() {
                Ok(series) => Some((*tf, series)),
                Err(e) => {
                    warn!("{} {}: skipping rates, {}", symbol, tf, e);
                    None
                }
            })
            .collect();

        self.classify(symbol, &series, now)
    }

    /// Classify many symbols on the rayon pool
    ///
    /// Tracking state is keyed by symbol, so the results equal sequential calls.
    pub fn classify_batch(
        &self,
        requests: &[ClassificationRequest],
        now: DateTime<Utc>,
    ) -> Vec<RegimeResult> {
        requests
            .par_iter()
            .map(|request| self.classify(&request.symbol, &request.series, now))
            .collect()
    }

    /// Run the detector chain on an already-built signal set
    pub fn classify_signals(
        &self,
        symbol: &Symbol,
        signals: RegimeSignals,
        now: DateTime<Utc>,
    ) -> RegimeResult {
        self.assemble(symbol, BTreeMap::new(), signals, now)
    }

    /// Deactivate ledger breakouts older than the configured expiry
    pub fn expire_breakouts(&self, now: DateTime<Utc>) -> Result<usize, RegimeError> {
        self.store.expire_breakouts(now)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn assemble(
        &self,
        symbol: &Symbol,
        timeframes: BTreeMap<Timeframe, TimeframeMetrics>,
        signals: RegimeSignals,
        now: DateTime<Utc>,
    ) -> RegimeResult {
        let Some(verdict) = detectors::evaluate(&signals, &self.config, &self.detectors) else {
            let reason = if timeframes.is_empty() && signals.composite.atr_ratio.is_none() {
                "no usable timeframes supplied".to_string()
            } else {
                format!(
                    "no timeframe had enough bars for ATR (need {})",
                    self.config.indicators.atr_slow_period
                )
            };
            warn!("{}: {}", symbol, reason);
            let mut result = RegimeResult::insufficient_data(symbol.clone(), &reason, now);
            result.timeframes = timeframes;
            result.signals = signals;
            return result;
        };

        let confidence = detectors::confidence(verdict.strength, signals.composite.coverage);
        info!(
            "{} regime {} (confidence {}, basic {})",
            symbol, verdict.regime, confidence, verdict.basic
        );

        RegimeResult {
            symbol: symbol.clone(),
            regime: verdict.regime,
            basic_regime: verdict.basic,
            confidence,
            timeframes,
            signals,
            reasoning: verdict.reasoning,
            degraded: false,
            evaluated_at: now,
        }
    }

    /// Run a calculator, replacing panics and budget overruns with its neutral value.
    ///
    /// The budget is checked after the call returns: a slow calculator runs to
    /// completion on this thread and only its result is discarded. Nothing is
    /// preempted, so the budget bounds what reaches the signals, not wall time.
    fn guarded<T: Default>(&self, name: &str, f: impl FnOnce() -> T) -> T {
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(f));
        let elapsed = started.elapsed();
        let budget = self.config.calculator_budget();

        match outcome {
            Ok(value) if elapsed <= budget => value,
            Ok(_) => {
                warn!("{} took {:?} (budget {:?}), treating as failed", name, elapsed, budget);
                T::default()
            }
            Err(_) => {
                warn!("{} panicked, using neutral value", name);
                T::default()
            }
        }
    }

    fn analyze_timeframe(
        &self,
        symbol: &Symbol,
        tf: Timeframe,
        series: &CandleSeries,
        now: DateTime<Utc>,
    ) -> TimeframeMetrics {
        let Some(last) = series.last() else {
            return TimeframeMetrics::default();
        };
        let cfg = &self.config;
        let candles = series.candles();
        let highs = series.highs();
        let lows = series.lows();
        let closes = series.closes();
        let columns = series.indicators();

        let column_or = |column: &Option<Vec<f64>>, period: usize| -> Vec<Option<f64>> {
            match series.aligned_column(column) {
                Some(values) => values.iter().map(|v| Some(*v)).collect(),
                None => atr(&highs, &lows, &closes, period),
            }
        };
        let fast_series = self.guarded("atr_fast", || {
            column_or(&columns.atr_fast, cfg.indicators.atr_fast_period)
        });
        let slow_series = self.guarded("atr_slow", || {
            column_or(&columns.atr_slow, cfg.indicators.atr_slow_period)
        });
        let atr_fast = last_value(&fast_series).filter(|v| v.is_finite());
        let atr_slow = last_value(&slow_series).filter(|v| v.is_finite());
        let atr_ratio = match (atr_fast, atr_slow) {
            (Some(fast), Some(slow)) if slow > 0.0 => Some(fast / slow),
            _ => None,
        };

        // Rolling history
        if let Some(fast) = atr_fast {
            self.store
                .record_atr(symbol, tf, last.datetime, fast, atr_slow.unwrap_or(fast));
        }
        self.store.record_wick_ratio(
            symbol,
            tf,
            last.datetime,
            wick_ratio(last, cfg.wick.min_body_fraction),
        );

        // Prefer whichever source holds more samples: the bars supplied now or
        // the history accumulated across calls
        let series_fast: Vec<f64> = fast_series.iter().flatten().copied().collect();
        let history_fast: Vec<f64> = self
            .store
            .atr_history(symbol, tf)
            .iter()
            .map(|e| e.atr_fast)
            .collect();
        let fast_values = if history_fast.len() > series_fast.len() {
            history_fast
        } else {
            series_fast
        };

        let series_wicks = wick_ratios(candles, cfg.wick.min_body_fraction);
        let history_wicks: Vec<f64> = self
            .store
            .wick_history(symbol, tf)
            .iter()
            .map(|e| e.ratio)
            .collect();
        let wick_values = if history_wicks.len() > series_wicks.len() {
            history_wicks
        } else {
            series_wicks
        };

        let atr_trend = self.guarded("atr_trend", || atr_trend(&fast_values, &cfg.atr));
        let wick = self.guarded("wick_variance", || wick_variance(&wick_values, &cfg.wick));
        let intrabar = self.guarded("intrabar", || intrabar_volatility(candles, &cfg.intrabar));
        let bb_width = self.guarded("bb_width", || bb_width_trend(series, &cfg.bollinger));
        let whipsaw = self.guarded("whipsaw", || whipsaw(&closes, &cfg.whipsaw));
        let mean_reversion =
            self.guarded("mean_reversion", || mean_reversion(series, &cfg.mean_reversion));

        // Spike, with the open spike record carried between calls
        let prior_spike = self.store.active_spike(symbol, tf);
        let spike = self.guarded("volatility_spike", || {
            let Some(current_atr) = atr_fast else {
                return Default::default();
            };
            let history = &fast_values[..fast_values.len().saturating_sub(1)];
            let baseline = &history[history.len().saturating_sub(cfg.atr.baseline_window)..];
            let last_true_range = true_range(&highs, &lows, &closes).last().copied().unwrap_or(0.0);
            volatility_spike(
                &SpikeInput {
                    symbol,
                    timeframe: tf,
                    current_atr,
                    baseline,
                    last_true_range,
                    prior: prior_spike.as_ref(),
                    now,
                },
                &cfg.spike,
            )
        });
        if spike.determined {
            match &spike.record {
                Some(record) => self.store.set_spike(record.clone()),
                None if prior_spike.is_some() => {
                    debug!("{} {} spike cleared", symbol, tf);
                    self.store.clear_spike(symbol, tf);
                }
                None => {}
            }
        }

        let breakout = self.guarded("breakout", || detect_breakout(candles, atr_fast, &cfg.breakout));
        if breakout.detected {
            self.record_detected_breakout(symbol, tf, &breakout);
        }

        let time_since_breakout = match self.store.time_since_breakout(symbol, tf, now) {
            Ok(age) => age,
            Err(e) => {
                warn!("{} {}: time since breakout unknown, {}", symbol, tf, e);
                None
            }
        };

        let adx = self.guarded("adx", || match series.aligned_column(&columns.adx) {
            Some(values) => values.last().copied(),
            None => last_value(&adx(&highs, &lows, &closes, cfg.indicators.adx_period)),
        });

        let volume_confirms = self.guarded("volume_confirms", || {
            volume_confirms(
                candles,
                cfg.indicators.volume_lookback,
                cfg.indicators.volume_confirm_multiple,
            )
        });

        TimeframeMetrics {
            bars: series.len(),
            atr_fast,
            atr_slow,
            atr_ratio,
            adx: adx.filter(|v| v.is_finite()),
            volume_confirms,
            atr_trend,
            wick,
            intrabar,
            bb_width,
            whipsaw,
            mean_reversion,
            spike,
            breakout,
            time_since_breakout,
        }
    }

    /// Persist a detected break unless it is not newer than the latest one on record
    fn record_detected_breakout(
        &self,
        symbol: &Symbol,
        tf: Timeframe,
        breakout: &BreakoutSignal,
    ) {
        let (Some(break_type), Some(timestamp)) = (breakout.break_type, breakout.timestamp) else {
            return;
        };

        match self.store.latest_breakout(symbol, tf) {
            Ok(Some(latest)) if latest.timestamp >= timestamp => return,
            Ok(_) => {}
            Err(e) => debug!("{} {}: breakout lookup failed, recording anyway: {}", symbol, tf, e),
        }

        if let Err(e) = self
            .store
            .record_breakout(symbol, tf, break_type, breakout.price, timestamp)
        {
            warn!("{} {}: breakout kept in memory only, {}", symbol, tf, e);
        }
    }
}

/// Last bar's volume against the average of the `lookback` bars before it
fn volume_confirms(candles: &[Candle], lookback: usize, multiple: f64) -> bool {
    let n = candles.len();
    if n < lookback + 1 || lookback == 0 {
        return false;
    }
    let prior: Vec<f64> = candles[n - 1 - lookback..n - 1].iter().map(|c| c.volume).collect();
    match mean(&prior) {
        Some(avg) if avg > 0.0 => candles[n - 1].volume >= avg * multiple,
        _ => false,
    }
}
