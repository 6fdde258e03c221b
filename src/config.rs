//! Configuration management
//!
//! Every section carries serde defaults, so a JSON file only needs the keys
//! it wants to override. Environment overrides are loaded through `dotenv`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::RegimeError;
use crate::metrics::session::{Session, SessionWindow};
use crate::types::Timeframe;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    pub timeframes: TimeframeConfig,
    pub indicators: IndicatorParams,
    pub tracking: TrackingConfig,
    pub atr: AtrParams,
    pub wick: WickParams,
    pub intrabar: IntrabarParams,
    pub bollinger: BollingerParams,
    pub whipsaw: WhipsawParams,
    pub mean_reversion: MeanReversionParams,
    pub session: SessionParams,
    pub spike: SpikeParams,
    pub breakout: BreakoutParams,
    pub thresholds: RegimeThresholds,
    /// Wall-clock budget for a single calculator call; overruns count as failures
    pub calculator_budget_ms: u64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        RegimeConfig {
            timeframes: TimeframeConfig::default(),
            indicators: IndicatorParams::default(),
            tracking: TrackingConfig::default(),
            atr: AtrParams::default(),
            wick: WickParams::default(),
            intrabar: IntrabarParams::default(),
            bollinger: BollingerParams::default(),
            whipsaw: WhipsawParams::default(),
            mean_reversion: MeanReversionParams::default(),
            session: SessionParams::default(),
            spike: SpikeParams::default(),
            breakout: BreakoutParams::default(),
            thresholds: RegimeThresholds::default(),
            calculator_budget_ms: 250,
        }
    }
}

impl RegimeConfig {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: RegimeConfig =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        config.validate()?;
        Ok(config)
    }

    /// Load `.env`, then honour `REGIME_CONFIG` and `REGIME_LEDGER_PATH`
    pub fn from_env_or_default() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = match std::env::var("REGIME_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };

        if let Ok(ledger_path) = std::env::var("REGIME_LEDGER_PATH") {
            config.tracking.ledger_path = Some(PathBuf::from(ledger_path));
        }

        Ok(config)
    }

    pub fn calculator_budget(&self) -> Duration {
        Duration::from_millis(self.calculator_budget_ms)
    }

    /// Reject settings that would make calculators meaningless
    pub fn validate(&self) -> Result<(), RegimeError> {
        if self.tracking.history_capacity == 0 {
            return Err(RegimeError::Config(
                "tracking.history_capacity must be > 0".to_string(),
            ));
        }

        let periods = [
            ("indicators.atr_fast_period", self.indicators.atr_fast_period),
            ("indicators.atr_slow_period", self.indicators.atr_slow_period),
            ("indicators.adx_period", self.indicators.adx_period),
            ("indicators.volume_lookback", self.indicators.volume_lookback),
            ("atr.trend_window", self.atr.trend_window),
            ("wick.window", self.wick.window),
            ("intrabar.window", self.intrabar.window),
            ("bollinger.period", self.bollinger.period),
            ("bollinger.percentile_lookback", self.bollinger.percentile_lookback),
            ("whipsaw.window", self.whipsaw.window),
            ("mean_reversion.window", self.mean_reversion.window),
            ("mean_reversion.ema_period", self.mean_reversion.ema_period),
            ("breakout.range_lookback", self.breakout.range_lookback),
            ("breakout.confirm_bars", self.breakout.confirm_bars),
        ];
        if let Some((name, _)) = periods.iter().find(|(_, v)| *v == 0) {
            return Err(RegimeError::Config(format!("{} must be > 0", name)));
        }

        if !(self.bollinger.num_std.is_finite() && self.bollinger.num_std > 0.0) {
            return Err(RegimeError::Config(
                "bollinger.num_std must be finite and > 0".to_string(),
            ));
        }

        let weight_sum: f64 = self.timeframes.weights.values().sum();
        if !(weight_sum > 0.0) || self.timeframes.weights.values().any(|w| *w < 0.0) {
            return Err(RegimeError::Config(
                "timeframes.weights must be non-negative and sum to > 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Timeframe weighting for composite indicators
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeframeConfig {
    pub weights: BTreeMap<Timeframe, f64>,
    /// Timeframe whose bar-pattern metrics feed the advanced detectors
    pub primary: Timeframe,
}

impl Default for TimeframeConfig {
    fn default() -> Self {
        let weights = BTreeMap::from([
            (Timeframe::M5, 0.15),
            (Timeframe::M15, 0.35),
            (Timeframe::H1, 0.30),
            (Timeframe::H4, 0.20),
        ]);
        TimeframeConfig {
            weights,
            primary: Timeframe::M15,
        }
    }
}

impl TimeframeConfig {
    pub fn weight(&self, timeframe: Timeframe) -> f64 {
        self.weights.get(&timeframe).copied().unwrap_or(0.0)
    }
}

/// Periods for indicators recomputed when the caller does not supply them
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorParams {
    pub atr_fast_period: usize,
    pub atr_slow_period: usize,
    pub adx_period: usize,
    pub volume_lookback: usize,
    /// Last volume must exceed this multiple of the average to confirm a move
    pub volume_confirm_multiple: f64,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        IndicatorParams {
            atr_fast_period: 5,
            atr_slow_period: 20,
            adx_period: 14,
            volume_lookback: 20,
            volume_confirm_multiple: 1.2,
        }
    }
}

/// Rolling history and breakout ledger settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Ring buffer capacity per symbol/timeframe
    pub history_capacity: usize,
    /// A breakout counts as recent while younger than this
    pub recent_breakout_minutes: i64,
    /// `time_since_breakout` ignores active breakouts older than this
    pub breakout_horizon_minutes: i64,
    /// `expire_breakouts` deactivates breakouts older than this
    pub breakout_expiry_minutes: i64,
    /// SQLite ledger path; `None` keeps the ledger in memory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_path: Option<PathBuf>,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        TrackingConfig {
            history_capacity: 50,
            recent_breakout_minutes: 30,
            breakout_horizon_minutes: 240,
            breakout_expiry_minutes: 1440,
            ledger_path: None,
        }
    }
}

/// ATR trend calculator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AtrParams {
    /// Number of trailing fast-ATR values the slope is fitted over
    pub trend_window: usize,
    pub min_samples: usize,
    /// `is_declining` when the fitted change over the window is at or below this
    pub declining_slope_pct: f64,
    pub baseline_window: usize,
    pub above_baseline_multiple: f64,
}

impl Default for AtrParams {
    fn default() -> Self {
        AtrParams {
            trend_window: 10,
            min_samples: 5,
            declining_slope_pct: -5.0,
            baseline_window: 50,
            above_baseline_multiple: 1.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WickParams {
    pub window: usize,
    pub increase_threshold_pct: f64,
    /// Bodies smaller than this fraction of the range are floored to it
    pub min_body_fraction: f64,
}

impl Default for WickParams {
    fn default() -> Self {
        WickParams {
            window: 10,
            increase_threshold_pct: 30.0,
            min_body_fraction: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntrabarParams {
    pub window: usize,
    pub rising_threshold_pct: f64,
    pub min_body_fraction: f64,
}

impl Default for IntrabarParams {
    fn default() -> Self {
        IntrabarParams {
            window: 5,
            rising_threshold_pct: 15.0,
            min_body_fraction: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BollingerParams {
    pub period: usize,
    pub num_std: f64,
    pub percentile_lookback: usize,
    pub narrow_percentile: f64,
    pub min_widths: usize,
}

impl Default for BollingerParams {
    fn default() -> Self {
        BollingerParams {
            period: 20,
            num_std: 2.0,
            percentile_lookback: 20,
            narrow_percentile: 20.0,
            min_widths: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhipsawParams {
    /// Number of close-to-close deltas inspected
    pub window: usize,
    pub min_reversals: usize,
}

impl Default for WhipsawParams {
    fn default() -> Self {
        WhipsawParams {
            window: 5,
            min_reversals: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeanReversionParams {
    pub window: usize,
    pub ema_period: usize,
    pub min_crossings: usize,
    /// Use VWAP as the reference when volume is present, EMA otherwise
    pub prefer_vwap: bool,
}

impl Default for MeanReversionParams {
    fn default() -> Self {
        MeanReversionParams {
            window: 20,
            ema_period: 20,
            min_crossings: 4,
            prefer_vwap: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionParams {
    /// Minutes either side of a session boundary treated as a transition
    pub window_minutes: i64,
    pub sessions: Vec<SessionWindow>,
}

impl Default for SessionParams {
    fn default() -> Self {
        SessionParams {
            window_minutes: 15,
            sessions: vec![
                SessionWindow::new(Session::Asia, 0, 0, 9, 0),
                SessionWindow::new(Session::London, 8, 0, 17, 0),
                SessionWindow::new(Session::NewYork, 13, 0, 22, 0),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpikeParams {
    /// Current ATR / baseline at or above this is a spike
    pub threshold_ratio: f64,
    /// Spikes lasting longer than this are sustained expansion, not a flare
    pub max_flare_minutes: i64,
    /// Retrace from the spike peak that marks it as resolving
    pub resolve_retrace_pct: f64,
}

impl Default for SpikeParams {
    fn default() -> Self {
        SpikeParams {
            threshold_ratio: 1.5,
            max_flare_minutes: 60,
            resolve_retrace_pct: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakoutParams {
    pub range_lookback: usize,
    /// Close must clear the range boundary by this multiple of ATR
    pub atr_multiple: f64,
    pub confirm_bars: usize,
    pub volume_variant: bool,
    pub volume_multiple: f64,
}

impl Default for BreakoutParams {
    fn default() -> Self {
        BreakoutParams {
            range_lookback: 20,
            atr_multiple: 0.5,
            confirm_bars: 2,
            volume_variant: true,
            volume_multiple: 2.0,
        }
    }
}

/// Thresholds for the basic classifier and the advanced overlays
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeThresholds {
    pub volatile_atr_ratio: f64,
    pub volatile_bb_percentile: f64,
    pub stable_atr_ratio: f64,
    pub stable_bb_percentile: f64,
    /// Pre-breakout tension requires the composite ATR ratio below this
    pub tension_max_atr_ratio: f64,
    /// Composite ATR ratio that counts as "still above baseline" after a breakout
    pub decay_min_atr_ratio: f64,
    /// Fragmented chop requires composite directional strength below this
    pub chop_max_adx: f64,
}

impl Default for RegimeThresholds {
    fn default() -> Self {
        RegimeThresholds {
            volatile_atr_ratio: 1.3,
            volatile_bb_percentile: 70.0,
            stable_atr_ratio: 0.95,
            stable_bb_percentile: 40.0,
            tension_max_atr_ratio: 1.0,
            decay_min_atr_ratio: 1.2,
            chop_max_adx: 20.0,
        }
    }
}
