//! Volatility Regime Engine
//!
//! Classifies the volatility regime of an instrument from multi-timeframe
//! OHLCV history: three basic states (stable, transitional, volatile) with
//! four advanced overlays (pre-breakout tension, post-breakout decay,
//! fragmented chop, session-switch flare) evaluated in priority order.
//!
//! Rolling ATR and wick history plus a durable breakout ledger live in a
//! shared [`tracking::TrackingStore`]; every calculator degrades to a neutral
//! reading on short or malformed data, so classification never fails.

pub mod classifier;
pub mod config;
pub mod error;
pub mod indicators;
pub mod metrics;
pub mod normalize;
pub mod strategy_map;
pub mod tracking;
pub mod types;

pub use classifier::{
    ClassificationRequest, RegimeClassifier, RegimeResult, RegimeSignals, VolatilityRegime,
};
pub use config::RegimeConfig;
pub use error::RegimeError;
pub use normalize::{load_csv, normalize, CandleSeries, RateInput};
pub use strategy_map::{apply_adjustment, StrategyGuidance, StrategyMapper, StrategyVerdict};
pub use tracking::{BreakType, BreakoutEvent, BreakoutLedger, TrackingStore};
pub use types::*;
