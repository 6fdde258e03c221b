//! Tracking store
//!
//! Holds all mutable state of the engine: per-symbol, per-timeframe ATR and
//! wick-ratio ring buffers, in-flight volatility spikes, and a cache in front
//! of the durable breakout ledger.
//!
//! Locking: one coarse mutex guards every in-memory map. The ledger carries
//! its own lock, and the coarse lock is never held across a ledger call, so
//! disk latency does not stall rolling-history updates for other symbols.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use super::ledger::{
    BreakType, BreakoutEvent, BreakoutLedger, MemoryBreakoutLedger, NewBreakout,
    RecordedBreakout, SqliteBreakoutLedger,
};
use super::ring::RingBuffer;
use crate::config::TrackingConfig;
use crate::error::RegimeError;
use crate::types::{Symbol, Timeframe};

// =============================================================================
// Entries
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AtrHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub atr_fast: f64,
    pub atr_slow: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WickRatioEntry {
    pub timestamp: DateTime<Utc>,
    pub ratio: f64,
}

/// An ATR spike in progress, kept until it resolves or is cleared
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolatilitySpikeRecord {
    pub symbol: Symbol,
    pub timeframe: Timeframe,
    pub spike_start: DateTime<Utc>,
    pub spike_atr: f64,
    /// Highest ATR seen since the spike started
    pub peak_atr: f64,
}

/// Age of the latest active breakout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakoutAge {
    pub event: BreakoutEvent,
    pub minutes: f64,
    pub is_recent: bool,
}

// =============================================================================
// State
// =============================================================================

#[derive(Debug)]
struct TimeframeTracking {
    atr: RingBuffer<AtrHistoryEntry>,
    wick: RingBuffer<WickRatioEntry>,
    spike: Option<VolatilitySpikeRecord>,
}

impl TimeframeTracking {
    fn new(capacity: usize) -> Self {
        Self {
            atr: RingBuffer::new(capacity),
            wick: RingBuffer::new(capacity),
            spike: None,
        }
    }
}

#[derive(Debug, Default)]
struct TrackingState {
    symbols: HashMap<Symbol, HashMap<Timeframe, TimeframeTracking>>,
    /// Latest active breakout per key; `None` caches "ledger has nothing"
    breakout_cache: HashMap<(Symbol, Timeframe), Option<BreakoutEvent>>,
}

impl TrackingState {
    fn timeframe_mut(
        &mut self,
        symbol: &Symbol,
        timeframe: Timeframe,
        capacity: usize,
    ) -> &mut TimeframeTracking {
        self.symbols
            .entry(symbol.clone())
            .or_default()
            .entry(timeframe)
            .or_insert_with(|| TimeframeTracking::new(capacity))
    }

    fn timeframe(&self, symbol: &Symbol, timeframe: Timeframe) -> Option<&TimeframeTracking> {
        self.symbols.get(symbol)?.get(&timeframe)
    }
}

// =============================================================================
// Store
// =============================================================================

pub struct TrackingStore {
    state: Mutex<TrackingState>,
    ledger: Box<dyn BreakoutLedger>,
    config: TrackingConfig,
}

impl TrackingStore {
    pub fn new(config: TrackingConfig, ledger: Box<dyn BreakoutLedger>) -> Self {
        Self {
            state: Mutex::new(TrackingState::default()),
            ledger,
            config,
        }
    }

    /// Store with a volatile in-memory ledger
    pub fn in_memory(config: TrackingConfig) -> Self {
        Self::new(config, Box::new(MemoryBreakoutLedger::new()))
    }

    /// SQLite ledger at `config.ledger_path`, or in-memory when unset
    pub fn from_config(config: TrackingConfig) -> Result<Self, RegimeError> {
        match &config.ledger_path {
            Some(path) => {
                let ledger = SqliteBreakoutLedger::open(path)?;
                Ok(Self::new(config, Box::new(ledger)))
            }
            None => {
                info!("No ledger path configured, breakouts kept in memory");
                Ok(Self::in_memory(config))
            }
        }
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, TrackingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate tracking containers for a symbol; idempotent
    pub fn ensure_tracking(&self, symbol: &Symbol) {
        let mut state = self.state();
        if !state.symbols.contains_key(symbol) {
            debug!("Tracking initialised for {}", symbol);
            state.symbols.insert(symbol.clone(), HashMap::new());
        }
    }

    pub fn tracked_symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.state().symbols.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    // -------------------------------------------------------------------------
    // Rolling histories
    // -------------------------------------------------------------------------

    /// Append to the bounded ATR history; a repeat of the newest timestamp replaces it
    pub fn record_atr(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        timestamp: DateTime<Utc>,
        atr_fast: f64,
        atr_slow: f64,
    ) {
        let entry = AtrHistoryEntry {
            timestamp,
            atr_fast,
            atr_slow,
        };
        let mut state = self.state();
        let tracking = state.timeframe_mut(symbol, timeframe, self.config.history_capacity);
        match tracking.atr.last() {
            Some(last) if last.timestamp == timestamp => tracking.atr.replace_last(entry),
            _ => {
                tracking.atr.push(entry);
            }
        }
    }

    /// Same lifecycle as [`Self::record_atr`]
    pub fn record_wick_ratio(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        timestamp: DateTime<Utc>,
        ratio: f64,
    ) {
        let entry = WickRatioEntry { timestamp, ratio };
        let mut state = self.state();
        let tracking = state.timeframe_mut(symbol, timeframe, self.config.history_capacity);
        match tracking.wick.last() {
            Some(last) if last.timestamp == timestamp => tracking.wick.replace_last(entry),
            _ => {
                tracking.wick.push(entry);
            }
        }
    }

    /// Oldest-first snapshot of the ATR history
    pub fn atr_history(&self, symbol: &Symbol, timeframe: Timeframe) -> Vec<AtrHistoryEntry> {
        self.state()
            .timeframe(symbol, timeframe)
            .map(|t| t.atr.to_vec())
            .unwrap_or_default()
    }

    pub fn wick_history(&self, symbol: &Symbol, timeframe: Timeframe) -> Vec<WickRatioEntry> {
        self.state()
            .timeframe(symbol, timeframe)
            .map(|t| t.wick.to_vec())
            .unwrap_or_default()
    }

    // -------------------------------------------------------------------------
    // Volatility spikes
    // -------------------------------------------------------------------------

    pub fn active_spike(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
    ) -> Option<VolatilitySpikeRecord> {
        self.state()
            .timeframe(symbol, timeframe)
            .and_then(|t| t.spike.clone())
    }

    pub fn set_spike(&self, record: VolatilitySpikeRecord) {
        let mut state = self.state();
        let tracking =
            state.timeframe_mut(&record.symbol, record.timeframe, self.config.history_capacity);
        tracking.spike = Some(record);
    }

    pub fn clear_spike(&self, symbol: &Symbol, timeframe: Timeframe) {
        let mut state = self.state();
        if let Some(tracking) = state
            .symbols
            .get_mut(symbol)
            .and_then(|tfs| tfs.get_mut(&timeframe))
        {
            tracking.spike = None;
        }
    }

    // -------------------------------------------------------------------------
    // Breakouts
    // -------------------------------------------------------------------------

    /// Persist a breakout and deactivate prior active ones for the key
    ///
    /// When the ledger is unavailable the breakout is still cached in memory
    /// (with id 0) so in-process classification keeps seeing it, and the
    /// storage error is returned.
    pub fn record_breakout(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        break_type: BreakType,
        price: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<RecordedBreakout, RegimeError> {
        self.ensure_tracking(symbol);

        let breakout = NewBreakout {
            symbol: symbol.clone(),
            timeframe,
            break_type,
            price,
            timestamp,
        };

        match self.ledger.record(&breakout) {
            Ok(recorded) => {
                self.state()
                    .breakout_cache
                    .insert((symbol.clone(), timeframe), Some(recorded.event.clone()));
                info!(
                    "{} {} {} breakout @ {:.5}{}",
                    symbol,
                    timeframe,
                    break_type,
                    price,
                    match (recorded.invalidated, recorded.superseded) {
                        (0, 0) => String::new(),
                        (i, 0) => format!(" (invalidated {} prior)", i),
                        (0, s) => format!(" (superseded {} prior)", s),
                        (i, s) => format!(" (invalidated {} prior, superseded {})", i, s),
                    }
                );
                Ok(recorded)
            }
            Err(e) => {
                warn!("Breakout ledger write failed for {} {}: {}", symbol, timeframe, e);
                let provisional = BreakoutEvent {
                    id: 0,
                    symbol: symbol.clone(),
                    timeframe,
                    break_type,
                    price,
                    timestamp,
                    is_active: true,
                    invalidated_at: None,
                };
                self.state()
                    .breakout_cache
                    .insert((symbol.clone(), timeframe), Some(provisional));
                Err(e)
            }
        }
    }

    /// Latest active breakout, from the cache or, on a miss, the ledger
    pub fn latest_breakout(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
    ) -> Result<Option<BreakoutEvent>, RegimeError> {
        let key = (symbol.clone(), timeframe);
        if let Some(cached) = self.state().breakout_cache.get(&key) {
            return Ok(cached.clone());
        }

        let loaded = self.ledger.latest_active(symbol, timeframe)?;
        self.state().breakout_cache.insert(key, loaded.clone());
        Ok(loaded)
    }

    /// Elapsed time since the latest active breakout
    ///
    /// `Ok(None)` when there is none or it is older than the configured
    /// horizon. Ledger failures surface as `StorageUnavailable`.
    pub fn time_since_breakout(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) -> Result<Option<BreakoutAge>, RegimeError> {
        let Some(event) = self.latest_breakout(symbol, timeframe)? else {
            return Ok(None);
        };

        let elapsed = (now - event.timestamp).max(Duration::zero());
        if elapsed > Duration::minutes(self.config.breakout_horizon_minutes) {
            return Ok(None);
        }

        let minutes = elapsed.num_milliseconds() as f64 / 60_000.0;
        let is_recent =
            event.is_active && elapsed < Duration::minutes(self.config.recent_breakout_minutes);

        Ok(Some(BreakoutAge {
            event,
            minutes,
            is_recent,
        }))
    }

    /// Deactivate breakouts older than the expiry window
    pub fn expire_breakouts(&self, now: DateTime<Utc>) -> Result<usize, RegimeError> {
        let cutoff = now - Duration::minutes(self.config.breakout_expiry_minutes);
        let expired = self.ledger.expire_before(cutoff, now)?;

        self.state().breakout_cache.retain(|_, cached| match cached {
            Some(event) => event.timestamp >= cutoff,
            None => true,
        });

        if expired > 0 {
            info!("Expired {} breakouts older than {}", expired, cutoff);
        }
        Ok(expired)
    }

    pub fn breakouts_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<BreakoutEvent>, RegimeError> {
        self.ledger.events_between(from, to)
    }
}
