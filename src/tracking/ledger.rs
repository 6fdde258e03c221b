// Breakout ledger
// Durable, append-mostly log of structural breakout events
//
// Detection logic only sees the `BreakoutLedger` trait, so the backing store
// (SQLite on disk, SQLite in memory, plain Vec for tests) is swappable.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use crate::error::RegimeError;
use crate::types::{Symbol, Timeframe};

// =============================================================================
// Data Models
// =============================================================================

/// Direction of a structural break
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakType {
    Bullish,
    Bearish,
}

impl BreakType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakType::Bullish => "bullish",
            BreakType::Bearish => "bearish",
        }
    }

    pub fn opposite(&self) -> BreakType {
        match self {
            BreakType::Bullish => BreakType::Bearish,
            BreakType::Bearish => BreakType::Bullish,
        }
    }
}

impl std::fmt::Display for BreakType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for BreakType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bullish" | "bull" | "up" => Ok(BreakType::Bullish),
            "bearish" | "bear" | "down" => Ok(BreakType::Bearish),
            _ => Err(format!("Unknown break type: {}", s)),
        }
    }
}

/// One row of the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakoutEvent {
    pub id: i64,
    pub symbol: Symbol,
    pub timeframe: Timeframe,
    pub break_type: BreakType,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    pub is_active: bool,
    pub invalidated_at: Option<DateTime<Utc>>,
}

/// Breakout about to be written
#[derive(Debug, Clone, PartialEq)]
pub struct NewBreakout {
    pub symbol: Symbol,
    pub timeframe: Timeframe,
    pub break_type: BreakType,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of [`BreakoutLedger::record`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedBreakout {
    pub event: BreakoutEvent,
    /// Opposing breakouts for the same symbol/timeframe, now inactive with `invalidated_at` set
    pub invalidated: usize,
    /// Older same-direction breakouts, now inactive without `invalidated_at`
    pub superseded: usize,
}

// =============================================================================
// Storage Interface
// =============================================================================

pub trait BreakoutLedger: Send + Sync {
    /// Insert a breakout and deactivate every other active breakout for the
    /// same symbol/timeframe, atomically. Opposing breaks are invalidated
    /// (stamped with `invalidated_at`); older same-direction breaks are
    /// superseded (inactive, `invalidated_at` left empty).
    fn record(&self, breakout: &NewBreakout) -> Result<RecordedBreakout, RegimeError>;

    /// Most recent active breakout for the symbol/timeframe
    fn latest_active(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
    ) -> Result<Option<BreakoutEvent>, RegimeError>;

    /// Deactivate a single event; false when it was already inactive or unknown
    fn invalidate(&self, id: i64, at: DateTime<Utc>) -> Result<bool, RegimeError>;

    /// Deactivate every active breakout that happened before `cutoff`
    fn expire_before(&self, cutoff: DateTime<Utc>, at: DateTime<Utc>) -> Result<usize, RegimeError>;

    /// All events with `from <= timestamp <= to`, oldest first
    fn events_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<BreakoutEvent>, RegimeError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// SQLite Backend
// =============================================================================

pub struct SqliteBreakoutLedger {
    conn: Mutex<Connection>,
}

impl SqliteBreakoutLedger {
    /// Open (or create) an on-disk ledger
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RegimeError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                RegimeError::StorageUnavailable(format!("{}: {}", parent.display(), e))
            })?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let ledger = Self::with_connection(conn)?;
        info!("Breakout ledger opened at {}", path.display());
        Ok(ledger)
    }

    /// Ledger backed by a private in-memory database
    pub fn in_memory() -> Result<Self, RegimeError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, RegimeError> {
        let ledger = Self {
            conn: Mutex::new(conn),
        };
        ledger.create_tables()?;
        Ok(ledger)
    }

    fn create_tables(&self) -> Result<(), RegimeError> {
        let conn = lock(&self.conn);

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS breakout_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                break_type TEXT NOT NULL,
                break_price REAL NOT NULL,
                break_timestamp INTEGER NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                invalidated_at INTEGER,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_breakouts_active
                ON breakout_events(symbol, timeframe, is_active);
            CREATE INDEX IF NOT EXISTS idx_breakouts_timestamp
                ON breakout_events(break_timestamp);",
        )?;

        debug!("Breakout ledger schema created/verified");
        Ok(())
    }
}

const SELECT_COLUMNS: &str = "SELECT id, symbol, timeframe, break_type, break_price, \
     break_timestamp, is_active, invalidated_at FROM breakout_events";

fn conversion_error(col: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(col, Type::Text, msg.into())
}

fn millis_to_datetime(col: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| conversion_error(col, format!("timestamp out of range: {}", ms)))
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<BreakoutEvent> {
    let symbol: String = row.get(1)?;
    let timeframe: String = row.get(2)?;
    let break_type: String = row.get(3)?;
    let invalidated_at: Option<i64> = row.get(7)?;

    Ok(BreakoutEvent {
        id: row.get(0)?,
        symbol: Symbol::new(symbol),
        timeframe: timeframe.parse().map_err(|e| conversion_error(2, e))?,
        break_type: break_type.parse().map_err(|e| conversion_error(3, e))?,
        price: row.get(4)?,
        timestamp: millis_to_datetime(5, row.get(5)?)?,
        is_active: row.get::<_, i64>(6)? != 0,
        invalidated_at: invalidated_at
            .map(|ms| millis_to_datetime(7, ms))
            .transpose()?,
    })
}

impl BreakoutLedger for SqliteBreakoutLedger {
    fn record(&self, breakout: &NewBreakout) -> Result<RecordedBreakout, RegimeError> {
        let mut conn = lock(&self.conn);
        let tx = conn.transaction()?;

        let invalidated = tx.execute(
            "UPDATE breakout_events SET is_active = 0, invalidated_at = ?3
             WHERE symbol = ?1 AND timeframe = ?2 AND is_active = 1 AND break_type = ?4",
            params![
                breakout.symbol.as_str(),
                breakout.timeframe.as_str(),
                breakout.timestamp.timestamp_millis(),
                breakout.break_type.opposite().as_str(),
            ],
        )?;
        let superseded = tx.execute(
            "UPDATE breakout_events SET is_active = 0
             WHERE symbol = ?1 AND timeframe = ?2 AND is_active = 1 AND break_type = ?3",
            params![
                breakout.symbol.as_str(),
                breakout.timeframe.as_str(),
                breakout.break_type.as_str(),
            ],
        )?;

        tx.execute(
            "INSERT INTO breakout_events
             (symbol, timeframe, break_type, break_price, break_timestamp, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, 1)",
            params![
                breakout.symbol.as_str(),
                breakout.timeframe.as_str(),
                breakout.break_type.as_str(),
                breakout.price,
                breakout.timestamp.timestamp_millis(),
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        debug!(
            "Breakout recorded: {} {} {} @ {:.5} (id={}, invalidated {}, superseded {})",
            breakout.symbol,
            breakout.timeframe,
            breakout.break_type,
            breakout.price,
            id,
            invalidated,
            superseded
        );

        Ok(RecordedBreakout {
            event: BreakoutEvent {
                id,
                symbol: breakout.symbol.clone(),
                timeframe: breakout.timeframe,
                break_type: breakout.break_type,
                price: breakout.price,
                timestamp: breakout.timestamp,
                is_active: true,
                invalidated_at: None,
            },
            invalidated,
            superseded,
        })
    }

    fn latest_active(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
    ) -> Result<Option<BreakoutEvent>, RegimeError> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(&format!(
            "{} WHERE symbol = ?1 AND timeframe = ?2 AND is_active = 1
             ORDER BY break_timestamp DESC, id DESC LIMIT 1",
            SELECT_COLUMNS
        ))?;

        match stmt.query_row(params![symbol.as_str(), timeframe.as_str()], row_to_event) {
            Ok(event) => Ok(Some(event)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn invalidate(&self, id: i64, at: DateTime<Utc>) -> Result<bool, RegimeError> {
        let conn = lock(&self.conn);
        let changed = conn.execute(
            "UPDATE breakout_events SET is_active = 0, invalidated_at = ?2
             WHERE id = ?1 AND is_active = 1",
            params![id, at.timestamp_millis()],
        )?;
        Ok(changed > 0)
    }

    fn expire_before(&self, cutoff: DateTime<Utc>, at: DateTime<Utc>) -> Result<usize, RegimeError> {
        let conn = lock(&self.conn);
        let changed = conn.execute(
            "UPDATE breakout_events SET is_active = 0, invalidated_at = ?2
             WHERE is_active = 1 AND break_timestamp < ?1",
            params![cutoff.timestamp_millis(), at.timestamp_millis()],
        )?;
        Ok(changed)
    }

    fn events_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<BreakoutEvent>, RegimeError> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(&format!(
            "{} WHERE break_timestamp BETWEEN ?1 AND ?2 ORDER BY break_timestamp, id",
            SELECT_COLUMNS
        ))?;
        let events = stmt
            .query_map(
                params![from.timestamp_millis(), to.timestamp_millis()],
                row_to_event,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }
}

// =============================================================================
// In-Memory Backend
// =============================================================================

/// Vec-backed ledger with the same semantics as the SQLite one
#[derive(Default)]
pub struct MemoryBreakoutLedger {
    events: Mutex<Vec<BreakoutEvent>>,
}

impl MemoryBreakoutLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.events).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BreakoutLedger for MemoryBreakoutLedger {
    fn record(&self, breakout: &NewBreakout) -> Result<RecordedBreakout, RegimeError> {
        let mut events = lock(&self.events);

        let (mut invalidated, mut superseded) = (0, 0);
        for e in events.iter_mut().filter(|e| {
            e.is_active && e.symbol == breakout.symbol && e.timeframe == breakout.timeframe
        }) {
            e.is_active = false;
            if e.break_type == breakout.break_type {
                superseded += 1;
            } else {
                e.invalidated_at = Some(breakout.timestamp);
                invalidated += 1;
            }
        }

        let event = BreakoutEvent {
            id: events.len() as i64 + 1,
            symbol: breakout.symbol.clone(),
            timeframe: breakout.timeframe,
            break_type: breakout.break_type,
            price: breakout.price,
            timestamp: breakout.timestamp,
            is_active: true,
            invalidated_at: None,
        };
        events.push(event.clone());

        Ok(RecordedBreakout {
            event,
            invalidated,
            superseded,
        })
    }

    fn latest_active(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
    ) -> Result<Option<BreakoutEvent>, RegimeError> {
        let events = lock(&self.events);
        Ok(events
            .iter()
            .filter(|e| e.is_active && &e.symbol == symbol && e.timeframe == timeframe)
            .max_by_key(|e| (e.timestamp, e.id))
            .cloned())
    }

    fn invalidate(&self, id: i64, at: DateTime<Utc>) -> Result<bool, RegimeError> {
        let mut events = lock(&self.events);
        match events.iter_mut().find(|e| e.id == id && e.is_active) {
            Some(e) => {
                e.is_active = false;
                e.invalidated_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn expire_before(&self, cutoff: DateTime<Utc>, at: DateTime<Utc>) -> Result<usize, RegimeError> {
        let mut events = lock(&self.events);
        let mut expired = 0;
        for e in events.iter_mut().filter(|e| e.is_active && e.timestamp < cutoff) {
            e.is_active = false;
            e.invalidated_at = Some(at);
            expired += 1;
        }
        Ok(expired)
    }

    fn events_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<BreakoutEvent>, RegimeError> {
        let events = lock(&self.events);
        let mut found: Vec<BreakoutEvent> = events
            .iter()
            .filter(|e| e.timestamp >= from && e.timestamp <= to)
            .cloned()
            .collect();
        found.sort_by_key(|e| (e.timestamp, e.id));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn breakout(symbol: &str, break_type: BreakType, minutes_ago: i64) -> NewBreakout {
        NewBreakout {
            symbol: Symbol::new(symbol),
            timeframe: Timeframe::M15,
            break_type,
            price: 1.0850,
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    fn ledgers() -> Vec<Box<dyn BreakoutLedger>> {
        vec![
            Box::new(SqliteBreakoutLedger::in_memory().unwrap()),
            Box::new(MemoryBreakoutLedger::new()),
        ]
    }

    #[test]
    fn test_opposing_breakout_invalidates_prior() {
        for ledger in ledgers() {
            let first = ledger.record(&breakout("EURUSD", BreakType::Bullish, 20)).unwrap();
            assert_eq!(first.invalidated, 0);

            let second = ledger.record(&breakout("EURUSD", BreakType::Bearish, 5)).unwrap();
            assert_eq!(second.invalidated, 1);

            let active = ledger
                .latest_active(&Symbol::new("EURUSD"), Timeframe::M15)
                .unwrap()
                .unwrap();
            assert_eq!(active.id, second.event.id);
            assert_eq!(active.break_type, BreakType::Bearish);

            let all = ledger
                .events_between(Utc::now() - Duration::hours(1), Utc::now())
                .unwrap();
            assert_eq!(all.len(), 2);
            assert!(!all[0].is_active);
            assert!(all[0].invalidated_at.is_some());
        }
    }

    #[test]
    fn test_same_direction_breakout_supersedes_without_invalidating() {
        for ledger in ledgers() {
            ledger.record(&breakout("EURUSD", BreakType::Bullish, 20)).unwrap();
            let second = ledger.record(&breakout("EURUSD", BreakType::Bullish, 5)).unwrap();
            assert_eq!(second.invalidated, 0);
            assert_eq!(second.superseded, 1);

            let active = ledger
                .latest_active(&Symbol::new("EURUSD"), Timeframe::M15)
                .unwrap()
                .unwrap();
            assert_eq!(active.id, second.event.id);

            let all = ledger
                .events_between(Utc::now() - Duration::hours(1), Utc::now())
                .unwrap();
            assert_eq!(all.len(), 2);
            assert!(!all[0].is_active);
            assert!(all[0].invalidated_at.is_none());
        }
    }

    #[test]
    fn test_partitioned_by_symbol() {
        for ledger in ledgers() {
            ledger.record(&breakout("EURUSD", BreakType::Bullish, 10)).unwrap();
            let other = ledger.record(&breakout("GBPUSD", BreakType::Bearish, 5)).unwrap();
            assert_eq!(other.invalidated, 0);
            assert!(ledger
                .latest_active(&Symbol::new("EURUSD"), Timeframe::M15)
                .unwrap()
                .is_some());
            assert!(ledger
                .latest_active(&Symbol::new("EURUSD"), Timeframe::H1)
                .unwrap()
                .is_none());
        }
    }

    #[test]
    fn test_expire_and_invalidate() {
        for ledger in ledgers() {
            let old = ledger.record(&breakout("XAUUSD", BreakType::Bullish, 120)).unwrap();
            let now = Utc::now();
            assert_eq!(ledger.expire_before(now - Duration::minutes(60), now).unwrap(), 1);
            assert!(!ledger.invalidate(old.event.id, now).unwrap());

            let fresh = ledger.record(&breakout("XAUUSD", BreakType::Bullish, 1)).unwrap();
            assert!(ledger.invalidate(fresh.event.id, now).unwrap());
            assert!(ledger
                .latest_active(&Symbol::new("XAUUSD"), Timeframe::M15)
                .unwrap()
                .is_none());
        }
    }

    #[test]
    fn test_sqlite_ledger_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("breakouts.db");

        {
            let ledger = SqliteBreakoutLedger::open(&path).unwrap();
            ledger.record(&breakout("EURUSD", BreakType::Bullish, 3)).unwrap();
        }

        let reopened = SqliteBreakoutLedger::open(&path).unwrap();
        let active = reopened
            .latest_active(&Symbol::new("EURUSD"), Timeframe::M15)
            .unwrap()
            .unwrap();
        assert_eq!(active.break_type, BreakType::Bullish);
        assert!(active.is_active);
    }
}
