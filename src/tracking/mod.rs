//! Rolling state and breakout persistence

pub mod ledger;
pub mod ring;
pub mod store;

pub use ledger::{
    BreakType, BreakoutEvent, BreakoutLedger, MemoryBreakoutLedger, NewBreakout,
    RecordedBreakout, SqliteBreakoutLedger,
};
pub use ring::RingBuffer;
pub use store::{
    AtrHistoryEntry, BreakoutAge, TrackingStore, VolatilitySpikeRecord, WickRatioEntry,
};
