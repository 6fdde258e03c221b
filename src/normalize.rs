//! Rate normalization
//!
//! Adapts the shapes market-data collaborators hand us (columnar tables,
//! arrays of records, raw numeric matrices, untyped JSON, CSV files) into one
//! canonical [`CandleSeries`]. Calculators only ever see the canonical form.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::RegimeError;
use crate::types::Candle;

/// Epoch values above this are treated as milliseconds
const EPOCH_MILLIS_CUTOFF: f64 = 1e11;

// =============================================================================
// Canonical Form
// =============================================================================

/// Indicator columns a caller may precompute, aligned with the candles
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorColumns {
    pub atr_fast: Option<Vec<f64>>,
    pub atr_slow: Option<Vec<f64>>,
    pub bb_upper: Option<Vec<f64>>,
    pub bb_middle: Option<Vec<f64>>,
    pub bb_lower: Option<Vec<f64>>,
    pub adx: Option<Vec<f64>>,
}

impl IndicatorColumns {
    fn slot(&mut self, name: &str) -> Option<&mut Option<Vec<f64>>> {
        match name {
            "atr_fast" | "atr" => Some(&mut self.atr_fast),
            "atr_slow" => Some(&mut self.atr_slow),
            "bb_upper" | "upper_band" => Some(&mut self.bb_upper),
            "bb_middle" | "middle_band" => Some(&mut self.bb_middle),
            "bb_lower" | "lower_band" => Some(&mut self.bb_lower),
            "adx" => Some(&mut self.adx),
            _ => None,
        }
    }
}

/// Ordered OHLCV candles for one symbol/timeframe, most recent last
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandleSeries {
    candles: Vec<Candle>,
    indicators: IndicatorColumns,
}

impl CandleSeries {
    /// Wrap already-validated candles; they are sorted and de-duplicated
    pub fn new(mut candles: Vec<Candle>) -> Self {
        candles.sort_by_key(|c| c.datetime);
        candles.dedup_by(|later, earlier| {
            if later.datetime == earlier.datetime {
                *earlier = later.clone();
                true
            } else {
                false
            }
        });
        Self {
            candles,
            indicators: IndicatorColumns::default(),
        }
    }

    /// Attach precomputed indicator columns; columns whose length differs
    /// from the candle count are ignored by the calculators
    pub fn with_indicators(mut self, indicators: IndicatorColumns) -> Self {
        self.indicators = indicators;
        self
    }

    /// Precomputed column aligned with the candles, if one was supplied
    pub fn aligned_column<'a>(&self, column: &'a Option<Vec<f64>>) -> Option<&'a [f64]> {
        column
            .as_deref()
            .filter(|values| values.len() == self.candles.len() && !values.is_empty())
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn indicators(&self) -> &IndicatorColumns {
        &self.indicators
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn highs(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.high).collect()
    }

    pub fn lows(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.low).collect()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    /// Last `n` candles (or all of them when shorter)
    pub fn tail(&self, n: usize) -> &[Candle] {
        let start = self.candles.len().saturating_sub(n);
        &self.candles[start..]
    }
}

// =============================================================================
// Input Shapes
// =============================================================================

/// Timestamp as epoch number (seconds or milliseconds) or text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimestampValue {
    Epoch(f64),
    Text(String),
}

impl TimestampValue {
    pub fn to_datetime(&self) -> Result<DateTime<Utc>, RegimeError> {
        match self {
            TimestampValue::Epoch(v) => epoch_to_datetime(*v),
            TimestampValue::Text(s) => parse_timestamp_text(s),
        }
    }
}

impl From<DateTime<Utc>> for TimestampValue {
    fn from(dt: DateTime<Utc>) -> Self {
        TimestampValue::Text(dt.to_rfc3339())
    }
}

fn epoch_to_datetime(v: f64) -> Result<DateTime<Utc>, RegimeError> {
    if !v.is_finite() || v < 0.0 {
        return Err(RegimeError::MalformedInput(format!("bad epoch timestamp {}", v)));
    }
    let millis = if v > EPOCH_MILLIS_CUTOFF { v } else { v * 1000.0 };
    DateTime::from_timestamp_millis(millis as i64)
        .ok_or_else(|| RegimeError::MalformedInput(format!("epoch out of range: {}", v)))
}

fn parse_timestamp_text(s: &str) -> Result<DateTime<Utc>, RegimeError> {
    let s = s.trim();
    if let Ok(dt) = s.parse::<DateTime<Utc>>() {
        return Ok(dt);
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y.%m.%d %H:%M"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc));
        }
    }
    if let Ok(v) = s.parse::<f64>() {
        return epoch_to_datetime(v);
    }
    Err(RegimeError::MalformedInput(format!("unparseable timestamp: {}", s)))
}

/// One candle as a keyed record; unknown numeric keys are kept as indicator columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateRecord {
    #[serde(alias = "time", alias = "datetime", alias = "t")]
    pub timestamp: TimestampValue,
    #[serde(alias = "o")]
    pub open: f64,
    #[serde(alias = "h")]
    pub high: f64,
    #[serde(alias = "l")]
    pub low: f64,
    #[serde(alias = "c")]
    pub close: f64,
    #[serde(default, alias = "v")]
    pub volume: Option<f64>,
    #[serde(default)]
    pub tick_volume: Option<f64>,
    #[serde(default)]
    pub real_volume: Option<f64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Column-oriented table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnarRates {
    #[serde(alias = "time", alias = "datetime", alias = "t")]
    pub timestamp: Vec<TimestampValue>,
    #[serde(alias = "o")]
    pub open: Vec<f64>,
    #[serde(alias = "h")]
    pub high: Vec<f64>,
    #[serde(alias = "l")]
    pub low: Vec<f64>,
    #[serde(alias = "c")]
    pub close: Vec<f64>,
    #[serde(default, alias = "v")]
    pub volume: Option<Vec<f64>>,
    #[serde(default)]
    pub tick_volume: Option<Vec<f64>>,
    #[serde(default)]
    pub real_volume: Option<Vec<f64>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Pick one volume out of the fields a feed may send
///
/// An explicit `volume` wins. MT5-style payloads carry both `tick_volume` and
/// `real_volume`, where the latter is zero for most FX symbols, so a non-zero
/// tick volume is preferred before falling back to the real one.
fn resolve_volume(volume: Option<f64>, tick_volume: Option<f64>, real_volume: Option<f64>) -> f64 {
    volume
        .or(tick_volume.filter(|v| *v != 0.0))
        .or(real_volume)
        .or(tick_volume)
        .unwrap_or(0.0)
}

/// Any input shape the normalizer accepts
///
/// Matrix rows are `[timestamp, open, high, low, close, volume?]`. Variant
/// order matters for untagged deserialization: a matrix would otherwise be
/// accepted as a sequence-encoded record or table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RateInput {
    Matrix(Vec<Vec<f64>>),
    Records(Vec<RateRecord>),
    Columnar(ColumnarRates),
}

impl RateInput {
    /// Dispatch untyped JSON onto one of the known shapes
    pub fn from_json(value: serde_json::Value) -> Result<Self, RegimeError> {
        serde_json::from_value(value).map_err(|e| {
            RegimeError::MalformedInput(format!("unrecognised rate shape: {}", e))
        })
    }

    /// Normalize into the canonical series
    pub fn normalize(&self) -> Result<CandleSeries, RegimeError> {
        normalize(self)
    }
}

// =============================================================================
// Normalization
// =============================================================================

struct RawRow {
    candle: Candle,
    extra: Vec<(String, f64)>,
}

/// Convert any supported input into a sorted, validated [`CandleSeries`]
///
/// Invalid rows are skipped with a warning. An input whose rows are all
/// invalid is `MalformedInput`; an empty input is an empty series.
pub fn normalize(input: &RateInput) -> Result<CandleSeries, RegimeError> {
    let (rows, total) = match input {
        RateInput::Matrix(matrix) => (rows_from_matrix(matrix), matrix.len()),
        RateInput::Records(records) => (rows_from_records(records), records.len()),
        RateInput::Columnar(table) => {
            let n = table.timestamp.len();
            (rows_from_columnar(table)?, n)
        }
    };

    if total == 0 {
        return Ok(CandleSeries::default());
    }

    if rows.is_empty() {
        return Err(RegimeError::MalformedInput(format!(
            "all {} rows failed validation",
            total
        )));
    }

    let skipped = total - rows.len();
    if skipped > 0 {
        warn!("Skipped {} invalid rows out of {}", skipped, total);
    }

    Ok(assemble(rows))
}

fn rows_from_matrix(matrix: &[Vec<f64>]) -> Vec<RawRow> {
    matrix
        .iter()
        .enumerate()
        .filter_map(|(idx, row)| {
            if row.len() < 5 {
                debug!("Matrix row {} has {} columns, need at least 5", idx, row.len());
                return None;
            }
            let datetime = epoch_to_datetime(row[0])
                .map_err(|e| debug!("Matrix row {}: {}", idx, e))
                .ok()?;
            let volume = row.get(5).copied().unwrap_or(0.0);
            build_row(idx, datetime, row[1], row[2], row[3], row[4], volume, Vec::new())
        })
        .collect()
}

fn rows_from_records(records: &[RateRecord]) -> Vec<RawRow> {
    records
        .iter()
        .enumerate()
        .filter_map(|(idx, r)| {
            let datetime = r
                .timestamp
                .to_datetime()
                .map_err(|e| debug!("Record {}: {}", idx, e))
                .ok()?;
            let extra = numeric_extras(&r.extra);
            let volume = resolve_volume(r.volume, r.tick_volume, r.real_volume);
            build_row(idx, datetime, r.open, r.high, r.low, r.close, volume, extra)
        })
        .collect()
}

fn rows_from_columnar(table: &ColumnarRates) -> Result<Vec<RawRow>, RegimeError> {
    let n = table.timestamp.len();
    let lengths = [table.open.len(), table.high.len(), table.low.len(), table.close.len()];
    let volume_columns = [&table.volume, &table.tick_volume, &table.real_volume];
    if lengths.iter().any(|&len| len != n)
        || volume_columns
            .iter()
            .any(|col| col.as_ref().is_some_and(|v| v.len() != n))
    {
        return Err(RegimeError::MalformedInput(format!(
            "column lengths differ: timestamp={} open={} high={} low={} close={}",
            n, lengths[0], lengths[1], lengths[2], lengths[3]
        )));
    }

    let columns: Vec<(String, Vec<f64>)> = table
        .extra
        .iter()
        .filter_map(|(name, value)| {
            let values: Vec<f64> = value
                .as_array()?
                .iter()
                .map(|v| v.as_f64().unwrap_or(f64::NAN))
                .collect();
            (values.len() == n).then(|| (name.to_lowercase(), values))
        })
        .collect();

    Ok((0..n)
        .filter_map(|i| {
            let datetime = table.timestamp[i]
                .to_datetime()
                .map_err(|e| debug!("Row {}: {}", i, e))
                .ok()?;
            let at = |col: &Option<Vec<f64>>| col.as_ref().map(|v| v[i]);
            let volume = resolve_volume(at(&table.volume), at(&table.tick_volume), at(&table.real_volume));
            let extra = columns
                .iter()
                .map(|(name, values)| (name.clone(), values[i]))
                .collect();
            build_row(
                i,
                datetime,
                table.open[i],
                table.high[i],
                table.low[i],
                table.close[i],
                volume,
                extra,
            )
        })
        .collect())
}

#[allow(clippy::too_many_arguments)]
fn build_row(
    idx: usize,
    datetime: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    extra: Vec<(String, f64)>,
) -> Option<RawRow> {
    match Candle::new(datetime, open, high, low, close, volume) {
        Ok(candle) => Some(RawRow { candle, extra }),
        Err(e) => {
            debug!("Skipping invalid candle at row {}: {}", idx, e);
            None
        }
    }
}

fn numeric_extras(extra: &BTreeMap<String, serde_json::Value>) -> Vec<(String, f64)> {
    extra
        .iter()
        .filter_map(|(k, v)| v.as_f64().map(|f| (k.to_lowercase(), f)))
        .collect()
}

/// Sort, collapse duplicate timestamps (last wins) and align indicator columns
fn assemble(mut rows: Vec<RawRow>) -> CandleSeries {
    rows.sort_by_key(|r| r.candle.datetime);

    let mut deduped: Vec<RawRow> = Vec::with_capacity(rows.len());
    for row in rows {
        match deduped.last_mut() {
            Some(prev) if prev.candle.datetime == row.candle.datetime => *prev = row,
            _ => deduped.push(row),
        }
    }

    let mut indicators = IndicatorColumns::default();
    let names: Vec<String> = deduped
        .first()
        .map(|r| r.extra.iter().map(|(k, _)| k.clone()).collect())
        .unwrap_or_default();

    for name in names {
        let values: Option<Vec<f64>> = deduped
            .iter()
            .map(|r| {
                r.extra
                    .iter()
                    .find(|(k, _)| *k == name)
                    .map(|(_, v)| *v)
                    .filter(|v| v.is_finite())
            })
            .collect();
        // A column with any gap is dropped and recomputed downstream
        if let (Some(values), Some(slot)) = (values, indicators.slot(&name)) {
            *slot = Some(values);
        }
    }

    CandleSeries {
        candles: deduped.into_iter().map(|r| r.candle).collect(),
        indicators,
    }
}

// =============================================================================
// CSV Loading
// =============================================================================

/// Load a CSV file with a header row into the canonical form
///
/// Recognised headers: `datetime`/`timestamp`/`time`, `open`, `high`, `low`,
/// `close`, `volume`, `tick_volume`, `real_volume`, plus any indicator
/// columns. Without a recognisable header the first six columns are read
/// positionally.
pub fn load_csv(path: impl AsRef<Path>) -> Result<CandleSeries> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file: {}", path.display()))?;

    let headers: Vec<String> = reader
        .headers()
        .context("Failed to read CSV header")?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();

    let find = |names: &[&str], fallback: usize| {
        headers
            .iter()
            .position(|h| names.contains(&h.as_str()))
            .unwrap_or(fallback)
    };
    let ts_col = find(&["datetime", "timestamp", "time", "date"], 0);
    let open_col = find(&["open", "o"], 1);
    let high_col = find(&["high", "h"], 2);
    let low_col = find(&["low", "l"], 3);
    let close_col = find(&["close", "c"], 4);
    let position = |names: &[&str]| headers.iter().position(|h| names.contains(&h.as_str()));
    let tick_volume_col = position(&["tick_volume", "tickvol"]);
    let real_volume_col = position(&["real_volume", "vol"]);
    let volume_col = position(&["volume", "v"]).or_else(|| {
        (tick_volume_col.is_none() && real_volume_col.is_none() && headers.len() > 5).then_some(5)
    });

    let known = [
        Some(ts_col),
        Some(open_col),
        Some(high_col),
        Some(low_col),
        Some(close_col),
        volume_col,
        tick_volume_col,
        real_volume_col,
    ];

    let mut records = Vec::new();
    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read row {}", row_idx + 1))?;

        let field = |col: usize| -> f64 {
            record
                .get(col)
                .and_then(|s| s.trim().parse::<f64>().ok())
                .unwrap_or(f64::NAN)
        };
        let optional = |col: Option<usize>| -> Option<f64> {
            record.get(col?).and_then(|s| s.trim().parse::<f64>().ok())
        };

        let extra = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| !known.contains(&Some(*i)))
            .filter_map(|(i, name)| {
                let value = record.get(i)?.trim().parse::<f64>().ok()?;
                Some((name.clone(), serde_json::json!(value)))
            })
            .collect();

        records.push(RateRecord {
            timestamp: TimestampValue::Text(record.get(ts_col).unwrap_or_default().to_string()),
            open: field(open_col),
            high: field(high_col),
            low: field(low_col),
            close: field(close_col),
            volume: optional(volume_col),
            tick_volume: optional(tick_volume_col),
            real_volume: optional(real_volume_col),
            extra,
        });
    }

    let series = normalize(&RateInput::Records(records))
        .with_context(|| format!("Failed to normalize {}", path.display()))?;
    debug!("Loaded {} candles from {}", series.len(), path.display());
    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(minute: i64) -> f64 {
        (Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap().timestamp() + minute * 60) as f64
    }

    #[test]
    fn test_matrix_input_sorted_and_validated() {
        let input = RateInput::Matrix(vec![
            vec![ts(5), 100.0, 101.0, 99.0, 100.5, 10.0],
            vec![ts(0), 100.0, 101.0, 99.0, 100.2],
            vec![ts(10), 100.0, 99.0, 101.0, 100.0, 10.0], // high < low
        ]);
        let series = normalize(&input).unwrap();
        assert_eq!(series.len(), 2);
        assert!(series.candles()[0].datetime < series.candles()[1].datetime);
        assert_eq!(series.candles()[0].volume, 0.0);
    }

    #[test]
    fn test_epoch_millis_detected() {
        let secs = ts(0);
        let input = RateInput::Matrix(vec![vec![secs * 1000.0, 1.0, 1.1, 0.9, 1.0]]);
        let series = normalize(&input).unwrap();
        assert_eq!(series.candles()[0].datetime.timestamp(), secs as i64);
    }

    #[test]
    fn test_records_from_json_with_aliases_and_indicators() {
        let value = serde_json::json!([
            { "time": "2024-03-04T10:00:00Z", "o": 1.0, "h": 1.2, "l": 0.9, "c": 1.1, "tick_volume": 5, "atr": 0.05, "note": "x" },
            { "time": "2024-03-04 10:05:00", "o": 1.1, "h": 1.3, "l": 1.0, "c": 1.2, "tick_volume": 6, "atr": 0.06, "note": "y" }
        ]);
        let input = RateInput::from_json(value).unwrap();
        assert!(matches!(input, RateInput::Records(_)));

        let series = input.normalize().unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.candles()[1].volume, 6.0);
        assert_eq!(series.indicators().atr_fast, Some(vec![0.05, 0.06]));
        assert!(series.indicators().adx.is_none());
    }

    #[test]
    fn test_mt5_records_prefer_tick_volume_over_zero_real_volume() {
        let value = serde_json::json!([
            { "time": 1709546400, "open": 1.0850, "high": 1.0860, "low": 1.0840, "close": 1.0855, "tick_volume": 120, "spread": 2, "real_volume": 0 },
            { "time": 1709547300, "open": 1.0855, "high": 1.0870, "low": 1.0850, "close": 1.0865, "tick_volume": 0, "spread": 2, "real_volume": 40 }
        ]);
        let input = RateInput::from_json(value).unwrap();
        assert!(matches!(input, RateInput::Records(_)));

        let series = input.normalize().unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.candles()[0].volume, 120.0);
        assert_eq!(series.candles()[1].volume, 40.0);
    }

    #[test]
    fn test_explicit_volume_wins_over_tick_volume() {
        let value = serde_json::json!([
            { "time": 1709546400, "open": 1.0, "high": 1.2, "low": 0.9, "close": 1.1, "volume": 7, "tick_volume": 120, "real_volume": 3 }
        ]);
        let series = RateInput::from_json(value).unwrap().normalize().unwrap();
        assert_eq!(series.candles()[0].volume, 7.0);
    }

    #[test]
    fn test_mt5_columnar_shape() {
        let value = serde_json::json!({
            "time": [ts(0), ts(15), ts(30)],
            "open": [1.0850, 1.0855, 1.0865],
            "high": [1.0860, 1.0870, 1.0875],
            "low": [1.0840, 1.0850, 1.0860],
            "close": [1.0855, 1.0865, 1.0870],
            "tick_volume": [120.0, 150.0, 0.0],
            "spread": [2.0, 2.0, 3.0],
            "real_volume": [0.0, 0.0, 25.0]
        });
        let input = RateInput::from_json(value).unwrap();
        assert!(matches!(input, RateInput::Columnar(_)));

        let series = input.normalize().unwrap();
        assert_eq!(series.len(), 3);
        let volumes: Vec<f64> = series.candles().iter().map(|c| c.volume).collect();
        assert_eq!(volumes, vec![120.0, 150.0, 25.0]);
    }

    #[test]
    fn test_columnar_from_json() {
        let value = serde_json::json!({
            "timestamp": [ts(0), ts(5)],
            "open": [1.0, 1.1],
            "high": [1.2, 1.3],
            "low": [0.9, 1.0],
            "close": [1.1, 1.2],
            "adx": [22.0, 23.0]
        });
        let input = RateInput::from_json(value).unwrap();
        assert!(matches!(input, RateInput::Columnar(_)));
        let series = input.normalize().unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.indicators().adx, Some(vec![22.0, 23.0]));
    }

    #[test]
    fn test_matrix_from_json_is_not_mistaken_for_records() {
        let value = serde_json::json!([
            [ts(0), 1.0, 1.2, 0.9, 1.1, 3.0],
            [ts(5), 1.1, 1.3, 1.0, 1.2, 4.0],
            [ts(10), 1.2, 1.4, 1.1, 1.3, 5.0],
            [ts(15), 1.3, 1.5, 1.2, 1.4, 6.0],
            [ts(20), 1.4, 1.6, 1.3, 1.5, 7.0],
            [ts(25), 1.5, 1.7, 1.4, 1.6, 8.0]
        ]);
        let input = RateInput::from_json(value).unwrap();
        assert!(matches!(input, RateInput::Matrix(_)));
        assert_eq!(input.normalize().unwrap().len(), 6);
    }

    #[test]
    fn test_columnar_length_mismatch_is_malformed() {
        let input = RateInput::Columnar(ColumnarRates {
            timestamp: vec![TimestampValue::Epoch(ts(0)), TimestampValue::Epoch(ts(5))],
            open: vec![1.0],
            high: vec![1.2, 1.3],
            low: vec![0.9, 1.0],
            close: vec![1.1, 1.2],
            volume: None,
            tick_volume: None,
            real_volume: None,
            extra: BTreeMap::new(),
        });
        assert!(matches!(normalize(&input), Err(RegimeError::MalformedInput(_))));
    }

    #[test]
    fn test_all_invalid_rows_is_malformed_but_empty_is_ok() {
        let bad = RateInput::Matrix(vec![vec![ts(0), -1.0, 1.0, 0.5, 0.8]]);
        assert!(matches!(normalize(&bad), Err(RegimeError::MalformedInput(_))));

        let empty = RateInput::Matrix(vec![]);
        assert!(normalize(&empty).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_timestamps_last_wins() {
        let input = RateInput::Matrix(vec![
            vec![ts(0), 1.0, 1.2, 0.9, 1.0],
            vec![ts(0), 1.0, 1.2, 0.9, 1.1],
        ]);
        let series = normalize(&input).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series.candles()[0].close, 1.1);
    }

    #[test]
    fn test_load_csv_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("EURUSD_15m.csv");
        std::fs::write(
            &path,
            "datetime,open,high,low,close,volume,adx\n\
             2024-03-04 10:00:00,1.0850,1.0860,1.0840,1.0855,120,18.5\n\
             2024-03-04 10:15:00,1.0855,1.0870,1.0850,1.0865,150,19.0\n",
        )
        .unwrap();

        let series = load_csv(&path).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.candles()[1].volume, 150.0);
        assert_eq!(series.indicators().adx, Some(vec![18.5, 19.0]));
    }

    #[test]
    fn test_load_csv_mt5_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("EURUSD_M15.csv");
        std::fs::write(
            &path,
            "time,open,high,low,close,tick_volume,spread,real_volume
             2024-03-04 10:00:00,1.0850,1.0860,1.0840,1.0855,120,2,0
             2024-03-04 10:15:00,1.0855,1.0870,1.0850,1.0865,150,2,0
",
        )
        .unwrap();

        let series = load_csv(&path).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.candles()[0].volume, 120.0);
        assert_eq!(series.candles()[1].volume, 150.0);
    }
}
