//! Record codec
//!
//! Turns heterogeneous host rows into canonical records.
//!
//! Two input shapes are accepted:
//! - structured mappings (`RawRecord::Mapping`)
//! - legacy stringified objects (`RawRecord::Text`), parsed as a bounded
//!   fallback of comma-separated `key: value` fragments
//!
//! Anything that cannot be read unambiguously is a normalization error;
//! absent numeric fields become `FieldValue::Missing`, never zero.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike, Utc};

use crate::error::{Result, StoreError};

use super::{FieldValue, RawRecord, RawValue, Record, DATE_FIELD, NUMERIC_FIELDS, SYMBOL_FIELD};

/// Date-time layouts tried before falling back to RFC 3339
const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
];

/// A normalized row not yet bound to an ingest batch
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    /// Symbol named by the row itself, if any
    pub symbol: Option<String>,
    pub date: String,
    pub payload: BTreeMap<String, FieldValue>,
}

impl NormalizedRow {
    /// Payload value by name; absent fields read as `Missing`
    pub fn field(&self, name: &str) -> &FieldValue {
        static MISSING: FieldValue = FieldValue::Missing;
        self.payload.get(name).unwrap_or(&MISSING)
    }

    /// Bind the row to the symbol of its ingest batch
    pub fn into_record(self, batch_symbol: &str) -> Result<Record> {
        let batch_symbol = batch_symbol.trim();
        let symbol = match self.symbol {
            Some(own) if !batch_symbol.is_empty() && own != batch_symbol => {
                return Err(StoreError::Normalization(format!(
                    "row for {} dated {} submitted in batch for {}",
                    own, self.date, batch_symbol
                )));
            }
            Some(own) => own,
            None if batch_symbol.is_empty() => {
                return Err(StoreError::Normalization(format!(
                    "row dated {} has no symbol",
                    self.date
                )));
            }
            None => batch_symbol.to_string(),
        };

        Ok(Record {
            symbol,
            date: self.date,
            payload: self.payload,
        })
    }
}

// =============================================================================
// Public Entry Points
// =============================================================================

/// Normalize one raw row
pub fn normalize(raw: &RawRecord) -> Result<NormalizedRow> {
    match raw {
        RawRecord::Mapping(fields) => {
            normalize_fields(fields.iter().map(|(k, v)| (k.as_str(), v.clone())))
        }
        RawRecord::Text(text) => {
            let fragments = parse_fragments(text)?;
            normalize_fields(fragments.iter().map(|(k, v)| (k.as_str(), v.clone())))
        }
    }
}

/// Normalize every row of an ingest batch for `symbol`
///
/// Fails on the first malformed row; unpriced rows are kept so the caller
/// can count what it drops.
pub fn normalize_batch(symbol: &str, rows: &[RawRecord]) -> Result<Vec<Record>> {
    rows.iter()
        .enumerate()
        .map(|(position, raw)| {
            normalize(raw)
                .and_then(|row| row.into_record(symbol))
                .map_err(|e| match e {
                    StoreError::Normalization(msg) => {
                        StoreError::Normalization(format!("row {}: {}", position, msg))
                    }
                    other => other,
                })
        })
        .collect()
}

// =============================================================================
// Field Normalization
// =============================================================================

fn normalize_fields<'a, I>(fields: I) -> Result<NormalizedRow>
where
    I: Iterator<Item = (&'a str, RawValue)>,
{
    let mut symbol = None;
    let mut date = None;
    let mut payload = BTreeMap::new();
    let mut seen = BTreeSet::new();

    for (key, value) in fields {
        let name = canonical_field_name(key);
        let slot = match name.as_str() {
            "ticker" => SYMBOL_FIELD,
            "timestamp" | "datetime" => DATE_FIELD,
            other => other,
        };
        if !seen.insert(slot.to_string()) {
            return Err(StoreError::Normalization(format!(
                "field {:?} collides with another field named {}",
                key, slot
            )));
        }

        match name.as_str() {
            "" => {
                return Err(StoreError::Normalization("empty field name".to_string()));
            }
            SYMBOL_FIELD | "ticker" => symbol = Some(normalize_symbol(&value)?),
            DATE_FIELD | "timestamp" | "datetime" => date = Some(normalize_date(&value)?),
            _ if NUMERIC_FIELDS.contains(&name.as_str()) => {
                let number = numeric_value(&name, &value)?;
                payload.insert(name, number);
            }
            _ => {
                let passthrough = passthrough_value(&value);
                payload.insert(name, passthrough);
            }
        }
    }

    let date = date.ok_or_else(|| StoreError::Normalization("missing date".to_string()))?;

    for field in NUMERIC_FIELDS {
        payload
            .entry(field.to_string())
            .or_insert(FieldValue::Missing);
    }

    Ok(NormalizedRow {
        symbol,
        date,
        payload,
    })
}

/// `" Adj Close "` → `adj_close`
fn canonical_field_name(key: &str) -> String {
    key.split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

fn normalize_symbol(value: &RawValue) -> Result<String> {
    match value {
        RawValue::Text(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
        other => Err(StoreError::Normalization(format!(
            "symbol must be non-empty text, got {:?}",
            other
        ))),
    }
}

fn normalize_date(value: &RawValue) -> Result<String> {
    let parsed = match value {
        RawValue::Text(text) => canonical_date(text),
        RawValue::Number(ms) if ms.is_finite() && ms.fract() == 0.0 => {
            DateTime::<Utc>::from_timestamp_millis(*ms as i64).map(|dt| format_datetime(dt.naive_utc()))
        }
        _ => None,
    };

    parsed.ok_or_else(|| StoreError::Normalization(format!("unparseable date {:?}", value)))
}

/// Canonical ISO-8601 form of a textual date, if it is one
fn canonical_date(text: &str) -> Option<String> {
    let text = text.trim();

    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(date.format("%Y-%m-%d").to_string());
    }

    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(format_datetime(dt));
        }
    }

    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| format_datetime(dt.naive_utc()))
}

/// Midnight collapses to a plain date
fn format_datetime(dt: NaiveDateTime) -> String {
    let time = dt.time();
    if time.hour() == 0 && time.minute() == 0 && time.second() == 0 && time.nanosecond() == 0 {
        dt.format("%Y-%m-%d").to_string()
    } else {
        dt.format("%Y-%m-%dT%H:%M:%S").to_string()
    }
}

fn is_null_word(text: &str) -> bool {
    matches!(
        text.trim().to_ascii_lowercase().as_str(),
        "" | "null" | "none" | "nan"
    )
}

fn numeric_value(field: &str, value: &RawValue) -> Result<FieldValue> {
    let number = match value {
        RawValue::Null => return Ok(FieldValue::Missing),
        RawValue::Number(n) => *n,
        RawValue::Text(text) if is_null_word(text) => return Ok(FieldValue::Missing),
        RawValue::Text(text) => text.trim().replace(',', "").parse::<f64>().map_err(|_| {
            StoreError::Normalization(format!("{} is not numeric: {:?}", field, text))
        })?,
        RawValue::Bool(b) => {
            return Err(StoreError::Normalization(format!(
                "{} is not numeric: {}",
                field, b
            )))
        }
    };

    if number.is_nan() {
        Ok(FieldValue::Missing)
    } else if number.is_infinite() {
        Err(StoreError::Normalization(format!("{} is not finite", field)))
    } else {
        Ok(FieldValue::Number(number))
    }
}

fn passthrough_value(value: &RawValue) -> FieldValue {
    match value {
        RawValue::Null => FieldValue::Missing,
        RawValue::Bool(b) => FieldValue::Bool(*b),
        RawValue::Number(n) if n.is_nan() => FieldValue::Missing,
        RawValue::Number(n) => FieldValue::Number(*n),
        RawValue::Text(text) => FieldValue::Text(text.clone()),
    }
}

// =============================================================================
// Legacy String Parsing
// =============================================================================

/// Split a stringified object into `(key, value)` fragments
///
/// Quoted sections may contain `,` and `:`; an unquoted fragment without a
/// `:` separator is rejected.
fn parse_fragments(text: &str) -> Result<Vec<(String, RawValue)>> {
    let body = text.trim();
    let body = body
        .strip_prefix('{')
        .and_then(|b| b.strip_suffix('}'))
        .unwrap_or(body);

    let mut fragments = Vec::new();
    for piece in split_outside_quotes(body, ',') {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        fragments.push(parse_fragment(piece)?);
    }

    if fragments.is_empty() {
        return Err(StoreError::Normalization(format!(
            "no key/value fragments in {:?}",
            text
        )));
    }

    Ok(fragments)
}

fn parse_fragment(piece: &str) -> Result<(String, RawValue)> {
    let separator = split_outside_quotes(piece, ':');
    let mut parts = separator.into_iter();
    let key = parts.next().unwrap_or_default();

    // Values such as `09:30:00` legitimately contain the separator again.
    let rest: Vec<&str> = parts.collect();
    if rest.is_empty() {
        return Err(StoreError::Normalization(format!(
            "fragment {:?} is not a key: value pair",
            piece
        )));
    }
    let value = rest.join(":");

    Ok((unquote(key.trim()).to_string(), parse_scalar(value.trim())))
}

fn split_outside_quotes(text: &str, delimiter: char) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (idx, ch) in text.char_indices() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None if ch == '\'' || ch == '"' => quote = Some(ch),
            None if ch == delimiter => {
                pieces.push(&text[start..idx]);
                start = idx + ch.len_utf8();
            }
            None => {}
        }
    }
    pieces.push(&text[start..]);
    pieces
}

fn unquote(text: &str) -> &str {
    for q in ['\'', '"'] {
        if text.len() >= 2 && text.starts_with(q) && text.ends_with(q) {
            return &text[1..text.len() - 1];
        }
    }
    text
}

fn parse_scalar(text: &str) -> RawValue {
    let unquoted = unquote(text);
    if unquoted.len() != text.len() {
        return RawValue::Text(unquoted.to_string());
    }
    if is_null_word(text) {
        return RawValue::Null;
    }
    match text {
        "true" | "True" => return RawValue::Bool(true),
        "false" | "False" => return RawValue::Bool(false),
        _ => {}
    }
    text.parse::<f64>()
        .map(RawValue::Number)
        .unwrap_or_else(|_| RawValue::Text(text.to_string()))
}

// =============================================================================
// Tests
// =============================================================================
