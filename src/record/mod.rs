//! Record Module
//!
//! Canonical record shape shared by every layer of the store.
//!
//! ## Responsibilities
//! - Define the persisted `Record` and its `(symbol, date)` primary key
//! - Define the loosely-typed `RawRecord` the host submits
//! - Normalize raw input into records (see `codec`)
//!
//! ## Record Layout
//! ```text
//! ┌──────────────────────────────┬─────────────────────────────────────┐
//! │ Primary key                  │ Payload                             │
//! │ ┌──────────┬───────────────┐ │ ┌─────────────┬───────────────────┐ │
//! │ │ symbol   │ date (ISO)    │ │ │ field name  │ Number/Text/Bool/ │ │
//! │ └──────────┴───────────────┘ │ │             │ Missing           │ │
//! │                              │ └─────────────┴───────────────────┘ │
//! └──────────────────────────────┴─────────────────────────────────────┘
//! ```

mod codec;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use codec::{normalize, normalize_batch, NormalizedRow};

// =============================================================================
// Field Names
// =============================================================================

/// Canonical name of the symbol key component
pub const SYMBOL_FIELD: &str = "symbol";

/// Canonical name of the date key component
pub const DATE_FIELD: &str = "date";

/// Canonical name of the closing price, the field that makes a row "priced"
pub const CLOSE_FIELD: &str = "close";

/// Fields the codec always materializes, as numbers or `Missing`
pub const NUMERIC_FIELDS: [&str; 6] = ["open", "high", "low", "close", "adj_close", "volume"];

// =============================================================================
// Primary Key
// =============================================================================

/// The `(symbol, date)` tuple identifying one record
///
/// Ordering is symbol first, then date, so every symbol occupies one
/// contiguous key range.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PrimaryKey {
    pub symbol: String,
    pub date: String,
}

impl PrimaryKey {
    pub fn new(symbol: impl Into<String>, date: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            date: date.into(),
        }
    }

    /// Closed-open bounds `[low, high)` covering every date of `symbol`
    ///
    /// `symbol + "\0"` is the immediate lexicographic successor of `symbol`,
    /// so no other symbol can fall inside the range.
    pub fn symbol_range(symbol: &str) -> (PrimaryKey, PrimaryKey) {
        let low = PrimaryKey::new(symbol, "");
        let high = PrimaryKey::new(format!("{}\0", symbol), "");
        (low, high)
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.symbol, self.date)
    }
}

// =============================================================================
// Field Values
// =============================================================================

/// A scalar payload value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Number(f64),
    Text(String),
    Bool(bool),
    /// Explicitly absent; never coerced to zero
    Missing,
}

static MISSING: FieldValue = FieldValue::Missing;

impl FieldValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, FieldValue::Missing)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

// =============================================================================
// Record
// =============================================================================

/// One persisted row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub symbol: String,
    pub date: String,
    pub payload: BTreeMap<String, FieldValue>,
}

impl Record {
    /// Create a record with an empty payload
    pub fn new(symbol: impl Into<String>, date: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            date: date.into(),
            payload: BTreeMap::new(),
        }
    }

    /// Builder-style payload setter
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.payload.insert(name.into(), value.into());
        self
    }

    pub fn key(&self) -> PrimaryKey {
        PrimaryKey::new(self.symbol.clone(), self.date.clone())
    }

    /// Payload value by name; absent fields read as `Missing`
    pub fn field(&self, name: &str) -> &FieldValue {
        self.payload.get(name).unwrap_or(&MISSING)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.field(name).as_number()
    }

    pub fn close(&self) -> Option<f64> {
        self.number(CLOSE_FIELD)
    }

    /// Only priced rows are persisted
    pub fn is_priced(&self) -> bool {
        self.close().is_some()
    }
}

// =============================================================================
// Raw Input
// =============================================================================

/// Loosely-typed scalar as supplied by the host
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Number(value)
    }
}

impl From<i64> for RawValue {
    fn from(value: i64) -> Self {
        RawValue::Number(value as f64)
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        RawValue::Text(value)
    }
}

impl From<bool> for RawValue {
    fn from(value: bool) -> Self {
        RawValue::Bool(value)
    }
}

/// One input row before normalization
#[derive(Debug, Clone, PartialEq)]
pub enum RawRecord {
    /// Structured field → value mapping
    Mapping(BTreeMap<String, RawValue>),

    /// Legacy stringified object, e.g. `{'Date': '2024-02-01', 'Close': 150.25}`
    Text(String),
}

impl RawRecord {
    /// Build a mapping row from `(field, value)` pairs
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<RawValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        RawRecord::Mapping(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn text(value: impl Into<String>) -> Self {
        RawRecord::Text(value.into())
    }
}
