//! Secondary indexes
//!
//! Each index maps a value derived from a record to the primary keys of the
//! records carrying it. Values order numbers before text; numbers follow the
//! IEEE total order, except that `-0.0` and `0.0` are the same key.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use crate::record::{FieldValue, PrimaryKey, Record};
use crate::schema::{IndexDefinition, IndexField};

// =============================================================================
// Index Values
// =============================================================================

/// `f64` with a total order
#[derive(Debug, Clone, Copy)]
pub struct OrderedNumber(pub f64);

impl OrderedNumber {
    pub fn new(value: f64) -> Self {
        OrderedNumber(canonical_zero(value))
    }
}

/// Fold `-0.0` onto `0.0`
fn canonical_zero(value: f64) -> f64 {
    if value == 0.0 {
        0.0
    } else {
        value
    }
}

impl PartialEq for OrderedNumber {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderedNumber {}

impl PartialOrd for OrderedNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        canonical_zero(self.0).total_cmp(&canonical_zero(other.0))
    }
}

/// A key inside a secondary index
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum IndexValue {
    Number(OrderedNumber),
    Text(String),
}

impl IndexValue {
    pub fn number(value: f64) -> Self {
        IndexValue::Number(OrderedNumber::new(value))
    }

    pub fn text(value: impl Into<String>) -> Self {
        IndexValue::Text(value.into())
    }
}

impl From<f64> for IndexValue {
    fn from(value: f64) -> Self {
        IndexValue::number(value)
    }
}

impl From<&str> for IndexValue {
    fn from(value: &str) -> Self {
        IndexValue::text(value)
    }
}

impl From<String> for IndexValue {
    fn from(value: String) -> Self {
        IndexValue::Text(value)
    }
}

// =============================================================================
// Lookups
// =============================================================================

/// Equality or range lookup against one index
#[derive(Debug, Clone, PartialEq)]
pub enum IndexLookup {
    Equal(IndexValue),
    Range {
        lower: Bound<IndexValue>,
        upper: Bound<IndexValue>,
    },
}

impl IndexLookup {
    pub fn equal(value: impl Into<IndexValue>) -> Self {
        IndexLookup::Equal(value.into())
    }

    /// `[lower, upper]`
    pub fn between(lower: impl Into<IndexValue>, upper: impl Into<IndexValue>) -> Self {
        IndexLookup::Range {
            lower: Bound::Included(lower.into()),
            upper: Bound::Included(upper.into()),
        }
    }

    /// `[lower, ∞)`
    pub fn at_least(lower: impl Into<IndexValue>) -> Self {
        IndexLookup::Range {
            lower: Bound::Included(lower.into()),
            upper: Bound::Unbounded,
        }
    }

    /// `(-∞, upper)`
    pub fn below(upper: impl Into<IndexValue>) -> Self {
        IndexLookup::Range {
            lower: Bound::Unbounded,
            upper: Bound::Excluded(upper.into()),
        }
    }

    /// True when no value can satisfy the bounds
    ///
    /// `BTreeMap::range` panics on inverted bounds, so these are filtered first.
    fn is_empty_range(lower: &Bound<IndexValue>, upper: &Bound<IndexValue>) -> bool {
        match (lower, upper) {
            (Bound::Included(lo), Bound::Included(hi)) => lo > hi,
            (Bound::Included(lo), Bound::Excluded(hi))
            | (Bound::Excluded(lo), Bound::Included(hi))
            | (Bound::Excluded(lo), Bound::Excluded(hi)) => lo >= hi,
            _ => false,
        }
    }
}

// =============================================================================
// Secondary Index
// =============================================================================

/// In-memory secondary index, rebuilt from records on load
#[derive(Debug, Clone)]
pub(crate) struct SecondaryIndex {
    definition: IndexDefinition,
    entries: BTreeMap<IndexValue, BTreeSet<PrimaryKey>>,
}

impl SecondaryIndex {
    pub fn new(definition: IndexDefinition) -> Self {
        Self {
            definition,
            entries: BTreeMap::new(),
        }
    }

    pub fn definition(&self) -> &IndexDefinition {
        &self.definition
    }

    /// Value this index derives from `record`
    ///
    /// `Ok(None)` means the record is not indexed here (missing or boolean
    /// field). Non-finite numbers cannot be ordered meaningfully and are
    /// rejected.
    pub fn extract(&self, record: &Record) -> Result<Option<IndexValue>, String> {
        match &self.definition.field {
            IndexField::Symbol => Ok(Some(IndexValue::text(record.symbol.as_str()))),
            IndexField::Date => Ok(Some(IndexValue::text(record.date.as_str()))),
            IndexField::Field(name) => match record.field(name) {
                FieldValue::Number(n) if !n.is_finite() => Err(format!(
                    "index {}: non-finite value {} in field {}",
                    self.definition.name, n, name
                )),
                FieldValue::Number(n) => Ok(Some(IndexValue::number(*n))),
                FieldValue::Text(t) => Ok(Some(IndexValue::text(t.as_str()))),
                FieldValue::Bool(_) | FieldValue::Missing => Ok(None),
            },
        }
    }

    /// Unique-constraint check for putting `value` under `key`
    pub fn check_unique(&self, value: &IndexValue, key: &PrimaryKey) -> Result<(), String> {
        if !self.definition.unique {
            return Ok(());
        }
        match self.entries.get(value) {
            Some(keys) if keys.iter().any(|existing| existing != key) => Err(format!(
                "unique index {} already holds {:?}",
                self.definition.name, value
            )),
            _ => Ok(()),
        }
    }

    pub fn insert(&mut self, value: IndexValue, key: PrimaryKey) {
        self.entries.entry(value).or_default().insert(key);
    }

    pub fn remove(&mut self, value: &IndexValue, key: &PrimaryKey) {
        if let Some(keys) = self.entries.get_mut(value) {
            keys.remove(key);
            if keys.is_empty() {
                self.entries.remove(value);
            }
        }
    }

    /// Primary keys matching `lookup`, in index-value order then key order
    pub fn lookup(&self, lookup: &IndexLookup) -> Vec<PrimaryKey> {
        match lookup {
            IndexLookup::Equal(value) => self
                .entries
                .get(value)
                .map(|keys| keys.iter().cloned().collect())
                .unwrap_or_default(),
            IndexLookup::Range { lower, upper } => {
                if IndexLookup::is_empty_range(lower, upper) {
                    return Vec::new();
                }
                self.entries
                    .range((lower.clone(), upper.clone()))
                    .flat_map(|(_, keys)| keys.iter().cloned())
                    .collect()
            }
        }
    }

    /// Number of distinct index values
    pub fn value_count(&self) -> usize {
        self.entries.len()
    }
}
