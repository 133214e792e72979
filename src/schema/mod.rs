//! Schema Module
//!
//! Versioned store definitions and the lifecycle of opened databases.
//!
//! ## Responsibilities
//! - Declare object stores and their secondary indexes
//! - Open databases, upgrading them when the requested version is newer
//! - Hand out `Handle`s that gate every engine operation on readiness
//!
//! ## Lifecycle
//! ```text
//!            open()                    version > persisted
//! Closed ───────────▶ Opening ─────────────────────────────▶ Migrating
//!   ▲                   │  │                                      │
//!   │ close()           │  └── substrate unavailable ─▶ Failed    │
//!   │                   ▼                                         │
//!   └────────────────  Ready ◀────────────────────────────────────┘
//! ```

mod manager;
mod migration;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::record::{CLOSE_FIELD, DATE_FIELD, SYMBOL_FIELD};

pub use manager::{Handle, Lifecycle, OpenReport, SchemaManager};
pub use migration::MigrationOutcome;

/// Schema version number; versions start at 1
pub type SchemaVersion = u32;

// =============================================================================
// Index Definitions
// =============================================================================

/// Which part of a record an index is built over
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexField {
    Symbol,
    Date,
    /// A named payload field, e.g. `close`
    Field(String),
}

/// A named secondary index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub field: IndexField,
    /// Reject writes that would give two records the same index value
    pub unique: bool,
}

impl IndexDefinition {
    pub fn new(name: impl Into<String>, field: IndexField) -> Self {
        Self {
            name: name.into(),
            field,
            unique: false,
        }
    }

    /// Index over a payload field, named after the field
    pub fn on_field(field: impl Into<String>) -> Self {
        let field = field.into();
        Self::new(field.clone(), IndexField::Field(field))
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

// =============================================================================
// Store Definitions
// =============================================================================

/// A named object store keyed by `(symbol, date)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreDefinition {
    pub name: String,
    pub indexes: Vec<IndexDefinition>,
}

impl StoreDefinition {
    /// A store with no secondary indexes
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            indexes: Vec::new(),
        }
    }

    /// The usual price-history layout: `symbol`, `date`, `close`, `volume`
    pub fn ohlcv(name: impl Into<String>) -> Self {
        Self::new(name)
            .with_index(IndexDefinition::new(SYMBOL_FIELD, IndexField::Symbol))
            .with_index(IndexDefinition::new(DATE_FIELD, IndexField::Date))
            .with_index(IndexDefinition::on_field(CLOSE_FIELD))
            .with_index(IndexDefinition::on_field("volume"))
    }

    pub fn with_index(mut self, index: IndexDefinition) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn index(&self, name: &str) -> Option<&IndexDefinition> {
        self.indexes.iter().find(|idx| idx.name == name)
    }

    /// First index declared over `field`
    pub fn index_on(&self, field: &IndexField) -> Option<&IndexDefinition> {
        self.indexes.iter().find(|idx| &idx.field == field)
    }

    /// Structural checks performed before a definition reaches disk
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(StoreError::Open("store name must not be empty".to_string()));
        }

        let mut seen = HashSet::new();
        for index in &self.indexes {
            if index.name.trim().is_empty() {
                return Err(StoreError::Open(format!(
                    "store {}: index name must not be empty",
                    self.name
                )));
            }
            if !seen.insert(index.name.as_str()) {
                return Err(StoreError::Open(format!(
                    "store {}: duplicate index {}",
                    self.name, index.name
                )));
            }
            if let IndexField::Field(field) = &index.field {
                if field.trim().is_empty() {
                    return Err(StoreError::Open(format!(
                        "store {}: index {} has an empty field name",
                        self.name, index.name
                    )));
                }
            }
        }

        Ok(())
    }
}
