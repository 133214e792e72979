//! # QuoteStore
//!
//! An embedded, schema-versioned store for daily price records with:
//! - One record per `(symbol, date)` primary key
//! - Secondary indexes kept consistent with every write
//! - Versioned schemas with additive (or opt-in destructive) migration
//! - Crash-safe snapshot persistence
//! - A non-blocking request/response bridge for host applications
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Host Application                       │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ submit_* -> Pending (correlation id)
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                    Bridge (worker thread)                    │
//! │        ingest: open → normalize → clear → upsert             │
//! └──────────┬──────────────────────┬───────────────────────────┘
//!            │                      │
//!            ▼                      ▼
//!   ┌─────────────────┐    ┌─────────────────┐
//!   │  Record Codec   │    │  Query Planner  │
//!   └─────────────────┘    └────────┬────────┘
//!                                   │
//!            ┌──────────────────────▼──────────────────────┐
//!            │  Schema Manager  ──▶  Handle (Store Engine)  │
//!            │  (open/migrate)       (SWMR transactions)    │
//!            └──────────────────────┬──────────────────────┘
//!                                   ▼
//!                           ┌─────────────┐
//!                           │  Snapshot   │
//!                           │ (substrate) │
//!                           └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod record;
pub mod schema;
mod storage;
pub mod engine;
pub mod query;
pub mod bridge;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{ErrorCategory, Result, StoreError};
pub use config::{Config, Durability, MigrationPolicy, StorageMode};
pub use record::{FieldValue, PrimaryKey, RawRecord, RawValue, Record};
pub use schema::{Handle, IndexDefinition, IndexField, SchemaManager, SchemaVersion, StoreDefinition};
pub use engine::{Ack, IndexLookup, IndexValue, Replacement};
pub use query::{Comparison, Predicate, Query};
pub use bridge::{Bridge, CorrelationId, EventKind, IngestReport, OpenAck, Outcome, Pending, StatusNotice};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of QuoteStore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
