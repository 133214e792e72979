//! Bridge Module
//!
//! Request/response message passing between the host and the storage
//! engine. The host never blocks on the engine: every call returns a
//! `Pending` reply slot immediately and the answer arrives later, tagged
//! with the request's correlation id.
//!
//! ## Architecture
//! ```text
//!   Host threads                          Worker thread
//! ┌──────────────┐  Envelope{id, op}   ┌────────────────────────┐
//! │ Bridge       │ ──────────────────▶ │ ensure open            │
//! │  submit_*()  │   (bounded queue)   │ run op against Handle  │
//! │  -> Pending  │ ◀────────────────── │ reply Response{id, ev} │
//! └──────────────┘   per-request slot  └───────────┬────────────┘
//!        ▲                                         │
//!        │        StatusNotice{id, kind}           │
//!        └─────────────────────────────────────────┘
//! ```
//!
//! ## Ordering
//! Requests run one at a time in submission order on the worker. Within an
//! ingest, the symbol's old rows are deleted and committed before the new
//! rows are written.

mod client;
mod worker;

use std::fmt;

use crossbeam::channel::Sender;

use crate::error::{Result, StoreError};
use crate::query::Query;
use crate::record::{RawRecord, Record};
use crate::schema::{SchemaVersion, StoreDefinition};

pub use client::{Bridge, FromEvent, Pending};

// =============================================================================
// Correlation
// =============================================================================

/// Tag matching a response to the request that caused it
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CorrelationId(pub u64);

impl CorrelationId {
    /// Notices not caused by any request, such as `Ready`
    pub const BRIDGE: CorrelationId = CorrelationId(0);
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// Requests
// =============================================================================

/// Work the host can ask of the worker
#[derive(Debug, Clone)]
pub enum Operation {
    /// Open (and migrate if needed) with a new definition or version
    Open {
        definition: StoreDefinition,
        version: SchemaVersion,
    },

    /// Replace every stored row of `symbol` with `rows`
    Ingest { symbol: String, rows: Vec<RawRecord> },

    Query(Query),

    GetAll,
}

/// One queued request with its private reply slot
pub(crate) struct Envelope {
    pub id: CorrelationId,
    pub op: Operation,
    pub reply: Sender<Response>,
}

// =============================================================================
// Responses
// =============================================================================

/// Acknowledgment of a successful open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenAck {
    pub store: String,
    pub version: SchemaVersion,

    /// Previous version, when this open migrated the schema
    pub migrated_from: Option<SchemaVersion>,
}

/// Acknowledgment of a committed ingest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub symbol: String,

    /// Priced rows written
    pub stored: usize,

    /// Rows normalized but dropped for lacking a close price
    pub rejected: usize,

    /// Previously stored rows of the symbol that were deleted
    pub replaced: usize,
}

/// The single reply to one request
#[derive(Debug)]
pub struct Response {
    pub id: CorrelationId,
    pub event: Event,
}

/// Outcome payload of a response
#[derive(Debug)]
pub enum Event {
    Opened(OpenAck),
    Migrated(OpenAck),
    StorageSuccess(IngestReport),
    StorageError(StoreError),
    QueryResult(Vec<Record>),
    QueryError(StoreError),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Opened(_) => EventKind::Opened,
            Event::Migrated(_) => EventKind::Migrated,
            Event::StorageSuccess(_) => EventKind::StorageSuccess,
            Event::StorageError(_) => EventKind::StorageError,
            Event::QueryResult(_) => EventKind::QueryResult,
            Event::QueryError(_) => EventKind::QueryError,
        }
    }

    pub(crate) fn open_ack(ack: OpenAck) -> Self {
        if ack.migrated_from.is_some() {
            Event::Migrated(ack)
        } else {
            Event::Opened(ack)
        }
    }

    pub(crate) fn storage(result: Result<IngestReport>) -> Self {
        match result {
            Ok(report) => Event::StorageSuccess(report),
            Err(e) => Event::StorageError(e),
        }
    }

    pub(crate) fn query(result: Result<Vec<Record>>) -> Self {
        match result {
            Ok(records) => Event::QueryResult(records),
            Err(e) => Event::QueryError(e),
        }
    }
}

// =============================================================================
// Status Notices
// =============================================================================

/// Success/error discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Ready,
    Opened,
    Migrated,
    StorageSuccess,
    StorageError,
    QueryResult,
    QueryError,
}

impl EventKind {
    pub fn outcome(self) -> Outcome {
        match self {
            EventKind::StorageError | EventKind::QueryError => Outcome::Error,
            _ => Outcome::Success,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Ready => "ready",
            EventKind::Opened => "opened",
            EventKind::Migrated => "migrated",
            EventKind::StorageSuccess => "storageSuccess",
            EventKind::StorageError => "storageError",
            EventKind::QueryResult => "queryResult",
            EventKind::QueryError => "queryError",
        };
        f.write_str(name)
    }
}

/// Broadcast for every event the worker produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusNotice {
    pub id: CorrelationId,
    pub kind: EventKind,
}
