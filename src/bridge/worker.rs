//! Bridge worker
//!
//! Owns the store handle and runs requests one at a time.

use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender};

use crate::engine::Replacement;
use crate::error::{Result, StoreError};
use crate::query::{self, Query};
use crate::record::{normalize_batch, RawRecord, Record};
use crate::schema::{Handle, SchemaManager, SchemaVersion, StoreDefinition};

use super::{CorrelationId, Envelope, Event, EventKind, IngestReport, OpenAck, Operation, Response, StatusNotice};

pub(crate) struct Worker {
    manager: Arc<SchemaManager>,
    definition: StoreDefinition,
    version: SchemaVersion,
    handle: Option<Handle>,
    status: Sender<StatusNotice>,

    /// Close the database on exit (the manager is private to this bridge)
    close_on_exit: bool,
}

impl Worker {
    pub fn new(
        manager: Arc<SchemaManager>,
        definition: StoreDefinition,
        version: SchemaVersion,
        status: Sender<StatusNotice>,
        close_on_exit: bool,
    ) -> Self {
        Self {
            manager,
            definition,
            version,
            handle: None,
            status,
            close_on_exit,
        }
    }

    /// Serve requests until every sender is gone and the queue is drained
    pub fn run(mut self, requests: Receiver<Envelope>) {
        tracing::info!("Bridge worker started for {}", self.definition.name);
        self.notify(CorrelationId::BRIDGE, EventKind::Ready);

        for Envelope { id, op, reply } in requests.iter() {
            let event = self.dispatch(id, op);
            let kind = event.kind();
            self.notify(id, kind);

            if reply.send(Response { id, event }).is_err() {
                tracing::debug!("Requester for {} went away before the {} reply", id, kind);
            }
        }

        if let Some(handle) = self.handle.take() {
            if self.close_on_exit {
                self.manager.close(&handle);
            }
        }
        tracing::info!("Bridge worker stopped for {}", self.definition.name);
    }

    fn dispatch(&mut self, id: CorrelationId, op: Operation) -> Event {
        match op {
            Operation::Open {
                definition,
                version,
            } => {
                self.definition = definition;
                self.version = version;
                self.handle = None;
                match self.open(id) {
                    Ok((_, ack)) => Event::open_ack(ack),
                    Err(e) => Event::StorageError(e),
                }
            }
            Operation::Ingest { symbol, rows } => Event::storage(self.ingest(id, &symbol, &rows)),
            Operation::Query(query) => Event::query(self.query(id, &query)),
            Operation::GetAll => {
                Event::query(self.ensure_open(id).and_then(|handle| handle.get_all()))
            }
        }
    }

    fn notify(&self, id: CorrelationId, kind: EventKind) {
        tracing::trace!("Status {} {}", id, kind);
        if self.status.try_send(StatusNotice { id, kind }).is_err() {
            tracing::trace!("Status buffer full, dropped {} {}", id, kind);
        }
    }

    // =========================================================================
    // Open
    // =========================================================================

    /// Current handle, opening (or reopening a stale one) on demand
    fn ensure_open(&mut self, id: CorrelationId) -> Result<Handle> {
        if let Some(handle) = &self.handle {
            if handle.is_ready() {
                return Ok(handle.clone());
            }
            tracing::debug!("Handle for {} is stale, reopening", handle.store_name());
        }

        let (handle, ack) = self.open(id)?;
        let kind = if ack.migrated_from.is_some() {
            EventKind::Migrated
        } else {
            EventKind::Opened
        };
        self.notify(id, kind);
        Ok(handle)
    }

    fn open(&mut self, id: CorrelationId) -> Result<(Handle, OpenAck)> {
        let (handle, report) = self.manager.open_with_report(&self.definition, self.version)?;
        tracing::debug!("Request {} opened {} at v{}", id, handle.store_name(), report.version);

        let ack = OpenAck {
            store: handle.store_name().to_string(),
            version: report.version,
            migrated_from: report.migration.map(|m| m.from),
        };
        self.handle = Some(handle.clone());
        Ok((handle, ack))
    }

    // =========================================================================
    // Ingest Pipeline
    // =========================================================================

    /// Replace the stored rows of `symbol` with the priced rows of `rows`
    ///
    /// Stages:
    /// 1. Open the store
    /// 2. Normalize every row; any failure ends the request untouched
    /// 3. Clear the symbol's primary range and upsert the priced rows in one
    ///    transaction, so a failed write leaves the old rows in place
    fn ingest(&mut self, id: CorrelationId, symbol: &str, rows: &[RawRecord]) -> Result<IngestReport> {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(StoreError::Normalization("ingest batch has no symbol".to_string()));
        }

        // Stage 1: Open
        let handle = self.ensure_open(id)?;

        // Stage 2: Normalize
        let (priced, unpriced): (Vec<Record>, Vec<Record>) =
            normalize_batch(symbol, rows)?.into_iter().partition(Record::is_priced);
        if !unpriced.is_empty() {
            tracing::debug!("Dropping {} unpriced rows for {}", unpriced.len(), symbol);
        }

        // Stage 3: Clear and insert
        let Replacement {
            removed: replaced,
            written: stored,
        } = handle.replace_symbol(symbol, priced)?;

        tracing::info!(
            "Ingested {}: stored={}, rejected={}, replaced={}",
            symbol,
            stored,
            unpriced.len(),
            replaced
        );
        Ok(IngestReport {
            symbol: symbol.to_string(),
            stored,
            rejected: unpriced.len(),
            replaced,
        })
    }

    // =========================================================================
    // Query
    // =========================================================================

    fn query(&mut self, id: CorrelationId, request: &Query) -> Result<Vec<Record>> {
        let handle = self.ensure_open(id)?;
        let plan = query::plan(request, &handle.definition()?)?;
        Ok(query::execute(&plan, &handle)?.into_records())
    }
}
