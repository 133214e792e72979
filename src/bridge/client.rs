//! Host side of the bridge

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};

use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::query::Query;
use crate::record::{RawRecord, Record};
use crate::schema::{SchemaManager, SchemaVersion, StoreDefinition};

use super::worker::Worker;
use super::{CorrelationId, Envelope, Event, IngestReport, OpenAck, Operation, Response, StatusNotice};

/// Notices buffered for the host before new ones are dropped
const STATUS_CAPACITY: usize = 4096;

// =============================================================================
// Reply Decoding
// =============================================================================

/// Typed view of the event a request resolves to
pub trait FromEvent: Sized {
    fn from_event(event: Event) -> Result<Self>;
}

fn unexpected<T>(event: &Event) -> Result<T> {
    Err(StoreError::Bridge(format!("unexpected {} reply", event.kind())))
}

impl FromEvent for Event {
    fn from_event(event: Event) -> Result<Self> {
        Ok(event)
    }
}

impl FromEvent for OpenAck {
    fn from_event(event: Event) -> Result<Self> {
        match event {
            Event::Opened(ack) | Event::Migrated(ack) => Ok(ack),
            Event::StorageError(e) => Err(e),
            other => unexpected(&other),
        }
    }
}

impl FromEvent for IngestReport {
    fn from_event(event: Event) -> Result<Self> {
        match event {
            Event::StorageSuccess(report) => Ok(report),
            Event::StorageError(e) => Err(e),
            other => unexpected(&other),
        }
    }
}

impl FromEvent for Vec<Record> {
    fn from_event(event: Event) -> Result<Self> {
        match event {
            Event::QueryResult(records) => Ok(records),
            Event::QueryError(e) => Err(e),
            other => unexpected(&other),
        }
    }
}

// =============================================================================
// Pending Reply
// =============================================================================

/// Reply slot of one submitted request
///
/// Registered before the request is queued, so the reply can never be missed.
#[must_use = "a request's outcome is only known through its Pending reply"]
pub struct Pending<T> {
    id: CorrelationId,
    reply: Receiver<Response>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: FromEvent> Pending<T> {
    fn new(id: CorrelationId, reply: Receiver<Response>) -> Self {
        Self {
            id,
            reply,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> CorrelationId {
        self.id
    }

    /// Block until the reply arrives
    pub fn wait(self) -> Result<T> {
        match self.reply.recv() {
            Ok(response) => self.resolve(response),
            Err(_) => Err(self.lost()),
        }
    }

    /// Wait at most `timeout`; on expiry the slot is handed back
    pub fn wait_timeout(self, timeout: Duration) -> std::result::Result<Result<T>, Self> {
        match self.reply.recv_timeout(timeout) {
            Ok(response) => Ok(self.resolve(response)),
            Err(RecvTimeoutError::Timeout) => Err(self),
            Err(RecvTimeoutError::Disconnected) => Ok(Err(self.lost())),
        }
    }

    /// Poll without blocking
    pub fn try_take(&self) -> Option<Result<T>> {
        match self.reply.try_recv() {
            Ok(response) => Some(self.resolve(response)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(self.lost())),
        }
    }

    fn resolve(&self, response: Response) -> Result<T> {
        if response.id != self.id {
            return Err(StoreError::Bridge(format!(
                "reply {} delivered to request {}",
                response.id, self.id
            )));
        }
        T::from_event(response.event)
    }

    fn lost(&self) -> StoreError {
        StoreError::Bridge(format!("no reply for request {}; bridge stopped", self.id))
    }
}

impl<T> std::fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pending").field("id", &self.id).finish()
    }
}

// =============================================================================
// Bridge
// =============================================================================

/// Host handle to one store instance served by a worker thread
///
/// All methods take `&self` and return immediately; share the bridge across
/// host threads with `Arc` if needed.
pub struct Bridge {
    requests: Option<Sender<Envelope>>,
    status: Receiver<StatusNotice>,
    next_id: AtomicU64,
    worker: Option<JoinHandle<()>>,
}

impl Bridge {
    /// Start a bridge over a private schema manager
    ///
    /// The database is opened lazily by the first request. A directory
    /// database held by another manager fails that open with an `OpenError`;
    /// use `with_manager` to let several bridges share one.
    pub fn spawn(config: Config, definition: StoreDefinition, version: SchemaVersion) -> Result<Self> {
        let capacity = config.request_queue_capacity;
        let manager = Arc::new(SchemaManager::new(config));
        Self::start(manager, definition, version, capacity, true)
    }

    /// Start a bridge over a shared schema manager
    ///
    /// Bridges sharing a manager converge on the same databases. Shutting one
    /// down leaves the database open for the others.
    pub fn with_manager(
        manager: Arc<SchemaManager>,
        definition: StoreDefinition,
        version: SchemaVersion,
    ) -> Result<Self> {
        let capacity = manager.config().request_queue_capacity;
        Self::start(manager, definition, version, capacity, false)
    }

    fn start(
        manager: Arc<SchemaManager>,
        definition: StoreDefinition,
        version: SchemaVersion,
        capacity: usize,
        close_on_exit: bool,
    ) -> Result<Self> {
        if version == 0 {
            return Err(StoreError::Open("schema version must be at least 1".to_string()));
        }
        definition.validate()?;

        let (request_tx, request_rx) = channel::bounded::<Envelope>(capacity.max(1));
        let (status_tx, status_rx) = channel::bounded::<StatusNotice>(STATUS_CAPACITY);

        let worker = Worker::new(manager, definition, version, status_tx, close_on_exit);
        let handle = thread::Builder::new()
            .name("quotestore-bridge".to_string())
            .spawn(move || worker.run(request_rx))
            .map_err(|e| StoreError::Bridge(format!("failed to start worker: {}", e)))?;

        Ok(Self {
            requests: Some(request_tx),
            status: status_rx,
            next_id: AtomicU64::new(1),
            worker: Some(handle),
        })
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Reopen with `definition` at `version`, migrating if it is newer
    ///
    /// Later requests use this definition.
    pub fn open(&self, definition: StoreDefinition, version: SchemaVersion) -> Pending<OpenAck> {
        self.send(Operation::Open {
            definition,
            version,
        })
    }

    /// Replace every stored row of `symbol` with the priced rows of `rows`
    pub fn submit_ingest(&self, symbol: impl Into<String>, rows: Vec<RawRecord>) -> Pending<IngestReport> {
        self.send(Operation::Ingest {
            symbol: symbol.into(),
            rows,
        })
    }

    /// Records of `symbol`, optionally only those with `close >= min_value`
    pub fn submit_query(&self, symbol: impl Into<String>, min_value: Option<f64>) -> Pending<Vec<Record>> {
        let query = match min_value {
            Some(min) => Query::min_value(symbol, min),
            None => Query::symbol(symbol),
        };
        self.submit(query)
    }

    pub fn submit(&self, query: Query) -> Pending<Vec<Record>> {
        self.send(Operation::Query(query))
    }

    /// Every stored record
    pub fn get_all(&self) -> Pending<Vec<Record>> {
        self.send(Operation::GetAll)
    }

    /// Submit `op` and receive the raw event it resolves to
    pub fn request(&self, op: Operation) -> Pending<Event> {
        self.send(op)
    }

    /// Status notices for every event, tagged with correlation ids
    ///
    /// Notices are dropped while the buffer is full.
    pub fn status(&self) -> Receiver<StatusNotice> {
        self.status.clone()
    }

    /// Finish queued requests, then stop the worker
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn send<T: FromEvent>(&self, op: Operation) -> Pending<T> {
        let id = CorrelationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (reply_tx, reply_rx) = channel::bounded(1);
        let pending = Pending::new(id, reply_rx);

        let envelope = Envelope {
            id,
            op,
            reply: reply_tx,
        };
        let rejected = match &self.requests {
            Some(requests) => match requests.try_send(envelope) {
                Ok(()) => return pending,
                Err(TrySendError::Full(envelope)) => (envelope, "request queue is full"),
                Err(TrySendError::Disconnected(envelope)) => (envelope, "bridge stopped"),
            },
            None => (envelope, "bridge stopped"),
        };

        let (envelope, reason) = rejected;
        tracing::warn!("Request {} rejected: {}", id, reason);
        let error = StoreError::Bridge(reason.to_string());
        let event = match envelope.op {
            Operation::Open { .. } | Operation::Ingest { .. } => Event::StorageError(error),
            Operation::Query(_) | Operation::GetAll => Event::QueryError(error),
        };
        let _ = envelope.reply.send(Response { id, event });
        pending
    }

    fn stop(&mut self) -> Result<()> {
        // Closing the queue lets the worker drain it and exit.
        self.requests.take();
        match self.worker.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| StoreError::Bridge("bridge worker panicked".to_string())),
            None => Ok(()),
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::error!("Bridge shutdown failed: {}", e);
        }
    }
}
