//! Schema Manager
//!
//! Opens databases, runs migrations, and hands out handles.
//!
//! ## Concurrency
//! - `registry`: one shared database per logical name, so concurrent opens
//!   of the same name converge on the same state
//! - `open_lock` (per database): serializes open/close/migrate
//! - `state`: readable without the data lock, so operations against a
//!   migrating or closed database are rejected instead of interleaved
//! - `db`: the records themselves, behind a RwLock (many readers, one writer)
//!
//! A directory database is unloaded on close, which releases its lock file;
//! the next open reloads it from disk.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::Config;
use crate::engine::Database;
use crate::error::{Result, StoreError};
use crate::storage::Substrate;

use super::migration::{migrate, MigrationOutcome};
use super::{SchemaVersion, StoreDefinition};

/// Lifecycle of one physical database
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    Closed,
    Opening,
    Migrating,
    Ready,
    /// The last open hit an `OpenError`; a fresh open retries from disk
    Failed(String),
}

/// State shared by every handle to one database
pub(crate) struct SharedDatabase {
    pub name: String,
    pub state: RwLock<Lifecycle>,
    pub db: RwLock<Option<Database>>,
    open_lock: Mutex<()>,

    /// Lowest generation a reloaded database may start from
    generation_floor: AtomicU64,
}

impl SharedDatabase {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: RwLock::new(Lifecycle::Closed),
            db: RwLock::new(None),
            open_lock: Mutex::new(()),
            generation_floor: AtomicU64::new(0),
        }
    }
}

/// Result of a successful open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenReport {
    /// Schema version the database is now at
    pub version: SchemaVersion,

    /// Present when the open upgraded the schema
    pub migration: Option<MigrationOutcome>,
}

// =============================================================================
// Handle
// =============================================================================

/// Token for one object store of an opened database
///
/// Handles are cheap to clone. A handle stops working (every operation
/// fails with `NotReady`) once its database is closed or migrated by a
/// later open; open again to get a fresh one.
#[derive(Clone)]
pub struct Handle {
    pub(crate) shared: Arc<SharedDatabase>,
    pub(crate) store: String,
    pub(crate) generation: u64,
}

impl Handle {
    pub fn database_name(&self) -> &str {
        &self.shared.name
    }

    pub fn store_name(&self) -> &str {
        &self.store
    }

    /// True while the database is `Ready` and this handle is current
    pub fn is_ready(&self) -> bool {
        if *self.shared.state.read() != Lifecycle::Ready {
            return false;
        }
        let db = self.shared.db.read();
        (*db)
            .as_ref()
            .map(|db| db.generation == self.generation)
            .unwrap_or(false)
    }

    /// Fail fast unless the database is `Ready`
    pub(crate) fn ensure_ready(&self) -> Result<()> {
        match &*self.shared.state.read() {
            Lifecycle::Ready => Ok(()),
            other => Err(StoreError::NotReady(format!(
                "database {} is {:?}",
                self.shared.name, other
            ))),
        }
    }

    /// Check, under the data lock, that this handle is still current
    pub(crate) fn check_current(&self, db: Option<&Database>) -> Result<()> {
        match db {
            Some(db) if db.generation == self.generation => Ok(()),
            _ => Err(StoreError::NotReady(format!(
                "stale handle for {}/{}; open the store again",
                self.shared.name, self.store
            ))),
        }
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("database", &self.shared.name)
            .field("store", &self.store)
            .field("generation", &self.generation)
            .finish()
    }
}

// =============================================================================
// Schema Manager
// =============================================================================

/// Owns the open databases of one process (or one test)
///
/// There is no global instance; share a manager with `Arc` to let several
/// bridges converge on the same databases.
pub struct SchemaManager {
    config: Config,
    registry: Mutex<HashMap<String, Arc<SharedDatabase>>>,
}

impl SchemaManager {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            registry: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Open `definition` at `version`, migrating if needed
    pub fn open(&self, definition: &StoreDefinition, version: SchemaVersion) -> Result<Handle> {
        self.open_with_report(definition, version).map(|(handle, _)| handle)
    }

    /// Like `open`, also reporting what (if anything) was migrated
    ///
    /// Steps:
    /// 1. Validate the request
    /// 2. Load the database from the substrate if it is not in memory
    /// 3. Refuse downgrades; at equal versions the store must already exist
    /// 4. At a higher version, migrate and persist under `Migrating`
    /// 5. Transition to `Ready` and issue a handle
    pub fn open_with_report(
        &self,
        definition: &StoreDefinition,
        version: SchemaVersion,
    ) -> Result<(Handle, OpenReport)> {
        // Step 1: Validate
        if version == 0 {
            return Err(StoreError::Open("schema version must be at least 1".to_string()));
        }
        definition.validate()?;

        let shared = self.shared(&self.config.database_name);
        let _open_guard = shared.open_lock.lock();

        let previous = shared.state.read().clone();
        if previous != Lifecycle::Ready {
            *shared.state.write() = Lifecycle::Opening;
        }

        match self.open_locked(&shared, definition, version, previous == Lifecycle::Ready) {
            Ok((generation, report)) => {
                *shared.state.write() = Lifecycle::Ready;
                tracing::info!(
                    "Opened {}/{} at schema v{}",
                    shared.name,
                    definition.name,
                    report.version
                );
                let handle = Handle {
                    shared: Arc::clone(&shared),
                    store: definition.name.clone(),
                    generation,
                };
                Ok((handle, report))
            }
            Err(e) => {
                // A refused request leaves a healthy database as it was.
                let next = match (&previous, shared.db.read().is_some()) {
                    (Lifecycle::Ready, true) => Lifecycle::Ready,
                    _ => Lifecycle::Failed(e.to_string()),
                };
                tracing::warn!("Open of {} failed: {}", shared.name, e);
                *shared.state.write() = next;
                Err(e)
            }
        }
    }

    /// Close the database behind `handle`
    ///
    /// Every handle issued so far stops working. Data stays committed.
    pub fn close(&self, handle: &Handle) {
        let shared = &handle.shared;
        let _open_guard = shared.open_lock.lock();

        let mut guard = shared.db.write();
        if let Some(db) = (*guard).as_mut() {
            db.generation += 1;
            shared.generation_floor.store(db.generation, Ordering::SeqCst);
        }
        if self.config.data_dir().is_some() {
            // Dropping the database releases the substrate lock.
            *guard = None;
        }
        drop(guard);
        *shared.state.write() = Lifecycle::Closed;
        tracing::info!("Closed database {}", shared.name);
    }

    /// Current lifecycle state of the configured database
    pub fn state(&self) -> Lifecycle {
        self.registry
            .lock()
            .get(&self.config.database_name)
            .map(|shared| shared.state.read().clone())
            .unwrap_or(Lifecycle::Closed)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn shared(&self, name: &str) -> Arc<SharedDatabase> {
        let mut registry = self.registry.lock();
        Arc::clone(
            registry
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(SharedDatabase::new(name))),
        )
    }

    /// Steps 2-4 of `open_with_report`; caller holds the open lock
    fn open_locked(
        &self,
        shared: &SharedDatabase,
        definition: &StoreDefinition,
        version: SchemaVersion,
        was_ready: bool,
    ) -> Result<(u64, OpenReport)> {
        let mut guard = shared.db.write();

        // Step 2: Load from the substrate
        if guard.is_none() {
            let substrate = Substrate::open(&self.config)?;
            let mut loaded = Database::load(substrate).map_err(|e| match e {
                StoreError::Corruption(msg) => StoreError::Open(format!("corrupt snapshot: {}", msg)),
                StoreError::Open(msg) => StoreError::Open(msg),
                other => StoreError::Open(other.to_string()),
            })?;
            loaded.generation = shared.generation_floor.load(Ordering::SeqCst);
            *guard = Some(loaded);
        }
        let db = (*guard)
            .as_mut()
            .ok_or_else(|| StoreError::Open(format!("database {} failed to load", shared.name)))?;

        // Step 3: Version checks
        if version < db.version {
            return Err(StoreError::Open(format!(
                "requested schema v{} is older than persisted v{}",
                version, db.version
            )));
        }

        if version == db.version {
            if !db.stores.contains_key(&definition.name) {
                return Err(StoreError::Open(format!(
                    "store {} does not exist at schema v{}; open with a higher version to create it",
                    definition.name, version
                )));
            }
            if !was_ready {
                db.generation += 1;
            }
            return Ok((
                db.generation,
                OpenReport {
                    version,
                    migration: None,
                },
            ));
        }

        // Step 4: Migrate
        *shared.state.write() = Lifecycle::Migrating;
        let from = db.version;
        tracing::info!(
            "Migrating {}/{} from v{} to v{} ({:?})",
            shared.name,
            definition.name,
            from,
            version,
            self.config.migration_policy
        );

        let backup = db.stores.clone();
        let outcome = migrate(
            &mut db.stores,
            definition,
            self.config.migration_policy,
            from,
            version,
        )
        .and_then(|outcome| {
            db.version = version;
            db.persist().map(|_| outcome)
        });

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                db.stores = backup;
                db.version = from;
                return Err(StoreError::Open(format!("migration to v{} failed: {}", version, e)));
            }
        };

        if outcome.records_discarded > 0 {
            tracing::warn!(
                "Destructive migration discarded {} records from {}",
                outcome.records_discarded,
                definition.name
            );
        }

        db.generation += 1;
        Ok((
            db.generation,
            OpenReport {
                version,
                migration: Some(outcome),
            },
        ))
    }
}
