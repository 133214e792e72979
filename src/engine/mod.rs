//! Engine Module
//!
//! Transactional operations against an opened object store.
//!
//! ## Responsibilities
//! - Batch upserts with all-or-nothing semantics
//! - Range deletes over the `(symbol, date)` primary key
//! - Range replacement (delete plus upsert) as one transaction
//! - Full scans and secondary-index scans
//! - Keep every secondary index consistent with every write
//!
//! ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
//!
//! - **Writes** (upsert/delete): hold the database write lock for the whole
//!   transaction, so no two write transactions interleave
//! - **Reads** (scan/get): share the read lock and observe the latest
//!   committed state; there is no snapshot isolation across reads
//! - Every operation first checks the handle: a closed, migrating or stale
//!   handle fails with `NotReady` and is never retried internally

mod database;
mod index;
mod store;
mod transaction;

use std::collections::BTreeSet;

use parking_lot::{MappedRwLockReadGuard, RwLockReadGuard};

use crate::error::{Result, StoreError};
use crate::record::{PrimaryKey, Record};
use crate::schema::{Handle, StoreDefinition};

pub use index::{IndexLookup, IndexValue, OrderedNumber};

pub(crate) use database::Database;
pub(crate) use store::ObjectStore;

use transaction::WriteTransaction;

/// Acknowledgment of a committed write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Distinct keys written or deleted
    pub affected: usize,
}

/// Acknowledgment of a committed range replacement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Replacement {
    /// Records that were in the range before
    pub removed: usize,
    /// Distinct keys the range holds now
    pub written: usize,
}

impl Handle {
    // =========================================================================
    // Writes
    // =========================================================================

    /// Upsert `records` in one transaction
    ///
    /// Last write wins per primary key, including duplicates inside the
    /// batch. If any record violates a constraint, nothing is committed and
    /// the error names that record's key.
    pub fn upsert_batch(&self, records: Vec<Record>) -> Result<Ack> {
        let mut txn = self.begin_write()?;
        let affected = distinct_keys(&records);
        for record in records {
            txn.put(record)?;
        }
        txn.commit()?;

        tracing::debug!("Upserted {} records into {}", affected, self.store);
        Ok(Ack { affected })
    }

    /// Delete every record whose key lies in `[low, high)`
    ///
    /// An empty range is not an error.
    pub fn delete_by_primary_range(&self, low: &PrimaryKey, high: &PrimaryKey) -> Result<Ack> {
        let mut txn = self.begin_write()?;
        let affected = txn.delete_range(low, high)?;
        txn.commit()?;

        tracing::debug!(
            "Deleted {} records in [{}, {}) from {}",
            affected,
            low,
            high,
            self.store
        );
        Ok(Ack { affected })
    }

    /// Delete every record of `symbol`
    pub fn delete_symbol(&self, symbol: &str) -> Result<Ack> {
        let (low, high) = PrimaryKey::symbol_range(symbol);
        self.delete_by_primary_range(&low, &high)
    }

    /// Replace the contents of `[low, high)` with `records` in one transaction
    ///
    /// Every record must key inside the range. If anything fails (a
    /// constraint, the quota, the commit itself) the range keeps exactly
    /// what it held before.
    pub fn replace_primary_range(
        &self,
        low: &PrimaryKey,
        high: &PrimaryKey,
        records: Vec<Record>,
    ) -> Result<Replacement> {
        if let Some(key) = records
            .iter()
            .map(Record::key)
            .find(|key| key < low || key >= high)
        {
            return Err(StoreError::Write {
                key,
                reason: format!("outside the replaced range [{}, {})", low, high),
            });
        }

        let written = distinct_keys(&records);
        let mut txn = self.begin_write()?;
        let removed = txn.delete_range(low, high)?;
        for record in records {
            txn.put(record)?;
        }
        txn.commit()?;

        tracing::debug!(
            "Replaced [{}, {}) in {}: removed={}, written={}",
            low,
            high,
            self.store,
            removed,
            written
        );
        Ok(Replacement { removed, written })
    }

    /// Replace every record of `symbol` with `records`
    pub fn replace_symbol(&self, symbol: &str, records: Vec<Record>) -> Result<Replacement> {
        let (low, high) = PrimaryKey::symbol_range(symbol);
        self.replace_primary_range(&low, &high, records)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Every record, for verification and debugging
    ///
    /// Order is unspecified (currently primary-key order).
    pub fn get_all(&self) -> Result<Vec<Record>> {
        let store = self.read()?;
        Ok(store.records().cloned().collect())
    }

    pub fn get(&self, key: &PrimaryKey) -> Result<Option<Record>> {
        let store = self.read()?;
        Ok(store.get(key).cloned())
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    /// Records matching `lookup` on index `index`, in index-key order
    pub fn index_scan(&self, index: &str, lookup: &IndexLookup) -> Result<Vec<Record>> {
        self.read()?.scan_index(index, lookup)
    }

    /// Records with keys in `[low, high)`, in key order
    pub fn primary_range_scan(&self, low: &PrimaryKey, high: &PrimaryKey) -> Result<Vec<Record>> {
        let store = self.read()?;
        Ok(store
            .keys_in_range(low, high)
            .iter()
            .filter_map(|key| store.get(key).cloned())
            .collect())
    }

    /// The definition the store currently has on disk
    pub fn definition(&self) -> Result<StoreDefinition> {
        Ok(self.read()?.definition().clone())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn read(&self) -> Result<MappedRwLockReadGuard<'_, ObjectStore>> {
        self.ensure_ready()?;
        let guard = self.shared.db.read();
        self.check_current((*guard).as_ref())?;

        let store = self.store.as_str();
        RwLockReadGuard::try_map(guard, |db| db.as_ref().and_then(|db| db.stores.get(store)))
            .map_err(|_| StoreError::NotReady(format!("store {} is not open", store)))
    }

    fn begin_write(&self) -> Result<WriteTransaction<'_>> {
        self.ensure_ready()?;
        let guard = self.shared.db.write();
        self.check_current((*guard).as_ref())?;
        Ok(WriteTransaction::new(guard, &self.store))
    }
}

fn distinct_keys(records: &[Record]) -> usize {
    records.iter().map(Record::key).collect::<BTreeSet<_>>().len()
}
