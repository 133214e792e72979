//! Write transactions
//!
//! A write transaction holds the database write lock for its whole life,
//! applies mutations immediately while recording how to undo them, and
//! persists the result on `commit`. Dropping it uncommitted (including on
//! any `?` early return) rolls every mutation back.

use parking_lot::RwLockWriteGuard;

use crate::error::{Result, StoreError};
use crate::record::{PrimaryKey, Record};

use super::database::Database;
use super::store::ObjectStore;

/// How to reverse one applied mutation
enum Undo {
    /// Key was absent before; remove it
    Remove(PrimaryKey),
    /// Key held this record before; put it back
    Restore(Record),
}

pub(crate) struct WriteTransaction<'a> {
    guard: RwLockWriteGuard<'a, Option<Database>>,
    store: &'a str,
    undo: Vec<Undo>,
    committed: bool,
}

impl<'a> WriteTransaction<'a> {
    /// Caller has already checked the handle against `guard`
    pub fn new(guard: RwLockWriteGuard<'a, Option<Database>>, store: &'a str) -> Self {
        Self {
            guard,
            store,
            undo: Vec::new(),
            committed: false,
        }
    }

    fn store_mut(&mut self) -> Result<&mut ObjectStore> {
        let store = self.store;
        (*self.guard)
            .as_mut()
            .and_then(|db| db.stores.get_mut(store))
            .ok_or_else(|| StoreError::NotReady(format!("store {} is not open", store)))
    }

    /// Last-write-wins insert
    pub fn put(&mut self, record: Record) -> Result<()> {
        let key = record.key();
        let prior = self.store_mut()?.put(record)?;
        self.undo.push(match prior {
            Some(prior) => Undo::Restore(prior),
            None => Undo::Remove(key),
        });
        Ok(())
    }

    /// Remove every key in `[low, high)`, returning how many went
    pub fn delete_range(&mut self, low: &PrimaryKey, high: &PrimaryKey) -> Result<usize> {
        let store = self.store_mut()?;
        let keys = store.keys_in_range(low, high);
        let mut removed = Vec::with_capacity(keys.len());
        for key in &keys {
            if let Some(record) = store.remove(key) {
                removed.push(record);
            }
        }

        let count = removed.len();
        self.undo.extend(removed.into_iter().map(Undo::Restore));
        Ok(count)
    }

    /// Persist and release the lock
    pub fn commit(mut self) -> Result<()> {
        if !self.undo.is_empty() {
            let db = (*self.guard)
                .as_ref()
                .ok_or_else(|| StoreError::NotReady("database is not loaded".to_string()))?;
            if let Err(e) = db.persist() {
                tracing::warn!("Commit to {} failed, rolling back: {}", self.store, e);
                return Err(match e {
                    StoreError::Io(io) => StoreError::Storage(io.to_string()),
                    other => other,
                });
            }
        }
        self.committed = true;
        Ok(())
    }

    fn rollback(&mut self) {
        let store = self.store;
        let undo = std::mem::take(&mut self.undo);
        let objects = match (*self.guard).as_mut().and_then(|db| db.stores.get_mut(store)) {
            Some(objects) => objects,
            None => return,
        };

        for step in undo.into_iter().rev() {
            match step {
                Undo::Remove(key) => {
                    objects.remove(&key);
                }
                Undo::Restore(record) => {
                    // Restoring in reverse order replays a valid earlier state.
                    if let Err(e) = objects.put(record) {
                        tracing::error!("Rollback could not restore a record: {}", e);
                    }
                }
            }
        }
    }
}

impl Drop for WriteTransaction<'_> {
    fn drop(&mut self) {
        if !self.committed && !self.undo.is_empty() {
            tracing::debug!("Rolling back {} mutations on {}", self.undo.len(), self.store);
            self.rollback();
        }
    }
}
