//! Object store
//!
//! Primary records plus their secondary indexes. Every mutation updates the
//! indexes in the same call, so the two can never disagree.

use std::collections::BTreeMap;

use crate::error::{Result, StoreError};
use crate::record::{PrimaryKey, Record};
use crate::schema::{IndexDefinition, StoreDefinition};

use super::index::{IndexLookup, SecondaryIndex};

/// One object store: records keyed by `(symbol, date)` and their indexes
#[derive(Debug, Clone)]
pub(crate) struct ObjectStore {
    definition: StoreDefinition,
    records: BTreeMap<PrimaryKey, Record>,
    indexes: BTreeMap<String, SecondaryIndex>,
}

impl ObjectStore {
    /// Create an empty store for `definition`
    pub fn new(definition: StoreDefinition) -> Self {
        let indexes = definition
            .indexes
            .iter()
            .map(|def| (def.name.clone(), SecondaryIndex::new(def.clone())))
            .collect();

        Self {
            definition,
            records: BTreeMap::new(),
            indexes,
        }
    }

    /// Rebuild a store (and all its indexes) from persisted records
    pub fn from_records(definition: StoreDefinition, records: Vec<Record>) -> Result<Self> {
        let mut store = Self::new(definition);
        for record in records {
            store.put(record)?;
        }
        Ok(store)
    }

    pub fn definition(&self) -> &StoreDefinition {
        &self.definition
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn get(&self, key: &PrimaryKey) -> Option<&Record> {
        self.records.get(key)
    }

    /// All records in primary-key order
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    /// Primary keys in `[low, high)`
    pub fn keys_in_range(&self, low: &PrimaryKey, high: &PrimaryKey) -> Vec<PrimaryKey> {
        if low >= high {
            return Vec::new();
        }
        self.records
            .range(low.clone()..high.clone())
            .map(|(key, _)| key.clone())
            .collect()
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Insert or replace a record, returning the value it replaced
    ///
    /// Constraints are checked before anything is touched; on error the
    /// store is unchanged.
    pub fn put(&mut self, record: Record) -> Result<Option<Record>> {
        let key = record.key();

        if key.symbol.trim().is_empty() || key.date.trim().is_empty() {
            return Err(StoreError::Write {
                key,
                reason: "symbol and date must be non-empty".to_string(),
            });
        }

        // Derive every index value up front.
        let mut new_values = Vec::with_capacity(self.indexes.len());
        for (name, index) in &self.indexes {
            let value = index
                .extract(&record)
                .map_err(|reason| StoreError::Write {
                    key: key.clone(),
                    reason,
                })?;
            if let Some(value) = &value {
                index
                    .check_unique(value, &key)
                    .map_err(|reason| StoreError::Write {
                        key: key.clone(),
                        reason,
                    })?;
            }
            new_values.push((name.clone(), value));
        }

        let prior = self.remove(&key);

        for (name, value) in new_values {
            if let (Some(index), Some(value)) = (self.indexes.get_mut(&name), value) {
                index.insert(value, key.clone());
            }
        }
        self.records.insert(key, record);

        Ok(prior)
    }

    /// Remove a record and its index entries
    pub fn remove(&mut self, key: &PrimaryKey) -> Option<Record> {
        let record = self.records.remove(key)?;
        for index in self.indexes.values_mut() {
            // Values were validated when the record went in.
            if let Ok(Some(value)) = index.extract(&record) {
                index.remove(&value, key);
            }
        }
        Some(record)
    }

    // =========================================================================
    // Index Access
    // =========================================================================

    /// Records matching `lookup` on index `name`, in index order
    pub fn scan_index(&self, name: &str, lookup: &IndexLookup) -> Result<Vec<Record>> {
        let index = self.indexes.get(name).ok_or_else(|| {
            StoreError::Query(format!(
                "store {} has no index named {}",
                self.definition.name, name
            ))
        })?;

        Ok(index
            .lookup(lookup)
            .iter()
            .filter_map(|key| self.records.get(key).cloned())
            .collect())
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.indexes.contains_key(name)
    }

    /// Add an index and backfill it from existing records
    pub fn add_index(&mut self, definition: IndexDefinition) -> Result<()> {
        let mut index = SecondaryIndex::new(definition.clone());

        for (key, record) in &self.records {
            let value = index.extract(record).map_err(|reason| StoreError::Write {
                key: key.clone(),
                reason,
            })?;
            if let Some(value) = value {
                index
                    .check_unique(&value, key)
                    .map_err(|reason| StoreError::Write {
                        key: key.clone(),
                        reason,
                    })?;
                index.insert(value, key.clone());
            }
        }

        tracing::debug!(
            "Built index {} with {} distinct values",
            definition.name,
            index.value_count()
        );
        self.definition.indexes.retain(|d| d.name != definition.name);
        self.definition.indexes.push(definition.clone());
        self.indexes.insert(definition.name, index);
        Ok(())
    }

    /// Drop an index; records are untouched
    pub fn drop_index(&mut self, name: &str) -> bool {
        self.definition.indexes.retain(|d| d.name != name);
        self.indexes.remove(name).is_some()
    }

    /// Adopt `definition` once its indexes are materialized
    pub fn set_definition(&mut self, definition: StoreDefinition) {
        self.definition = definition;
    }

    /// Index definitions currently materialized, by name
    pub fn index_definitions(&self) -> impl Iterator<Item = &IndexDefinition> {
        self.indexes.values().map(|index| index.definition())
    }
}
