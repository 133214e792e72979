//! Database state
//!
//! The set of object stores behind one logical database name, its schema
//! version, and the substrate that commits reach.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::record::Record;
use crate::schema::{SchemaVersion, StoreDefinition};
use crate::storage::Substrate;

use super::store::ObjectStore;

/// On-disk shape of one store (borrowed for writing)
#[derive(Serialize)]
struct PersistedStoreRef<'a> {
    definition: &'a StoreDefinition,
    records: Vec<&'a Record>,
}

/// On-disk shape of one store (owned for reading)
#[derive(Deserialize)]
struct PersistedStore {
    definition: StoreDefinition,
    records: Vec<Record>,
}

/// Every store of one database
pub(crate) struct Database {
    /// Persisted schema version; 0 before the first upgrade
    pub version: SchemaVersion,

    /// Bumped whenever outstanding handles must stop working
    pub generation: u64,

    pub stores: BTreeMap<String, ObjectStore>,

    substrate: Substrate,
}

impl Database {
    /// Load the committed state from `substrate`, or start empty
    pub fn load(substrate: Substrate) -> Result<Self> {
        let mut stores = BTreeMap::new();
        let mut version = 0;

        if let Some((persisted_version, persisted)) = substrate.load::<Vec<PersistedStore>>()? {
            version = persisted_version;
            for store in persisted {
                let name = store.definition.name.clone();
                let rebuilt = ObjectStore::from_records(store.definition, store.records)?;
                tracing::debug!("Rebuilt store {} with {} records", name, rebuilt.len());
                stores.insert(name, rebuilt);
            }
        }

        match substrate.path() {
            Some(path) => tracing::info!("Database at {} is at schema v{}", path.display(), version),
            None => tracing::info!("In-memory database created"),
        }

        Ok(Self {
            version,
            generation: 0,
            stores,
            substrate,
        })
    }

    /// Write the current state through to the substrate
    pub fn persist(&self) -> Result<()> {
        let snapshot: Vec<PersistedStoreRef<'_>> = self
            .stores
            .values()
            .map(|store| PersistedStoreRef {
                definition: store.definition(),
                records: store.records().collect(),
            })
            .collect();

        self.substrate.save(self.version, &snapshot)
    }
}
