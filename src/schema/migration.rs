//! Schema migrations
//!
//! Applied while the database is in the `Migrating` state, with the database
//! write lock held.

use std::collections::BTreeMap;

use crate::config::MigrationPolicy;
use crate::engine::ObjectStore;
use crate::error::{Result, StoreError};

use super::{SchemaVersion, StoreDefinition};

/// What a migration changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOutcome {
    pub from: SchemaVersion,
    pub to: SchemaVersion,
    pub policy: MigrationPolicy,
    /// True when the store did not exist before
    pub store_created: bool,
    pub indexes_added: Vec<String>,
    pub indexes_dropped: Vec<String>,
    /// Records lost to a destructive replace
    pub records_discarded: usize,
}

/// Bring `stores[definition.name]` in line with `definition`
pub(crate) fn migrate(
    stores: &mut BTreeMap<String, ObjectStore>,
    definition: &StoreDefinition,
    policy: MigrationPolicy,
    from: SchemaVersion,
    to: SchemaVersion,
) -> Result<MigrationOutcome> {
    let mut outcome = MigrationOutcome {
        from,
        to,
        policy,
        store_created: false,
        indexes_added: Vec::new(),
        indexes_dropped: Vec::new(),
        records_discarded: 0,
    };

    let existing = match stores.get_mut(&definition.name) {
        Some(store) => store,
        None => {
            stores.insert(definition.name.clone(), ObjectStore::new(definition.clone()));
            outcome.store_created = true;
            outcome.indexes_added = definition.indexes.iter().map(|i| i.name.clone()).collect();
            return Ok(outcome);
        }
    };

    match policy {
        MigrationPolicy::DestructiveReplace => {
            outcome.records_discarded = existing.len();
            outcome.indexes_dropped = existing.index_definitions().map(|i| i.name.clone()).collect();
            outcome.indexes_added = definition.indexes.iter().map(|i| i.name.clone()).collect();
            *existing = ObjectStore::new(definition.clone());
        }
        MigrationPolicy::Additive => {
            let stale: Vec<String> = existing
                .index_definitions()
                .filter(|current| definition.index(&current.name) != Some(*current))
                .map(|current| current.name.clone())
                .collect();
            for name in stale {
                existing.drop_index(&name);
                outcome.indexes_dropped.push(name);
            }

            for index in &definition.indexes {
                if existing.has_index(&index.name) {
                    continue;
                }
                existing.add_index(index.clone()).map_err(|e| {
                    StoreError::Open(format!(
                        "cannot build index {} on {}: {}",
                        index.name, definition.name, e
                    ))
                })?;
                outcome.indexes_added.push(index.name.clone());
            }
            existing.set_definition(definition.clone());
        }
    }

    Ok(outcome)
}
