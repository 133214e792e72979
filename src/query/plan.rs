//! Query planning and execution

use crate::engine::{IndexLookup, IndexValue};
use crate::error::Result;
use crate::record::{PrimaryKey, Record};
use crate::schema::{Handle, IndexField, StoreDefinition};

use super::{Predicate, Query};

/// How the candidate records are fetched
#[derive(Debug, Clone, PartialEq)]
pub enum AccessPath {
    /// Equality lookup on a secondary index
    IndexEquality { index: String, value: IndexValue },

    /// Primary-key range `[low, high)`, when no symbol index exists
    PrimaryRange { low: PrimaryKey, high: PrimaryKey },

    /// Nothing can match (empty symbol)
    Empty,
}

/// A planned query: one access path plus an optional post-filter
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    pub access: AccessPath,
    pub filter: Option<Predicate>,
}

/// Plan `query` against a store shaped like `definition`
pub fn plan(query: &Query, definition: &StoreDefinition) -> Result<ExecutionPlan> {
    if let Some(predicate) = &query.predicate {
        predicate.validate()?;
    }

    let symbol = query.symbol.trim();
    let access = if symbol.is_empty() {
        AccessPath::Empty
    } else if let Some(index) = definition.index_on(&IndexField::Symbol) {
        AccessPath::IndexEquality {
            index: index.name.clone(),
            value: IndexValue::text(symbol),
        }
    } else {
        let (low, high) = PrimaryKey::symbol_range(symbol);
        AccessPath::PrimaryRange { low, high }
    };

    Ok(ExecutionPlan {
        access,
        filter: query.predicate.clone(),
    })
}

/// Run `plan` against `handle`
///
/// Does not mutate state. The scan happens now; the post-filter runs as the
/// caller pulls from the returned `ResultSet`.
pub fn execute(plan: &ExecutionPlan, handle: &Handle) -> Result<ResultSet> {
    let candidates = match &plan.access {
        AccessPath::Empty => Vec::new(),
        AccessPath::IndexEquality { index, value } => {
            handle.index_scan(index, &IndexLookup::Equal(value.clone()))?
        }
        AccessPath::PrimaryRange { low, high } => handle.primary_range_scan(low, high)?,
    };

    tracing::trace!(
        "Query on {} scanned {} candidates ({:?})",
        handle.store_name(),
        candidates.len(),
        plan.access
    );

    Ok(ResultSet {
        rows: candidates.into_iter(),
        filter: plan.filter.clone(),
    })
}

/// Lazily filtered query result, owned by the requester
#[derive(Debug)]
pub struct ResultSet {
    rows: std::vec::IntoIter<Record>,
    filter: Option<Predicate>,
}

impl ResultSet {
    /// Drain into a vector
    pub fn into_records(self) -> Vec<Record> {
        self.collect()
    }
}

impl Iterator for ResultSet {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        match &self.filter {
            None => self.rows.next(),
            Some(predicate) => self.rows.by_ref().find(|record| predicate.matches(record)),
        }
    }
}
