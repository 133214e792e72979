//! Query Module
//!
//! Logical queries over one symbol, planned as a single index scan plus a
//! linear post-filter.
//!
//! ## Planning
//! ```text
//! Query { symbol, predicate? }
//!        │
//!        ▼
//! ┌──────────────────────────────┐      ┌──────────────────────────┐
//! │ Access path                  │      │ Post-filter              │
//! │  symbol index == symbol      │ ───▶ │  field <op> value        │
//! │  (or primary symbol range)   │      │  (missing never matches) │
//! └──────────────────────────────┘      └──────────────────────────┘
//! ```
//!
//! Compound index intersection is not supported.

mod plan;

use std::fmt;

use crate::error::{Result, StoreError};
use crate::record::{Record, CLOSE_FIELD, DATE_FIELD, SYMBOL_FIELD};

pub use plan::{execute, plan, AccessPath, ExecutionPlan, ResultSet};

/// Comparison operator of a numeric predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Comparison {
    fn holds(self, left: f64, right: f64) -> bool {
        match self {
            Comparison::Eq => left == right,
            Comparison::Gt => left > right,
            Comparison::Ge => left >= right,
            Comparison::Lt => left < right,
            Comparison::Le => left <= right,
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Comparison::Eq => "==",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Lt => "<",
            Comparison::Le => "<=",
        };
        f.write_str(op)
    }
}

/// `field <op> value` over a single numeric payload field
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: String,
    pub op: Comparison,
    pub value: f64,
}

impl Predicate {
    pub fn new(field: impl Into<String>, op: Comparison, value: f64) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    /// `close >= value`
    pub fn min_close(value: f64) -> Self {
        Self::new(CLOSE_FIELD, Comparison::Ge, value)
    }

    pub fn validate(&self) -> Result<()> {
        let field = self.field.trim();
        if field.is_empty() {
            return Err(StoreError::Query("predicate field is empty".to_string()));
        }
        if field == SYMBOL_FIELD || field == DATE_FIELD {
            return Err(StoreError::Query(format!(
                "{} is not a numeric field",
                field
            )));
        }
        if !self.value.is_finite() {
            return Err(StoreError::Query(format!(
                "predicate value for {} must be finite, got {}",
                field, self.value
            )));
        }
        Ok(())
    }

    /// Records whose field is missing or non-numeric never match
    pub fn matches(&self, record: &Record) -> bool {
        record
            .number(&self.field)
            .map(|n| self.op.holds(n, self.value))
            .unwrap_or(false)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.op, self.value)
    }
}

/// Records of one symbol, optionally filtered
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub symbol: String,
    pub predicate: Option<Predicate>,
}

impl Query {
    /// Every record of `symbol`
    pub fn symbol(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            predicate: None,
        }
    }

    /// Records of `symbol` with `close >= min_value`
    pub fn min_value(symbol: impl Into<String>, min_value: f64) -> Self {
        Self::symbol(symbol).filter(Predicate::min_close(min_value))
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }
}
