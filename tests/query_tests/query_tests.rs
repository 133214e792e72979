//! Tests for the Query Engine
//!
//! These tests verify:
//! - Symbol queries with and without a minimum close
//! - Empty results for unknown or empty symbols
//! - Malformed predicates are query errors
//! - Plans fall back to a primary range without a symbol index

use quotestore::query::{self, AccessPath, Comparison, Predicate, Query};
use quotestore::schema::{IndexDefinition, IndexField, SchemaManager, StoreDefinition};
use quotestore::{Config, ErrorCategory, FieldValue, Handle, Record};

// =============================================================================
// Helper Functions
// =============================================================================

fn seeded_store(definition: StoreDefinition) -> (SchemaManager, Handle) {
    let manager = SchemaManager::new(Config::builder().in_memory().build());
    let handle = manager.open(&definition, 1).unwrap();
    handle
        .upsert_batch(vec![
            Record::new("AAPL", "2024-01-02").with_field("close", 185.5).with_field("volume", 100.0),
            Record::new("AAPL", "2024-01-03").with_field("close", 187.1).with_field("volume", 200.0),
            Record::new("AAPL", "2024-01-04").with_field("close", 186.0).with_field("volume", FieldValue::Missing),
            Record::new("MSFT", "2024-01-02").with_field("close", 370.0).with_field("volume", 300.0),
        ])
        .unwrap();
    (manager, handle)
}

fn run(handle: &Handle, query: &Query) -> Vec<Record> {
    let plan = query::plan(query, &handle.definition().unwrap()).unwrap();
    query::execute(&plan, handle).unwrap().into_records()
}

fn dates(records: &[Record]) -> Vec<&str> {
    records.iter().map(|r| r.date.as_str()).collect()
}

// =============================================================================
// Symbol Queries
// =============================================================================

#[test]
fn test_min_value_filters_by_close() {
    let (_manager, handle) = seeded_store(StoreDefinition::ohlcv("prices"));

    let results = run(&handle, &Query::min_value("AAPL", 186.0));

    assert_eq!(dates(&results), vec!["2024-01-03", "2024-01-04"]);
}

#[test]
fn test_min_value_selects_single_record() {
    let (_manager, handle) = seeded_store(StoreDefinition::ohlcv("prices"));

    let results = run(&handle, &Query::min_value("AAPL", 186.5));

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].date, "2024-01-03");
    assert_eq!(results[0].close(), Some(187.1));
}

#[test]
fn test_symbol_without_filter_returns_all_rows() {
    let (_manager, handle) = seeded_store(StoreDefinition::ohlcv("prices"));

    let results = run(&handle, &Query::symbol("AAPL"));

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.symbol == "AAPL"));
}

#[test]
fn test_unknown_symbol_is_empty_not_error() {
    let (_manager, handle) = seeded_store(StoreDefinition::ohlcv("prices"));

    assert!(run(&handle, &Query::symbol("GOOG")).is_empty());
    assert!(run(&handle, &Query::min_value("GOOG", 1.0)).is_empty());
}

#[test]
fn test_empty_symbol_is_empty_not_error() {
    let (_manager, handle) = seeded_store(StoreDefinition::ohlcv("prices"));

    assert!(run(&handle, &Query::symbol("")).is_empty());
}

#[test]
fn test_missing_field_never_matches() {
    let (_manager, handle) = seeded_store(StoreDefinition::ohlcv("prices"));
    let query = Query::symbol("AAPL").filter(Predicate::new("volume", Comparison::Ge, 0.0));

    let results = run(&handle, &query);

    assert_eq!(dates(&results), vec!["2024-01-02", "2024-01-03"]);
}

#[test]
fn test_other_comparisons() {
    let (_manager, handle) = seeded_store(StoreDefinition::ohlcv("prices"));

    let lt = Query::symbol("AAPL").filter(Predicate::new("close", Comparison::Lt, 186.0));
    assert_eq!(dates(&run(&handle, &lt)), vec!["2024-01-02"]);

    let eq = Query::symbol("AAPL").filter(Predicate::new("close", Comparison::Eq, 186.0));
    assert_eq!(dates(&run(&handle, &eq)), vec!["2024-01-04"]);

    let gt = Query::symbol("MSFT").filter(Predicate::new("close", Comparison::Gt, 370.0));
    assert!(run(&handle, &gt).is_empty());
}

#[test]
fn test_execution_is_deterministic() {
    let (_manager, handle) = seeded_store(StoreDefinition::ohlcv("prices"));
    let query = Query::min_value("AAPL", 100.0);

    assert_eq!(run(&handle, &query), run(&handle, &query));
}

// =============================================================================
// Planning
// =============================================================================

#[test]
fn test_primary_range_fallback_gives_same_answer() {
    let definition = StoreDefinition::new("prices").with_index(IndexDefinition::new("date", IndexField::Date));
    let (_manager, handle) = seeded_store(definition.clone());

    let plan = query::plan(&Query::min_value("AAPL", 186.0), &definition).unwrap();
    assert!(matches!(plan.access, AccessPath::PrimaryRange { .. }));

    let results = query::execute(&plan, &handle).unwrap().into_records();
    assert_eq!(dates(&results), vec!["2024-01-03", "2024-01-04"]);
}

#[test]
fn test_malformed_predicates_are_query_errors() {
    let definition = StoreDefinition::ohlcv("prices");

    for query in [
        Query::min_value("AAPL", f64::NAN),
        Query::min_value("AAPL", f64::NEG_INFINITY),
        Query::symbol("AAPL").filter(Predicate::new(" ", Comparison::Ge, 1.0)),
        Query::symbol("AAPL").filter(Predicate::new("symbol", Comparison::Eq, 1.0)),
    ] {
        let err = query::plan(&query, &definition).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Query, "{:?}", query);
    }
}

#[test]
fn test_result_set_is_lazy_iterator() {
    let (_manager, handle) = seeded_store(StoreDefinition::ohlcv("prices"));
    let plan = query::plan(&Query::min_value("AAPL", 0.0), &handle.definition().unwrap()).unwrap();

    let mut results = query::execute(&plan, &handle).unwrap();

    assert_eq!(results.next().map(|r| r.date), Some("2024-01-02".to_string()));
    assert_eq!(results.count(), 2);
}

#[test]
fn test_execute_on_closed_handle_is_not_ready() {
    let (manager, handle) = seeded_store(StoreDefinition::ohlcv("prices"));
    let plan = query::plan(&Query::symbol("AAPL"), &StoreDefinition::ohlcv("prices")).unwrap();

    manager.close(&handle);

    let err = query::execute(&plan, &handle).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::NotReady);
}
