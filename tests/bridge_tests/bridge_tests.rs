//! Tests for the Async Bridge
//!
//! These tests verify:
//! - Every request resolves to exactly one reply with its own correlation id
//! - Status notices report ready/opened/migrated and per-request outcomes
//! - Re-ingesting a symbol replaces its rows (delete before insert)
//! - Unpriced rows are dropped at ingest
//! - Errors stay local to the request that caused them
//! - Shutdown drains queued requests

use std::sync::Arc;
use std::time::Duration;

use quotestore::bridge::{Event, EventKind, Operation, Outcome};
use quotestore::record::{RawRecord, RawValue};
use quotestore::schema::SchemaManager;
use quotestore::{Bridge, Config, CorrelationId, ErrorCategory, StatusNotice, StoreDefinition, StoreError};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

const WAIT: Duration = Duration::from_secs(10);

fn memory_bridge() -> Bridge {
    Bridge::spawn(Config::builder().in_memory().build(), StoreDefinition::ohlcv("prices"), 1).unwrap()
}

fn row(date: &str, close: f64) -> RawRecord {
    RawRecord::from_pairs([("date", RawValue::from(date)), ("close", RawValue::from(close))])
}

fn unpriced(date: &str) -> RawRecord {
    RawRecord::from_pairs([("date", RawValue::from(date)), ("close", RawValue::Null)])
}

fn drain(status: &crossbeam::channel::Receiver<StatusNotice>) -> Vec<StatusNotice> {
    status.try_iter().collect()
}

// =============================================================================
// Correlation Tests
// =============================================================================

#[test]
fn test_requests_get_distinct_ids() {
    let bridge = memory_bridge();

    let first = bridge.submit_query("AAPL", None);
    let second = bridge.submit_query("AAPL", None);

    assert_ne!(first.id(), second.id());
    assert_ne!(first.id(), CorrelationId::BRIDGE);
    assert!(first.wait().unwrap().is_empty());
    assert!(second.wait().unwrap().is_empty());
}

#[test]
fn test_replies_resolve_out_of_order_waits() {
    let bridge = memory_bridge();

    let ingest = bridge.submit_ingest("AAPL", vec![row("2024-01-02", 185.5)]);
    let query = bridge.submit_query("AAPL", None);

    // Waiting on the later request first must not steal the earlier reply.
    assert_eq!(query.wait().unwrap().len(), 1);
    assert_eq!(ingest.wait().unwrap().stored, 1);
}

#[test]
fn test_try_take_polls_until_reply() {
    let bridge = memory_bridge();
    let pending = bridge.get_all();

    let result = loop {
        if let Some(result) = pending.try_take() {
            break result;
        }
        std::thread::sleep(Duration::from_millis(1));
    };

    assert!(result.unwrap().is_empty());
}

#[test]
fn test_wait_timeout_returns_reply() {
    let bridge = memory_bridge();

    let reply = bridge.submit_query("AAPL", Some(1.0)).wait_timeout(WAIT);

    assert!(reply.unwrap().unwrap().is_empty());
}

// =============================================================================
// Status Notice Tests
// =============================================================================

#[test]
fn test_status_notices_follow_requests() {
    let bridge = memory_bridge();
    let status = bridge.status();

    let ingest = bridge.submit_ingest("AAPL", vec![row("2024-01-02", 185.5)]);
    let ingest_id = ingest.id();
    ingest.wait().unwrap();
    let query = bridge.submit_query("AAPL", Some(f64::NAN));
    let query_id = query.id();
    assert!(query.wait().is_err());

    let notices = drain(&status);
    assert_eq!(notices[0], StatusNotice { id: CorrelationId::BRIDGE, kind: EventKind::Ready });
    // The first request lazily opens (creating the store at v1).
    assert_eq!(notices[1], StatusNotice { id: ingest_id, kind: EventKind::Migrated });
    assert_eq!(notices[2], StatusNotice { id: ingest_id, kind: EventKind::StorageSuccess });
    assert_eq!(notices[3], StatusNotice { id: query_id, kind: EventKind::QueryError });
    assert_eq!(notices[3].kind.outcome(), Outcome::Error);
    assert_eq!(notices.len(), 4);
}

#[test]
fn test_explicit_open_reports_migration() {
    let bridge = memory_bridge();

    let ack = bridge.open(StoreDefinition::ohlcv("prices"), 1).wait().unwrap();
    assert_eq!(ack.version, 1);
    assert_eq!(ack.migrated_from, Some(0));

    let ack = bridge.open(StoreDefinition::ohlcv("prices"), 1).wait().unwrap();
    assert_eq!(ack.migrated_from, None);

    let ack = bridge.open(StoreDefinition::ohlcv("prices"), 2).wait().unwrap();
    assert_eq!((ack.version, ack.migrated_from), (2, Some(1)));
}

#[test]
fn test_raw_event_access() {
    let bridge = memory_bridge();

    let event = bridge.request(Operation::GetAll).wait().unwrap();

    match event {
        Event::QueryResult(records) => assert!(records.is_empty()),
        other => panic!("unexpected {:?}", other),
    }
}

// =============================================================================
// Ingest Tests
// =============================================================================

#[test]
fn test_reingest_replaces_symbol_rows() {
    let bridge = memory_bridge();

    bridge
        .submit_ingest("MSFT", vec![row("2024-01-02", 370.0), row("2024-01-03", 371.0)])
        .wait()
        .unwrap();
    let report = bridge
        .submit_ingest("MSFT", vec![row("2024-02-01", 400.0)])
        .wait()
        .unwrap();

    assert_eq!(report.replaced, 2);
    assert_eq!(report.stored, 1);
    let msft: Vec<_> = bridge
        .get_all()
        .wait()
        .unwrap()
        .into_iter()
        .filter(|r| r.symbol == "MSFT")
        .map(|r| r.date)
        .collect();
    assert_eq!(msft, vec!["2024-02-01".to_string()]);
}

#[test]
fn test_reingest_leaves_other_symbols() {
    let bridge = memory_bridge();

    bridge.submit_ingest("AAPL", vec![row("2024-01-02", 1.0)]).wait().unwrap();
    bridge.submit_ingest("MSFT", vec![row("2024-01-02", 2.0)]).wait().unwrap();
    bridge.submit_ingest("MSFT", vec![row("2024-01-03", 3.0)]).wait().unwrap();

    assert_eq!(bridge.submit_query("AAPL", None).wait().unwrap().len(), 1);
}

#[test]
fn test_same_batch_twice_is_idempotent() {
    let bridge = memory_bridge();
    let batch = vec![row("2024-01-02", 185.5), row("2024-01-03", 187.1), unpriced("2024-01-04")];

    bridge.submit_ingest("AAPL", batch.clone()).wait().unwrap();
    let once = bridge.get_all().wait().unwrap();
    bridge.submit_ingest("AAPL", batch).wait().unwrap();
    let twice = bridge.get_all().wait().unwrap();

    assert_eq!(once, twice);
}

#[test]
fn test_unpriced_rows_are_rejected() {
    let bridge = memory_bridge();

    let report = bridge
        .submit_ingest("AAPL", vec![row("2024-01-02", 185.5), unpriced("2024-01-03")])
        .wait()
        .unwrap();

    assert_eq!((report.stored, report.rejected), (1, 1));
    let all = bridge.get_all().wait().unwrap();
    assert_eq!(all.len(), 1);
    assert!(all.iter().all(|r| r.close().is_some()));
}

#[test]
fn test_legacy_rows_ingest() {
    let bridge = memory_bridge();

    bridge
        .submit_ingest("AAPL", vec![RawRecord::text("{'Date': '2024-02-01', 'Close': 150.25}")])
        .wait()
        .unwrap();

    let results = bridge.submit_query("AAPL", Some(150.0)).wait().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].date, "2024-02-01");
}

// =============================================================================
// Error Locality Tests
// =============================================================================

#[test]
fn test_bad_batch_leaves_existing_rows() {
    let bridge = memory_bridge();
    bridge.submit_ingest("AAPL", vec![row("2024-01-02", 1.0)]).wait().unwrap();

    let bad = RawRecord::from_pairs([("date", RawValue::from("not a date")), ("close", RawValue::from(2.0))]);
    let err = bridge
        .submit_ingest("AAPL", vec![row("2024-01-03", 2.0), bad])
        .wait()
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Normalization);
    assert_eq!(bridge.submit_query("AAPL", None).wait().unwrap().len(), 1);
}

#[test]
fn test_failed_reingest_write_keeps_previous_rows() {
    let config = Config::builder().in_memory().quota_bytes(4 * 1024).build();
    let bridge = Bridge::spawn(config, StoreDefinition::ohlcv("prices"), 1).unwrap();
    bridge
        .submit_ingest("AAPL", vec![row("2024-01-02", 185.5), row("2024-01-03", 187.1)])
        .wait()
        .unwrap();

    let oversized: Vec<_> = (0..500)
        .map(|minute| row(&format!("2020-01-01 {:02}:{:02}:00", minute / 60, minute % 60), minute as f64))
        .collect();
    let err = bridge.submit_ingest("AAPL", oversized).wait().unwrap_err();

    assert!(matches!(err, StoreError::QuotaExceeded { .. }), "{}", err);
    let dates: Vec<_> = bridge.get_all().wait().unwrap().into_iter().map(|r| r.date).collect();
    assert_eq!(dates, vec!["2024-01-02".to_string(), "2024-01-03".to_string()]);
}

#[test]
fn test_duplicate_dates_count_once() {
    let bridge = memory_bridge();

    let report = bridge
        .submit_ingest("AAPL", vec![row("2024-01-02", 1.0), row("2024-01-02", 2.0)])
        .wait()
        .unwrap();

    assert_eq!(report.stored, 1);
    assert_eq!(bridge.get_all().wait().unwrap().len(), 1);
}

#[test]
fn test_errors_do_not_affect_other_requests() {
    let bridge = memory_bridge();

    let bad_query = bridge.submit_query("AAPL", Some(f64::INFINITY));
    let empty_symbol = bridge.submit_ingest("  ", vec![row("2024-01-02", 1.0)]);
    let good = bridge.submit_ingest("AAPL", vec![row("2024-01-02", 1.0)]);

    assert_eq!(bad_query.wait().unwrap_err().category(), ErrorCategory::Query);
    assert_eq!(empty_symbol.wait().unwrap_err().category(), ErrorCategory::Normalization);
    assert_eq!(good.wait().unwrap().stored, 1);
}

#[test]
fn test_open_failure_is_reported_to_requester() {
    let bridge = memory_bridge();
    bridge.open(StoreDefinition::ohlcv("prices"), 2).wait().unwrap();

    let err = bridge.open(StoreDefinition::ohlcv("prices"), 1).wait().unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Open);
}

#[test]
fn test_spawn_rejects_invalid_version() {
    let result = Bridge::spawn(Config::builder().in_memory().build(), StoreDefinition::ohlcv("prices"), 0);

    assert!(result.is_err());
}

// =============================================================================
// Shared Manager Tests
// =============================================================================

#[test]
fn test_bridges_share_a_database() {
    let temp_dir = TempDir::new().unwrap();
    let manager = Arc::new(SchemaManager::new(Config::builder().data_dir(temp_dir.path()).build()));
    let writer = Bridge::with_manager(Arc::clone(&manager), StoreDefinition::ohlcv("prices"), 1).unwrap();
    let reader = Bridge::with_manager(Arc::clone(&manager), StoreDefinition::ohlcv("prices"), 1).unwrap();

    writer.submit_ingest("AAPL", vec![row("2024-01-02", 185.5)]).wait().unwrap();
    writer.shutdown().unwrap();

    assert_eq!(reader.submit_query("AAPL", None).wait().unwrap().len(), 1);
}

#[test]
fn test_second_owner_of_a_directory_is_refused() {
    let temp_dir = TempDir::new().unwrap();
    let config = || Config::builder().data_dir(temp_dir.path()).build();
    let first = Bridge::spawn(config(), StoreDefinition::ohlcv("prices"), 1).unwrap();
    let second = Bridge::spawn(config(), StoreDefinition::ohlcv("prices"), 1).unwrap();

    first.submit_ingest("AAPL", vec![row("2024-01-02", 185.5)]).wait().unwrap();
    let err = second.submit_ingest("MSFT", vec![row("2024-01-02", 370.0)]).wait().unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Open);

    first.shutdown().unwrap();
    second.submit_ingest("MSFT", vec![row("2024-01-02", 370.0)]).wait().unwrap();
    let symbols: Vec<_> = second.get_all().wait().unwrap().into_iter().map(|r| r.symbol).collect();
    assert_eq!(symbols, vec!["AAPL".to_string(), "MSFT".to_string()]);
}

#[test]
fn test_bridge_reopens_after_external_migration() {
    let manager = Arc::new(SchemaManager::new(Config::builder().in_memory().build()));
    let bridge = Bridge::with_manager(Arc::clone(&manager), StoreDefinition::ohlcv("prices"), 1).unwrap();
    bridge.submit_ingest("AAPL", vec![row("2024-01-02", 1.0)]).wait().unwrap();

    // Another party upgrades the schema; the bridge's handle goes stale.
    manager.open(&StoreDefinition::ohlcv("prices"), 2).unwrap();

    let err = bridge.get_all().wait().unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Open);

    let ack = bridge.open(StoreDefinition::ohlcv("prices"), 2).wait().unwrap();
    assert_eq!(ack.version, 2);
    assert_eq!(bridge.get_all().wait().unwrap().len(), 1);
}

// =============================================================================
// Shutdown Tests
// =============================================================================

#[test]
fn test_shutdown_drains_queue() {
    let bridge = memory_bridge();

    let pending: Vec<_> = (0..20)
        .map(|day| bridge.submit_ingest(format!("S{}", day), vec![row("2024-01-02", day as f64)]))
        .collect();
    bridge.shutdown().unwrap();

    for p in pending {
        assert_eq!(p.wait().unwrap().stored, 1);
    }
}

#[test]
fn test_directory_bridge_persists_across_restarts() {
    let temp_dir = TempDir::new().unwrap();
    let config = || Config::builder().data_dir(temp_dir.path()).build();

    let bridge = Bridge::spawn(config(), StoreDefinition::ohlcv("prices"), 1).unwrap();
    bridge.submit_ingest("AAPL", vec![row("2024-01-02", 185.5)]).wait().unwrap();
    bridge.shutdown().unwrap();

    let bridge = Bridge::spawn(config(), StoreDefinition::ohlcv("prices"), 1).unwrap();
    let results = bridge.submit_query("AAPL", None).wait().unwrap();
    assert_eq!(results.len(), 1);
}
