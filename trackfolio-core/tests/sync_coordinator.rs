//! Integration tests for the sync coordinator against a scripted provider.
//!
//! Tests:
//! 1. First sync covers the lookback window; a same-day second sync makes no calls
//! 2. A failing symbol does not stop its siblings and keeps its watermark;
//!    unstorable symbols never reach the provider
//! 3. Concurrent fetches never exceed the configured pool size; overlapping
//!    syncs of one symbol are serialized
//! 4. Rate limiting is retried until success, and exhausted retries fail the symbol
//! 5. Cancellation and duplicate symbols

use chrono::{Duration, NaiveDate};
use std::sync::{Arc, Barrier};
use tempfile::TempDir;
use trackfolio_core::cancel::CancelToken;
use trackfolio_core::data::{
    BarStore, FetchError, MockProvider, RetryPolicy, WatermarkStore,
};
use trackfolio_core::domain::Bar;
use trackfolio_core::sync::{FixedClock, SymbolOutcome, SyncCoordinator, SyncSettings};

// ── Helpers ──────────────────────────────────────────────────────────

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()
}

/// `n` consecutive daily bars ending on `last`.
fn daily_bars(n: i64, last: NaiveDate) -> Vec<Bar> {
    (0..n)
        .map(|i| {
            let date = last - Duration::days(n - 1 - i);
            let close = 100.0 + (i as f64 * 0.3).sin() * 5.0;
            Bar {
                date,
                open: close - 0.5,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 10_000,
            }
        })
        .collect()
}

fn symbols(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

struct Harness {
    dir: TempDir,
    provider: Arc<MockProvider>,
    store: Arc<BarStore>,
    clock: Arc<FixedClock>,
    coordinator: SyncCoordinator,
}

fn fast_settings(max_concurrent_fetches: usize) -> SyncSettings {
    SyncSettings {
        lookback_days: 800,
        max_concurrent_fetches,
        retry: RetryPolicy {
            max_retries: 5,
            backoff: std::time::Duration::ZERO,
        },
    }
}

fn harness_with(provider: MockProvider, settings: SyncSettings) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(provider);
    let store = Arc::new(BarStore::new(dir.path().join("bars"), 500));
    let watermarks = WatermarkStore::open(dir.path().join("watermarks.json")).unwrap();
    let clock = Arc::new(FixedClock::new(today()));
    let coordinator = SyncCoordinator::new(
        provider.clone(),
        store.clone(),
        watermarks,
        clock.clone(),
        settings,
        CancelToken::new(),
    )
    .unwrap();
    Harness {
        dir,
        provider,
        store,
        clock,
        coordinator,
    }
}

fn harness() -> Harness {
    harness_with(MockProvider::new(), fast_settings(5))
}

// ── 1. Freshness ─────────────────────────────────────────────────────

#[test]
fn first_sync_requests_full_lookback_window() {
    let h = harness();
    h.provider.set_bars("AAPL", daily_bars(30, today()));

    let report = h.coordinator.ensure_fresh(&symbols(&["AAPL"]));

    assert!(report.all_succeeded());
    let calls = h.provider.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].start, today() - Duration::days(800));
    assert_eq!(calls[0].end, today());
    assert_eq!(
        report.outcome("AAPL"),
        Some(&SymbolOutcome::Updated {
            fetched: 30,
            latest: today(),
            stored: 30,
        })
    );
    assert_eq!(h.coordinator.watermarks().get("AAPL"), Some(today()));
    assert_eq!(h.store.load("AAPL").len(), 30);
}

#[test]
fn second_sync_same_day_makes_no_upstream_calls() {
    let h = harness();
    h.provider.set_bars("AAPL", daily_bars(10, today()));

    h.coordinator.ensure_fresh(&symbols(&["AAPL"]));
    assert_eq!(h.provider.total_calls(), 1);

    let report = h.coordinator.ensure_fresh(&symbols(&["AAPL"]));
    assert_eq!(h.provider.total_calls(), 1);
    assert_eq!(report.outcome("AAPL"), Some(&SymbolOutcome::Fresh));
    assert!(report.changed_symbols().is_empty());
}

#[test]
fn later_sync_starts_day_after_watermark() {
    let h = harness();
    h.provider.set_bars("AAPL", daily_bars(10, today()));
    h.coordinator.ensure_fresh(&symbols(&["AAPL"]));

    h.clock.advance_days(3);
    let new_today = today() + Duration::days(3);
    h.provider.extend_bars("AAPL", daily_bars(3, new_today));

    let report = h.coordinator.ensure_fresh(&symbols(&["AAPL"]));
    let last_call = h.provider.calls().pop().unwrap();
    assert_eq!(last_call.start, today() + Duration::days(1));
    assert_eq!(last_call.end, new_today);
    assert!(matches!(
        report.outcome("AAPL"),
        Some(SymbolOutcome::Updated { fetched: 3, .. })
    ));
    assert_eq!(h.store.load("AAPL").len(), 13);
    assert_eq!(h.coordinator.watermarks().get("AAPL"), Some(new_today));
}

#[test]
fn empty_window_leaves_watermark_unset() {
    let h = harness();

    let report = h.coordinator.ensure_fresh(&symbols(&["NEWCO"]));

    assert_eq!(report.outcome("NEWCO"), Some(&SymbolOutcome::NoNewData));
    assert_eq!(h.coordinator.watermarks().get("NEWCO"), None);
    assert!(h.store.load("NEWCO").is_empty());
}

#[test]
fn watermarks_survive_reopen() {
    let h = harness();
    h.provider.set_bars("MSFT", daily_bars(5, today() - Duration::days(2)));
    h.coordinator.ensure_fresh(&symbols(&["MSFT"]));

    let reopened = WatermarkStore::open(h.dir.path().join("watermarks.json")).unwrap();
    assert_eq!(reopened.get("MSFT"), Some(today() - Duration::days(2)));
}

// ── 2. Failure isolation ─────────────────────────────────────────────

#[test]
fn failing_symbol_does_not_block_siblings() {
    let h = harness();
    for sym in ["AAPL", "MSFT", "BAD"] {
        h.provider.set_bars(sym, daily_bars(20, today()));
    }
    h.provider
        .push_failure("BAD", FetchError::Unavailable("HTTP 500".into()));

    let report = h.coordinator.ensure_fresh(&symbols(&["AAPL", "BAD", "MSFT"]));

    assert_eq!(report.total(), 3);
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 1);
    assert!(matches!(
        report.outcome("BAD"),
        Some(SymbolOutcome::Failed {
            store_changed: false,
            ..
        })
    ));
    assert_eq!(h.coordinator.watermarks().get("BAD"), None);
    assert!(h.store.load("BAD").is_empty());
    assert_eq!(h.store.load("AAPL").len(), 20);
    assert_eq!(h.store.load("MSFT").len(), 20);
    assert_eq!(report.changed_symbols(), symbols(&["AAPL", "MSFT"]));
}

#[test]
fn unstorable_symbols_fail_without_upstream_calls() {
    let h = harness();
    h.provider.set_bars("AAPL", daily_bars(5, today()));

    let report = h
        .coordinator
        .ensure_fresh(&symbols(&["a/b", "", "../etc", "AAPL"]));

    assert_eq!(report.failed(), 3);
    for bad in ["a/b", "", "../etc"] {
        assert!(matches!(
            report.outcome(bad),
            Some(SymbolOutcome::Failed {
                store_changed: false,
                ..
            })
        ));
        assert_eq!(h.provider.call_count(bad), 0);
    }
    assert_eq!(h.provider.total_calls(), 1);
}

#[test]
fn unavailable_is_not_retried() {
    let h = harness();
    h.provider.set_bars("AAPL", daily_bars(5, today()));
    h.provider
        .push_failure("AAPL", FetchError::Unavailable("timeout".into()));

    h.coordinator.ensure_fresh(&symbols(&["AAPL"]));
    assert_eq!(h.provider.call_count("AAPL"), 1);
}

// ── 3. Bounded concurrency ───────────────────────────────────────────

#[test]
fn in_flight_fetches_never_exceed_pool_size() {
    let provider = MockProvider::new().with_latency(std::time::Duration::from_millis(25));
    let h = harness_with(provider, fast_settings(3));
    let names: Vec<String> = (0..12).map(|i| format!("SYM{i}")).collect();
    for sym in &names {
        h.provider.set_bars(sym, daily_bars(5, today()));
    }

    let report = h.coordinator.ensure_fresh(&names);

    assert!(report.all_succeeded());
    assert_eq!(h.provider.total_calls(), 12);
    let peak = h.provider.peak_in_flight();
    assert!(peak >= 1 && peak <= 3, "peak in flight was {peak}");
}

#[test]
fn overlapping_syncs_of_one_symbol_fetch_once() {
    let provider = MockProvider::new().with_latency(std::time::Duration::from_millis(50));
    let h = harness_with(provider, fast_settings(2));
    h.provider.set_bars("AAPL", daily_bars(10, today()));
    let barrier = Barrier::new(2);
    let (barrier, h) = (&barrier, &h);

    let reports: Vec<_> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..2)
            .map(|_| {
                scope.spawn(move || {
                    barrier.wait();
                    h.coordinator.ensure_fresh(&symbols(&["AAPL"]))
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    assert_eq!(h.provider.call_count("AAPL"), 1);
    let mut outcomes: Vec<_> = reports
        .iter()
        .map(|r| r.outcome("AAPL").cloned().unwrap())
        .collect();
    outcomes.sort_by_key(|o| matches!(o, SymbolOutcome::Fresh));
    assert!(matches!(outcomes[0], SymbolOutcome::Updated { fetched: 10, .. }));
    assert_eq!(outcomes[1], SymbolOutcome::Fresh);
    assert_eq!(h.coordinator.watermarks().get("AAPL"), Some(today()));
    assert_eq!(h.store.load("AAPL").len(), 10);
}

#[test]
fn symbol_locks_are_released_after_sync() {
    let h = harness();
    let names: Vec<String> = (0..20).map(|i| format!("SYM{i}")).collect();
    for sym in &names {
        h.provider.set_bars(sym, daily_bars(3, today()));
    }

    h.coordinator.ensure_fresh(&names);
    h.coordinator.ensure_fresh(&names);

    assert_eq!(h.coordinator.active_symbol_locks(), 0);
}

// ── 4. Rate limiting ─────────────────────────────────────────────────

#[test]
fn rate_limited_three_times_then_succeeds() {
    let h = harness();
    h.provider.set_bars("AAPL", daily_bars(15, today()));
    for _ in 0..3 {
        h.provider.push_failure(
            "AAPL",
            FetchError::RateLimited {
                retry_after_secs: None,
            },
        );
    }

    let report = h.coordinator.ensure_fresh(&symbols(&["AAPL"]));

    assert_eq!(h.provider.call_count("AAPL"), 4);
    assert!(matches!(
        report.outcome("AAPL"),
        Some(SymbolOutcome::Updated { fetched: 15, .. })
    ));
    assert_eq!(h.store.load("AAPL").len(), 15);
    assert_eq!(h.coordinator.watermarks().get("AAPL"), Some(today()));
}

#[test]
fn exhausted_retries_fail_symbol_without_touching_store() {
    let mut settings = fast_settings(2);
    settings.retry.max_retries = 2;
    let h = harness_with(MockProvider::new(), settings);
    h.provider.set_bars("AAPL", daily_bars(15, today()));
    for _ in 0..3 {
        h.provider.push_failure(
            "AAPL",
            FetchError::RateLimited {
                retry_after_secs: Some(1),
            },
        );
    }

    let report = h.coordinator.ensure_fresh(&symbols(&["AAPL"]));

    assert_eq!(h.provider.call_count("AAPL"), 3);
    match report.outcome("AAPL") {
        Some(SymbolOutcome::Failed { reason, .. }) => {
            assert!(reason.contains("3 attempts"), "unexpected reason: {reason}")
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(h.store.load("AAPL").is_empty());
    assert_eq!(h.coordinator.watermarks().get("AAPL"), None);
}

// ── 5. Cancellation and duplicates ───────────────────────────────────

#[test]
fn cancelled_coordinator_makes_no_calls() {
    let h = harness();
    h.provider.set_bars("AAPL", daily_bars(5, today()));
    h.coordinator.cancel_token().cancel();

    let report = h.coordinator.ensure_fresh(&symbols(&["AAPL", "MSFT"]));

    assert_eq!(h.provider.total_calls(), 0);
    assert_eq!(report.outcome("AAPL"), Some(&SymbolOutcome::Cancelled));
    assert_eq!(report.failed(), 2);
}

#[test]
fn duplicate_symbols_sync_once() {
    let h = harness();
    h.provider.set_bars("AAPL", daily_bars(5, today()));

    let report = h
        .coordinator
        .ensure_fresh(&symbols(&["AAPL", "AAPL", "AAPL"]));

    assert_eq!(report.total(), 1);
    assert_eq!(h.provider.call_count("AAPL"), 1);
}
