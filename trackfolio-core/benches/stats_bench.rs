//! Criterion benchmarks for the statistics hot path.
//!
//! Benchmarks:
//! 1. Log returns over a retained series
//! 2. Date-aligned pairwise covariance
//! 3. Covariance matrix through the in-memory cache (cold and warm)

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

use trackfolio_core::cache::{CovarianceCache, MemoryStore};
use trackfolio_core::data::BarStore;
use trackfolio_core::domain::{Bar, BarSeries};
use trackfolio_core::stats;

// ── Helpers ──────────────────────────────────────────────────────────

fn make_bars(n: usize, phase: f64) -> Vec<Bar> {
    let base_date = chrono::NaiveDate::from_ymd_opt(2022, 1, 3).unwrap();
    (0..n)
        .map(|i| {
            let close = 100.0 + (i as f64 * 0.1 + phase).sin() * 10.0;
            Bar {
                date: base_date + chrono::Duration::days(i as i64),
                open: close - 0.3,
                high: close + 1.5,
                low: close - 1.5,
                close,
                volume: 1_000_000 + (i as u64 % 500_000),
            }
        })
        .collect()
}

// ── 1. Log returns ───────────────────────────────────────────────────

fn bench_log_returns(c: &mut Criterion) {
    let mut group = c.benchmark_group("log_returns");
    for bar_count in [100, 500] {
        let series = BarSeries::from_bars("SPY", make_bars(bar_count, 0.0));
        group.bench_with_input(
            BenchmarkId::new("series", bar_count),
            &series,
            |b, series| b.iter(|| stats::log_returns(black_box(series).iter())),
        );
    }
    group.finish();
}

// ── 2. Pairwise covariance ───────────────────────────────────────────

fn bench_covariance(c: &mut Criterion) {
    let mut group = c.benchmark_group("covariance");
    let a = make_bars(500, 0.0);
    let b = make_bars(500, 1.7);

    group.bench_function("aligned_500", |bench| {
        bench.iter(|| stats::series_covariance(black_box(&a), black_box(&b)))
    });

    let ra = stats::log_returns(&a);
    let rb = stats::log_returns(&b);
    group.bench_function("raw_returns_499", |bench| {
        bench.iter(|| stats::covariance(black_box(&ra), black_box(&rb)))
    });
    group.finish();
}

// ── 3. Cached matrix ─────────────────────────────────────────────────

fn bench_matrix(c: &mut Criterion) {
    let mut group = c.benchmark_group("covariance_matrix");
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(BarStore::new(dir.path(), 500));
    let symbols: Vec<String> = (0..10).map(|i| format!("SYM{i}")).collect();
    for (i, sym) in symbols.iter().enumerate() {
        store.merge(sym, make_bars(500, i as f64)).unwrap();
    }

    group.bench_function("10_symbols_cold", |b| {
        b.iter(|| {
            let cache = CovarianceCache::new(Arc::new(MemoryStore::new()), store.clone());
            cache.matrix(black_box(&symbols)).unwrap()
        })
    });

    let warm = CovarianceCache::new(Arc::new(MemoryStore::new()), store.clone());
    warm.matrix(&symbols).unwrap();
    group.bench_function("10_symbols_warm", |b| {
        b.iter(|| warm.matrix(black_box(&symbols)).unwrap())
    });
    group.finish();
}

criterion_group!(benches, bench_log_returns, bench_covariance, bench_matrix);
criterion_main!(benches);
