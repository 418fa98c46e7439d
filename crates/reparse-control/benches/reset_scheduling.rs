//! Benchmarks for the notification hot path.
//!
//! Editors call `region_changed` on every keystroke, so the cost that
//! matters is arming and replacing the reset timer, not the reset itself.
//!
//! Performance targets:
//! - Single notification: < 5μs
//! - Listener lookup: < 1μs

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use reparse_control::{FileEvent, ListenerRegistry, ParsingState};
use reparse_core::{ParsingConfig, SourceId};
use std::hint::black_box;
use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

/// Benchmark repeated edits replacing the pending reset.
fn bench_region_changed(c: &mut Criterion) {
    let rt = runtime();
    let _guard = rt.enter();
    let state = ParsingState::new(ParsingConfig::default()).unwrap();
    let (source, _document) = state.open_document(Path::new("/bench/Main.java"), "class Main {}");
    let control = source.control();

    let mut group = c.benchmark_group("notifications");

    group.bench_function("region_changed", |b| {
        let mut offset = 0_i64;
        b.iter(|| {
            offset = (offset + 1) % 1000;
            control.region_changed(black_box(offset), black_box(offset + 1));
        });
    });

    group.bench_function("state_changed", |b| {
        b.iter(|| control.state_changed());
    });

    group.bench_function("unknown_region", |b| {
        b.iter(|| control.region_changed(black_box(-1), black_box(-1)));
    });

    group.finish();
}

/// Benchmark file event fan-out to listening sources.
fn bench_file_events(c: &mut Criterion) {
    let rt = runtime();
    let _guard = rt.enter();
    let state = ParsingState::new(ParsingConfig::default()).unwrap();

    let mut group = c.benchmark_group("file_events");

    for count in [10_usize, 100, 1000] {
        let paths: Vec<PathBuf> = (0..count)
            .map(|i| PathBuf::from(format!("/bench/F{i}.java")))
            .collect();
        for path in &paths {
            state.open_document(path, "class F {}");
        }
        let target = FileEvent::changed(&paths[count / 2]);

        group.bench_with_input(BenchmarkId::new("changed", count), &target, |b, event| {
            b.iter(|| state.file_event(black_box(event)));
        });
    }

    group.finish();
}

/// Benchmark listener table lookups.
fn bench_listener_lookup(c: &mut Criterion) {
    let registry = ListenerRegistry::new();
    for i in 0..1000_u64 {
        let path = PathBuf::from(format!("/bench/F{}.java", i % 100));
        registry.add_file_listener(&path, SourceId::new(i));
        registry.add_parser_listener("text/x-java", SourceId::new(i));
    }

    let mut group = c.benchmark_group("listener_lookup");

    group.bench_function("file_hit", |b| {
        b.iter(|| registry.file_listeners(black_box(Path::new("/bench/F42.java"))));
    });

    group.bench_function("file_miss", |b| {
        b.iter(|| registry.file_listeners(black_box(Path::new("/bench/missing.java"))));
    });

    group.bench_function("parser_1000", |b| {
        b.iter(|| registry.parser_listeners(black_box("text/x-java")));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_region_changed,
    bench_file_events,
    bench_listener_lookup
);
criterion_main!(benches);
