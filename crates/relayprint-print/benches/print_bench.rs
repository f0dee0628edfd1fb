// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for lpstat parsing and job cache operations in the
// relayprint-print crate.

use chrono::{Duration, Utc};
use criterion::{Criterion, black_box, criterion_group, criterion_main};

use relayprint_core::{JobState, PrintJobRecord};
use relayprint_print::discovery::parse_lpstat_devices;
use relayprint_print::store::JobStore;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// `lpstat -v` output for `count` queues, alternating network and USB.
fn lpstat_output(count: usize) -> String {
    (0..count)
        .map(|i| {
            if i % 2 == 0 {
                format!("device for Queue_{i}: ipp://10.0.{}.{}/ipp/print\n", i / 256, i % 256)
            } else {
                format!("device for Queue_{i}: usb://Vendor/Model{i}?serial={i:08}\n")
            }
        })
        .collect()
}

/// An in-memory cache holding `count` jobs, a third of them long completed.
fn seeded_store(count: i32) -> JobStore {
    let store = JobStore::open_in_memory().expect("in-memory store");
    for id in 1..=count {
        let mut record = PrintJobRecord::new(id, "Office_Laser");
        if id % 3 == 0 {
            record.status = JobState::Completed;
            record.completed_at = Some(Utc::now() - Duration::hours(48));
        }
        store.insert(&record).expect("insert");
    }
    store
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

/// Benchmark parsing `lpstat -v` for a large print server.
fn bench_parse_lpstat(c: &mut Criterion) {
    let output = lpstat_output(200);

    c.bench_function("parse_lpstat_devices (200 queues)", |b| {
        b.iter(|| {
            let devices = parse_lpstat_devices(black_box(&output));
            assert_eq!(devices.len(), 200);
        });
    });
}

/// Benchmark the cache paths hit by every status request.
fn bench_job_store(c: &mut Criterion) {
    let store = seeded_store(1_000);

    c.bench_function("job_store get (1000 rows)", |b| {
        b.iter(|| {
            let record = store.get(black_box(500)).expect("get");
            assert!(record.is_some());
        });
    });

    c.bench_function("job_store all (1000 rows)", |b| {
        b.iter(|| black_box(store.all().expect("all")));
    });

    c.bench_function("job_store clean (1000 rows)", |b| {
        b.iter_with_setup(
            || seeded_store(1_000),
            |store| {
                let removed = store
                    .delete_completed_before(Utc::now() - Duration::hours(24))
                    .expect("delete");
                assert_eq!(removed, 333);
            },
        );
    });
}

criterion_group!(benches, bench_parse_lpstat, bench_job_store);
criterion_main!(benches);
