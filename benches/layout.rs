// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Benchmarks for the layout manager.

use std::collections::HashMap;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use cctm::config::ResolvedLayoutConfig;
use cctm::layout::{Layout, LayoutManager};
use cctm::session::SessionId;

fn manager_with(sessions: usize) -> (LayoutManager, Vec<SessionId>) {
    let mut manager = LayoutManager::new(Layout::from(&ResolvedLayoutConfig::default()))
        .expect("default layout is valid");
    let ids: Vec<SessionId> = (0..sessions).map(|i| SessionId::from(format!("s-{i}"))).collect();
    for id in &ids {
        manager.add(id.clone());
    }
    (manager, ids)
}

/// Benchmark churn: add, elevate, de-elevate and remove.
fn bench_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("layout/churn");

    for sessions in [9, 50, 200] {
        group.bench_with_input(BenchmarkId::new("add_remove", sessions), &sessions, |b, &n| {
            b.iter(|| {
                let (mut manager, ids) = manager_with(n);
                for id in ids.iter().step_by(2) {
                    manager.remove(black_box(id));
                }
                manager
            });
        });

        let (mut manager, ids) = manager_with(sessions);
        group.bench_with_input(BenchmarkId::new("elevate", sessions), &ids, |b, ids| {
            b.iter(|| {
                for id in ids.iter().take(10) {
                    let _ = manager.elevate(black_box(id));
                }
                manager.de_elevate()
            });
        });
    }

    group.finish();
}

/// Benchmark placement queries and text rendering.
fn bench_views(c: &mut Criterion) {
    let mut group = c.benchmark_group("layout/views");
    let (manager, ids) = manager_with(50);
    let labels: HashMap<SessionId, String> =
        ids.iter().map(|id| (id.clone(), format!("{id} (rust)"))).collect();

    group.bench_function("views/50", |b| b.iter(|| black_box(&manager).views()));
    group.bench_function("grid_placements/50", |b| {
        b.iter(|| black_box(&manager).grid_placements())
    });
    group.bench_function("render/50", |b| b.iter(|| manager.render(black_box(&labels))));

    group.finish();
}

criterion_group!(benches, bench_churn, bench_views);
criterion_main!(benches);
