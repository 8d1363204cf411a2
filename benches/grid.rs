use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nalgebra::Vector3;
use rustdock_screen::atom::{Atom, XsType};
use rustdock_screen::grid::{self, grid_map_slab, GridMaps};
use rustdock_screen::molecule::Receptor;
use rustdock_screen::pool::ThreadPool;
use rustdock_screen::scoring::ScoringFunction;
use rustdock_screen::space::SearchBox;
use std::sync::Arc;

/// A ring of carbons and oxygens around the box center.
fn bench_receptor() -> Receptor {
    let mut atoms = Vec::new();
    for i in 0..60u32 {
        let angle = i as f64 * 0.3;
        let xs = if i % 3 == 0 { XsType::OA } else { XsType::CH };
        atoms.push(Atom::new(
            i + 1,
            "C".into(),
            Vector3::new(
                5.0 * angle.cos(),
                5.0 * angle.sin(),
                (i as f64 - 30.0) * 0.2,
            ),
            xs,
        ));
    }
    Receptor::new(atoms)
}

fn bench_slab(c: &mut Criterion) {
    let sf = ScoringFunction::precalculate_serial();
    let space = SearchBox::new(Vector3::zeros(), Vector3::new(16.0, 16.0, 16.0), 0.25);
    let receptor = bench_receptor();
    let partitions = space.build_partitions(&receptor);

    c.bench_function("grid_map_slab", |b| {
        b.iter(|| {
            black_box(grid_map_slab(
                black_box(32),
                &[XsType::CH, XsType::NA],
                &sf,
                &space,
                &receptor,
                &partitions,
            ));
        })
    });
}

fn bench_populate(c: &mut Criterion) {
    let pool = ThreadPool::with_available_parallelism();
    let sf = Arc::new(ScoringFunction::precalculate_serial());
    let space = Arc::new(SearchBox::new(
        Vector3::zeros(),
        Vector3::new(16.0, 16.0, 16.0),
        0.25,
    ));
    let receptor = Arc::new(bench_receptor());
    let partitions = Arc::new(space.build_partitions(&receptor));

    c.bench_function("grid_populate_parallel", |b| {
        b.iter(|| {
            let mut maps = GridMaps::new();
            grid::populate(
                &mut maps,
                &[XsType::CH, XsType::NA],
                &pool,
                &sf,
                &space,
                &receptor,
                &partitions,
            )
            .unwrap();
            black_box(maps);
        })
    });
}

fn bench_build_partitions(c: &mut Criterion) {
    let space = SearchBox::new(Vector3::zeros(), Vector3::new(16.0, 16.0, 16.0), 0.25);
    let receptor = bench_receptor();
    c.bench_function("build_partitions", |b| {
        b.iter(|| {
            black_box(space.build_partitions(&receptor));
        })
    });
}

criterion_group!(grid_benches, bench_slab, bench_populate, bench_build_partitions);
criterion_main!(grid_benches);
