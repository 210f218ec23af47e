use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;
use voro2d::MonoContainer;

/// Generate a uniformly random 2D point cloud of size `n` in the unit
/// square, with a fixed seed for reproducibility.
fn generate_points_random(n: usize, seed: Option<u64>) -> Vec<[f64; 2]> {
    let mut rng = StdRng::seed_from_u64(seed.unwrap_or(3079380797442975911));
    (0..n).map(|_| [rng.gen::<f64>(), rng.gen::<f64>()]).collect()
}

fn blocks_for(n: usize) -> usize {
    // aim for a handful of particles per block
    (((n as f64) / 4.0).sqrt().ceil() as usize).max(1)
}

pub fn bench_insertion(c: &mut Criterion) {
    let mut group = c.benchmark_group("insertion");

    for size in [1_000usize, 10_000, 100_000] {
        let points = generate_points_random(size, None);
        let nb = blocks_for(size);

        group.bench_with_input(BenchmarkId::new("serial", size), &size, |b, _| {
            b.iter(|| {
                let mut con =
                    MonoContainer::new([0.0, 1.0, 0.0, 1.0], (nb, nb), (false, false), 8, 1);
                for (i, p) in points.iter().enumerate() {
                    con.put(i as i32, *p);
                }
                black_box(con.total_particles())
            })
        });

        group.bench_with_input(BenchmarkId::new("parallel", size), &size, |b, _| {
            b.iter(|| {
                let mut con =
                    MonoContainer::new([0.0, 1.0, 0.0, 1.0], (nb, nb), (false, false), 8, 4);
                con.put_parallel(&points);
                con.put_reconcile_overflow();
                black_box(con.total_particles())
            })
        });
    }
    group.finish();
}

pub fn bench_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_voronoi_cell");

    for size in [1_000usize, 10_000] {
        let points = generate_points_random(size, None);
        let nb = blocks_for(size);
        let mut con = MonoContainer::new([0.0, 1.0, 0.0, 1.0], (nb, nb), (true, true), 8, 1);
        con.put_parallel(&points);
        con.put_reconcile_overflow();
        let queries = generate_points_random(256, Some(17));

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                for q in &queries {
                    black_box(con.find_voronoi_cell(q[0], q[1]));
                }
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_insertion, bench_queries);
criterion_main!(benches);
