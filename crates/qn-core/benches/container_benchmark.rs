use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use qn_core::{Axis, BinnedContainer, QVector, Statistic};
use std::hint::black_box;

fn make_container(n: usize) -> BinnedContainer<Statistic> {
    let axes = vec![
        Axis::uniform("centrality", n, 0.0, 100.0).unwrap(),
        Axis::uniform("pt", n, 0.0, 5.0).unwrap(),
        Axis::discrete("component", 4).unwrap(),
    ];
    BinnedContainer::from_fn(axes, |i| {
        let mut s = Statistic::default();
        s.fill(i as f64);
        s
    })
    .unwrap()
}

fn bench_find_bin(c: &mut Criterion) {
    let mut group = c.benchmark_group("container_find_bin");

    for n in [10usize, 100, 1000] {
        let cont = make_container(n);
        group.bench_with_input(BenchmarkId::new("find_bin", n), &n, |b, _| {
            b.iter(|| {
                let mut acc = 0usize;
                for k in 0..256 {
                    let x = (k as f64) * 0.39;
                    if let Some(i) = cont.find_bin(black_box(&[x, x * 0.019, 1.0])) {
                        acc += i;
                    }
                }
                black_box(acc)
            })
        });
    }

    group.finish();
}

fn bench_project(c: &mut Criterion) {
    let mut group = c.benchmark_group("container_project");

    for n in [10usize, 50, 100] {
        let cont = make_container(n);
        group.bench_with_input(BenchmarkId::new("project_centrality", n), &n, |b, _| {
            b.iter(|| {
                let p = cont
                    .project(&["centrality"], Statistic::default(), |a, b| {
                        let mut s = *a;
                        s.merge(b);
                        s
                    })
                    .unwrap();
                black_box(p.len())
            })
        });
    }

    group.finish();
}

fn bench_qvector(c: &mut Criterion) {
    c.bench_function("qvector_add_particle_1000", |b| {
        b.iter(|| {
            let mut q = QVector::new(&[1, 2, 3, 4]).unwrap();
            for k in 0..1000 {
                q.add_particle(black_box(k as f64 * 0.0063), 1.0);
            }
            black_box(q.x(2))
        })
    });
}

criterion_group!(benches, bench_find_bin, bench_project, bench_qvector);
criterion_main!(benches);
