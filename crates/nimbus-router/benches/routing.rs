//! Routing benchmarks.
//!
//! Run with: `cargo bench -p nimbus-router`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use nimbus_router::{Router, SourcePattern, SourceRouter};

fn build_router(num_routes: usize) -> Router<usize> {
    let mut router = Router::new();
    let mut next = 0;
    for i in 0..num_routes / 3 {
        router.insert(&format!("/api/v1/resource{i}"), "GET", next).unwrap();
        next += 1;
        router.insert(&format!("/api/v1/resource{i}/{{id}}"), "GET", next).unwrap();
        next += 1;
        router
            .insert(&format!("/api/v1/org/{{org}}/resource{i}/{{id}}"), "GET", next)
            .unwrap();
        next += 1;
    }
    router
}

fn bench_static_match(c: &mut Criterion) {
    let router = build_router(99);
    c.bench_function("static_match", |b| {
        b.iter(|| black_box(router.lookup("GET", "/api/v1/resource20")));
    });
}

fn bench_param_match(c: &mut Criterion) {
    let router = build_router(99);
    c.bench_function("param_match", |b| {
        b.iter(|| black_box(router.lookup("GET", "/api/v1/resource25/12345")));
    });
}

fn bench_not_found(c: &mut Criterion) {
    let router = build_router(99);
    c.bench_function("not_found", |b| {
        b.iter(|| black_box(router.lookup("GET", "/api/v2/nothing/here")));
    });
}

fn bench_router_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("router_size");
    for size in [30, 300, 3000] {
        let router = build_router(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &router, |b, r| {
            b.iter(|| black_box(r.lookup("GET", "/api/v1/org/acme/resource5/77")));
        });
    }
    group.finish();
}

fn bench_source_patterns(c: &mut Criterion) {
    let mut router = SourceRouter::new();
    for i in 0..50 {
        router.insert(SourcePattern::exact(format!("queue-{i}")), i).unwrap();
    }
    router.insert(SourcePattern::glob("orders-*").unwrap(), 50).unwrap();
    c.bench_function("source_glob_after_exacts", |b| {
        b.iter(|| black_box(router.resolve("orders-eu-west")));
    });
}

criterion_group!(
    benches,
    bench_static_match,
    bench_param_match,
    bench_not_found,
    bench_router_size,
    bench_source_patterns
);
criterion_main!(benches);
