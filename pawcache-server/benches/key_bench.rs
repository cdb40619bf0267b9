//! Key Derivation and Invalidation Benchmarks
//!
//! Measures the per-request overhead the cache adds: key derivation,
//! pattern resolution, glob matching and trie-backed pattern deletion.

use axum::http::Method;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use pawcache_server::core::MemoryStoreConfig;
use pawcache_server::policy::normalize_query;
use pawcache_server::{CacheStore, GlobPattern, MemoryStore, PolicyTable, RequestContext};
use std::hint::black_box;

fn request(user: &str, pet_id: &str) -> RequestContext {
    RequestContext {
        method: Method::GET,
        path: format!("/pets/{}", pet_id),
        query: normalize_query("page=2&limit=20&sort=desc"),
        params: [("petId".to_string(), pet_id.to_string())].into(),
        user_id: Some(user.to_string()),
        client_ip: None,
    }
}

fn bench_key_derivation(c: &mut Criterion) {
    let table = PolicyTable::default();
    let ctx = request("7", "42");

    let mut group = c.benchmark_group("key_derivation");
    for route in ["pet_detail", "pet_analyses", "community_feed"] {
        let policy = table.read(route).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(route), policy, |b, policy| {
            b.iter(|| black_box(policy.key_for(black_box(&ctx))));
        });
    }
    group.finish();

    c.bench_function("normalize_query", |b| {
        b.iter(|| black_box(normalize_query(black_box("z=1&page=2&limit=20&a=b&sort=desc"))))
    });
}

fn bench_pattern_resolution(c: &mut Criterion) {
    let table = PolicyTable::default();
    let rule = table.write("delete_pet").unwrap();
    let ctx = request("7", "42");

    c.bench_function("resolve_delete_pet", |b| {
        b.iter(|| black_box(rule.resolve(black_box(&ctx))))
    });
}

fn bench_glob_matching(c: &mut Criterion) {
    let pattern = GlobPattern::compile("user:*:pet:42:*").unwrap();
    let keys = [
        "user:7:pet:42:analyses?page=2",
        "user:7:pet:420:analyses",
        "user:~ip-10.0.0.1:pet:42:stats",
        "community:posts?page=1",
    ];

    c.bench_function("glob_match", |b| {
        b.iter(|| {
            for key in &keys {
                black_box(pattern.matches(black_box(key)));
            }
        })
    });
}

fn bench_delete_matching(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("memory_populate_then_delete_matching");

    for users in [100usize, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(users), &users, |b, &users| {
            b.to_async(&runtime).iter(|| async move {
                let store = MemoryStore::new(MemoryStoreConfig::default());
                for user in 0..users {
                    for pet in 0..10 {
                        store
                            .set(&format!("user:{}:pet:{}", user, pet), b"{}".to_vec(), 60)
                            .await
                            .unwrap();
                    }
                }
                black_box(store.delete_matching("user:42:*").await.unwrap());
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_key_derivation,
    bench_pattern_resolution,
    bench_glob_matching,
    bench_delete_matching
);
criterion_main!(benches);
