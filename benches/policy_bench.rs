//! Benchmarks for domain classification.
//!
//! Policy lookup is a linear wildcard scan, so the interesting numbers are
//! the cost of a full miss over a large list and how much the
//! classification cache saves on hot names.

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, black_box};

use edgeguard::cache::ClassificationCache;
use edgeguard::filter::{Classifier, DomainClassification, PolicyList, PolicySource, wildcard};

const LIST_SIZES: [usize; 3] = [100, 1_000, 10_000];

fn build_policy(size: usize) -> PolicyList {
    let mut policy = PolicyList::new();
    for i in 0..size {
        policy.push(&format!("*.tracker{i}.example"), DomainClassification::Ads);
    }
    policy.push("*.proxied.example", DomainClassification::ProxyAllowed);
    policy
}

fn bench_wildcard(c: &mut Criterion) {
    let mut group = c.benchmark_group("wildcard");
    group.throughput(Throughput::Elements(1));

    group.bench_function(BenchmarkId::new("is_match", "hit"), |b| {
        b.iter(|| wildcard::is_match(black_box("*.doubleclick.*"), black_box("ad.doubleclick.net")))
    });
    group.bench_function(BenchmarkId::new("is_match", "miss"), |b| {
        b.iter(|| wildcard::is_match(black_box("*.doubleclick.*"), black_box("www.example.org")))
    });
    group.bench_function(BenchmarkId::new("is_match", "backtracking"), |b| {
        b.iter(|| wildcard::is_match(black_box("*a*a*a*b"), black_box("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa")))
    });

    group.finish();
}

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");
    group.throughput(Throughput::Elements(1));

    for size in LIST_SIZES {
        let policy = build_policy(size);

        group.bench_function(BenchmarkId::new("policy_miss", size), |b| {
            b.iter(|| policy.classify(black_box("www.github.com")))
        });
        group.bench_function(BenchmarkId::new("policy_last_entry", size), |b| {
            b.iter(|| policy.classify(black_box("cdn.proxied.example")))
        });

        let classifier = Classifier::new(Arc::new(policy), Arc::new(ClassificationCache::new()));
        classifier.classify("www.github.com");
        group.bench_function(BenchmarkId::new("cached", size), |b| {
            b.iter(|| classifier.classify(black_box("www.github.com")))
        });
    }

    group.finish();
}

fn main() {
    let mut criterion = Criterion::default().configure_from_args();
    bench_wildcard(&mut criterion);
    bench_classify(&mut criterion);
    criterion.final_summary();
}
