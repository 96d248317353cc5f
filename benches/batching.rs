//! Benchmarks for list parsing and batch planning.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use std::path::Path;

use regionwall::batcher::{plan_batches, BatchPolicy};
use regionwall::iplist::parse_list;
use regionwall::region::Region;

/// Generate a list mixing hosts, networks, ranges and comments
fn generate_list(count: usize) -> String {
    let mut out = String::with_capacity(count * 20);
    out.push_str("# generated\n");
    for i in 0..count {
        let a = ((i / 65536) % 224 + 1) as u8;
        let b = ((i / 256) % 256) as u8;
        let c = (i % 256) as u8;
        match i % 10 {
            0 => out.push_str(&format!("{}.{}.{}.0/24\n", a, b, c)),
            1 => out.push_str(&format!("{}.{}.{}.1-{}.{}.{}.9\n", a, b, c, a, b, c)),
            2 => out.push_str(&format!("2001:db8:{:x}::/48\n", i)),
            _ => out.push_str(&format!("{}.{}.{}.{}\n", a, b, c, i % 250 + 1)),
        }
    }
    out
}

fn bench_parse_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_list");

    for size in [100, 1000, 10000, 50000] {
        let content = generate_list(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &content, |b, content| {
            b.iter(|| parse_list(Path::new("EU.txt"), black_box(content)))
        });
    }

    group.finish();
}

fn bench_plan_batches(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_batches");

    for size in [100, 1000, 10000, 50000] {
        let list = parse_list(Path::new("EU.txt"), &generate_list(size));
        group.bench_with_input(
            BenchmarkId::new("adaptive", size),
            &list.entries,
            |b, entries| {
                b.iter(|| {
                    plan_batches(
                        black_box(entries),
                        Region::Europe,
                        "OW-VPN-",
                        BatchPolicy::default(),
                    )
                })
            },
        );
        group.bench_with_input(
            BenchmarkId::new("fixed_10", size),
            &list.entries,
            |b, entries| {
                b.iter(|| {
                    plan_batches(
                        black_box(entries),
                        Region::Europe,
                        "OW-VPN-",
                        BatchPolicy::Fixed(10),
                    )
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_parse_list, bench_plan_batches);
criterion_main!(benches);
