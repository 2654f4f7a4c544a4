#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::uninlined_format_args,
    clippy::semicolon_if_nothing_returned
)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kmerust::kmer::Kmer;
use kmerust::minimizer::scan_minimizers;
use kmerust::partition::Partitioner;
use kmerust::repartition::RepartitionTable;

fn random_seq(len: usize) -> Vec<u8> {
    const BASES: [u8; 4] = [b'A', b'C', b'G', b'T'];
    let mut x = 0x2545_f491_4f6c_dd1d_u64;
    (0..len)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            BASES[(x % 4) as usize]
        })
        .collect()
}

fn bench_from_ascii(c: &mut Criterion) {
    let mut group = c.benchmark_group("Kmer::from_ascii");

    for k in [8, 16, 31, 63] {
        let seq = random_seq(k);

        group.bench_with_input(BenchmarkId::from_parameter(k), &seq, |b, seq| {
            b.iter(|| Kmer::from_ascii(black_box(seq)))
        });
    }

    group.finish();
}

fn bench_canonical(c: &mut Criterion) {
    let mut group = c.benchmark_group("Kmer::canonical");

    for k in [8, 16, 31, 63] {
        let seq = random_seq(k);
        let kmer = Kmer::from_ascii(&seq).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(k), &kmer, |b, kmer| {
            b.iter(|| black_box(kmer.canonical()))
        });
    }

    group.finish();
}

fn bench_hash64(c: &mut Criterion) {
    let mut group = c.benchmark_group("Kmer::hash64");

    for k in [8, 16, 31, 63] {
        let seq = random_seq(k);
        let kmer = Kmer::from_ascii(&seq).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(k), &kmer, |b, kmer| {
            b.iter(|| black_box(kmer.hash64()))
        });
    }

    group.finish();
}

fn bench_scan_minimizers(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan_minimizers");

    for &len in &[200usize, 1_000, 10_000] {
        let seq = random_seq(len);

        group.bench_with_input(BenchmarkId::from_parameter(len), &seq, |b, seq| {
            b.iter(|| scan_minimizers(black_box(seq), 31, 10))
        });
    }

    group.finish();
}

fn bench_partitioner_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("Partitioner::process_sequence");

    for &len in &[200usize, 1_000, 10_000] {
        let seq = random_seq(len);
        let table = RepartitionTable::uniform(10, 16);

        group.bench_with_input(BenchmarkId::from_parameter(len), &seq, |b, seq| {
            b.iter(|| {
                let partitioner = Partitioner::new(31, 10, table.clone());
                partitioner.process_sequence(black_box(seq));
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_from_ascii,
    bench_canonical,
    bench_hash64,
    bench_scan_minimizers,
    bench_partitioner_throughput,
);

criterion_main!(benches);
