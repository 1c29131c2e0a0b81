use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::hint::black_box;

use vspace::core::SegmentFlags;
use vspace::entropy::shannon_entropy;
use vspace::storage::BufferAccessor;
use vspace::AddressSpace;

fn samples() -> Vec<(&'static str, Vec<u8>)> {
    let zeros = vec![0u8; 1 << 20];
    let text: Vec<u8> = b"The quick brown fox jumps over the lazy dog. "
        .iter()
        .copied()
        .cycle()
        .take(1 << 20)
        .collect();
    // xorshift keeps the noise reproducible
    let mut state = 0x9e37_79b9_7f4a_7c15u64;
    let noise: Vec<u8> = (0..1 << 20)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state as u8
        })
        .collect();
    vec![("zeros", zeros), ("text", text), ("noise", noise)]
}

fn bench_entropy(c: &mut Criterion) {
    let mut group = c.benchmark_group("entropy");
    for (name, data) in samples() {
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_function(name, |b| b.iter(|| shannon_entropy(black_box(&data))));
    }
    group.finish();
}

fn bench_block_entropy(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_entropy");
    for (name, data) in samples() {
        let len = data.len() as u64;
        let space = AddressSpace::builder()
            .storage(BufferAccessor::new(data))
            .build()
            .expect("space");
        space
            .add_auto_segment(0x400000, len, 0, len, SegmentFlags::READABLE)
            .expect("segment");
        group.throughput(Throughput::Bytes(len));
        group.bench_function(name, |b| {
            b.iter(|| space.get_entropy(0x400000, len, 4096))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_entropy, bench_block_entropy);
criterion_main!(benches);
