//! Codec benchmarks for gatehouse-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use gatehouse_protocol::{codec, Envelope};

fn bench_encode(c: &mut Criterion) {
    let envelope = Envelope::join_pending("421337", "strawberry-48211");

    c.bench_function("encode_join_pending", |b| {
        b.iter(|| codec::encode(black_box(&envelope)))
    });
}

fn bench_decode(c: &mut Criterion) {
    let envelope = Envelope::approve("421337", "strawberry-48211");
    let encoded = codec::encode(&envelope).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("approve", |b| {
        b.iter(|| codec::decode(black_box(encoded.as_bytes())))
    });
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
