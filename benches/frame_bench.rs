//! Benchmarks for sockudo-tcpws framing
//!
//! Run with: cargo bench

use std::hint::black_box;

use bytes::BytesMut;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use sockudo_tcpws::mask::apply_mask;
use sockudo_tcpws::{
    Config, FrameHeader, FrameReaderFactory, OpCode, TcpConnection, TcpFrameReaderFactory,
};

/// Benchmark mask application
fn bench_mask(c: &mut Criterion) {
    let mut group = c.benchmark_group("mask");

    for size in [64, 256, 1024, 4096, 16384, 65536] {
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("apply_mask", size), &size, |b, &size| {
            let mut data = vec![0x42u8; size];
            let mask = [0x37, 0xfa, 0x21, 0x3d];

            b.iter(|| {
                apply_mask(black_box(&mut data), black_box(mask));
            });
        });
    }

    group.finish();
}

/// Benchmark header encoding
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    for size in [8u64, 200, 70000] {
        group.bench_with_input(BenchmarkId::new("header", size), &size, |b, &size| {
            let header = FrameHeader::new(OpCode::Binary, size, Some([1, 2, 3, 4]));
            let mut buf = BytesMut::with_capacity(64);

            b.iter(|| {
                buf.clear();
                black_box(&header).encode(&mut buf);
            });
        });
    }

    group.finish();
}

/// Benchmark decoding a frame from memory
fn bench_decode(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let mut group = c.benchmark_group("decode");

    for size in [8usize, 256, 4096, 65536] {
        let mask = [0x37, 0xfa, 0x21, 0x3d];
        let mut wire = BytesMut::new();
        FrameHeader::new(OpCode::Binary, size as u64, Some(mask)).encode(&mut wire);
        let mut payload: Vec<u8> = (0..size).map(|i| (i % 256) as u8).collect();
        apply_mask(&mut payload, mask);
        wire.extend_from_slice(&payload);
        let wire = wire.freeze();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("masked", size), &wire, |b, wire| {
            b.iter(|| {
                rt.block_on(async {
                    let mut readers = TcpFrameReaderFactory::new(&wire[..], 64 * 1024);
                    let mut frame = readers.new_frame_reader().await.unwrap();
                    black_box(readers.read_to_end(&mut frame).await.unwrap());
                })
            });
        });
    }

    group.finish();
}

/// Benchmark a write and read_frame round trip over an in-memory pipe
fn bench_round_trip(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let mut group = c.benchmark_group("round_trip");

    for size in [64usize, 4096, 65536] {
        let (a, b) = tokio::io::duplex(1024 * 1024);
        let client = TcpConnection::new(a, Config::default());
        let server = TcpConnection::new(b, Config::default());
        let payload = vec![0x42u8; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("frame", size), &payload, |b, payload| {
            b.iter(|| {
                rt.block_on(async {
                    client.write(payload).await.unwrap();
                    black_box(server.read_frame().await.unwrap());
                })
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_mask,
    bench_encode,
    bench_decode,
    bench_round_trip
);
criterion_main!(benches);
