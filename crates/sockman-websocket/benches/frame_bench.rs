//! Criterion benchmarks for the frame codec hot path.
//!
//! Measures encoding, masking and decoding across the three length classes
//! (7-bit, 16-bit and 64-bit extended lengths).
//!
//! Run with:
//! ```bash
//! cargo bench --package sockman-websocket --bench frame_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sockman_websocket::codec::{apply_mask, decode_frame, encode_frame, MaskingRole, Opcode, DEFAULT_MAX_PAYLOAD};

const KEY: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

/// One payload size per length class.
const SIZES: [usize; 3] = [64, 4 * 1024, 128 * 1024];

// ── Benchmarks: encode ────────────────────────────────────────────────────────

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_frame");
    for size in SIZES {
        let payload = vec![b'x'; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("server_unmasked", size), &payload, |b, p| {
            b.iter(|| encode_frame(Opcode::Text, black_box(p), None))
        });
        group.bench_with_input(BenchmarkId::new("client_masked", size), &payload, |b, p| {
            b.iter(|| encode_frame(Opcode::Text, black_box(p), Some(KEY)))
        });
    }
    group.finish();
}

// ── Benchmarks: mask ──────────────────────────────────────────────────────────

fn bench_apply_mask(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_mask");
    for size in SIZES {
        let mut payload = vec![b'x'; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(BenchmarkId::from_parameter(size), |b| {
            b.iter(|| apply_mask(black_box(&mut payload), KEY))
        });
    }
    group.finish();
}

// ── Benchmarks: decode ────────────────────────────────────────────────────────

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_frame");
    for size in SIZES {
        let wire = encode_frame(Opcode::Binary, &vec![b'x'; size], Some(KEY));
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("as_server", size), &wire, |b, w| {
            b.iter(|| decode_frame(black_box(w), MaskingRole::Server, DEFAULT_MAX_PAYLOAD))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_apply_mask, bench_decode);
criterion_main!(benches);
