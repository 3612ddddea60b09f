//! Benchmarks for descriptor parsing and serial decoding
//!
//! Both run once per attach, but the parser is exercised on every re-open and
//! the decoder on every identify, so they are worth keeping cheap:
//! - Configuration descriptor walk (single interface, multi-function)
//! - Serial string transcoding (ASCII, BMP)

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use protocol::{decode_string_descriptor, find_bulk_out};

fn config(body: &[u8]) -> Vec<u8> {
    let total = (9 + body.len()) as u16;
    let [lo, hi] = total.to_le_bytes();
    let mut out = vec![9, 0x02, lo, hi, 1, 1, 0, 0x80, 250];
    out.extend_from_slice(body);
    out
}

fn multi_function(functions: u8) -> Vec<u8> {
    let mut body = Vec::new();
    for number in 0..functions {
        body.extend_from_slice(&[8, 0x0B, number, 1, 0x02, 0, 0, 0]);
        body.extend_from_slice(&[9, 0x04, number, 0, 1, 0x02, 0, 0, 0]);
        body.extend_from_slice(&[7, 0x05, 0x80 | (number + 1), 0x03, 16, 0, 4]);
    }
    body.extend_from_slice(&[9, 0x04, functions, 0, 1, 0xFF, 0, 0, 0]);
    body.extend_from_slice(&[7, 0x05, 0x01, 0x02, 0x00, 0x02, 0]);
    config(&body)
}

fn benchmark_descriptor_walk(c: &mut Criterion) {
    let mut group = c.benchmark_group("descriptor_walk");

    for functions in [0u8, 4, 8] {
        let raw = multi_function(functions);
        group.throughput(Throughput::Bytes(raw.len() as u64));
        group.bench_with_input(BenchmarkId::new("find_bulk_out", functions), &raw, |b, raw| {
            b.iter(|| find_bulk_out(black_box(raw)))
        });
    }

    group.finish();
}

fn string_descriptor(text: &str) -> Vec<u8> {
    let units: Vec<u16> = text.encode_utf16().collect();
    let mut desc = vec![(2 + units.len() * 2) as u8, 0x03];
    desc.extend(units.iter().flat_map(|u| u.to_le_bytes()));
    desc
}

fn benchmark_serial_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("serial_decode");

    let ascii = string_descriptor("1234567890ABCDEF1234567890ABCDEF");
    group.bench_function("ascii", |b| {
        b.iter(|| decode_string_descriptor(black_box(&ascii)))
    });

    let bmp = string_descriptor("Série-Ω-€-ÄÖÜ-漢字-0123456789");
    group.bench_function("bmp", |b| {
        b.iter(|| decode_string_descriptor(black_box(&bmp)))
    });

    group.finish();
}

criterion_group!(benches, benchmark_descriptor_walk, benchmark_serial_decode);
criterion_main!(benches);
