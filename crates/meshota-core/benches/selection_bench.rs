//! Benchmarks for manifest parsing, image selection and digest verification

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use meshota_core::manifest::{ChecksumAlgorithm, compute_digest, parse_manifest};
use meshota_core::prelude::*;
use std::hint::black_box;
use std::time::Duration;

fn manifest_with(entries: usize) -> Manifest {
    let entries = (0..entries)
        .map(|i| ManifestEntry {
            image_type: (i % 7) as u16,
            manufacturer_code: 4107 + (i % 3) as u16,
            model_id: (i % 5 == 0).then(|| format!("MODEL-{i}")),
            manufacturer_name: (i % 2 == 0).then(|| "Acme".to_string()),
            file_version: i as u32,
            file_size: 1024,
            url: format!("https://vendor.invalid/{i}.ota"),
            checksum: String::new(),
        })
        .collect();
    Manifest::new("https://vendor.invalid/index.json", entries, Duration::from_secs(60))
}

fn device() -> DeviceIdentity {
    DeviceIdentity {
        model_id: "MODEL-none".to_string(),
        manufacturer_code: 4109,
        manufacturer_name: "Acme Lighting".to_string(),
        image_type: 6,
        current_file_version: 0,
    }
}

fn bench_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("selection");
    let device = device();

    for size in [10usize, 100, 1000, 10000] {
        let manifest = manifest_with(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("select", size), &manifest, |b, m| {
            b.iter(|| select(black_box(m), black_box(&device)).map(|e| e.file_version));
        });
    }

    group.finish();
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_manifest");

    for size in [10usize, 1000] {
        let body = serde_json::to_vec(&manifest_with(size).entries).unwrap_or_default();
        group.throughput(Throughput::Bytes(body.len() as u64));
        group.bench_with_input(BenchmarkId::new("json", size), &body, |b, body| {
            b.iter(|| parse_manifest("bench", black_box(body)).map(|e| e.len()));
        });
    }

    group.finish();
}

fn bench_digest(c: &mut Criterion) {
    let mut group = c.benchmark_group("digest");

    for size in [1024usize, 256 * 1024] {
        let data: Vec<u8> = (0..size).map(|i| (i % 256) as u8).collect();
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("sha256", size), &data, |b, data| {
            b.iter(|| compute_digest(ChecksumAlgorithm::Sha256, black_box(data)));
        });
        group.bench_with_input(BenchmarkId::new("sha512", size), &data, |b, data| {
            b.iter(|| compute_digest(ChecksumAlgorithm::Sha512, black_box(data)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_selection, bench_parse, bench_digest);
criterion_main!(benches);
