//! Benchmarks for payload hashing and canonical string construction.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use reqwest::header::HeaderMap;
use reqwest::Method;
use tokio::runtime::Runtime;

use restupload::upload::signer::canonical_string;
use restupload::upload::CloudTarget;
use restupload::utils::hash::{sha256_hex, sha256_reader};

/// Benchmark SHA256 of in-memory parts of different sizes
fn bench_sha256_part_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("sha256_part_sizes");

    let sizes = vec![
        (1024, "1KB"),
        (64 * 1024, "64KB"),
        (1024 * 1024, "1MB"),
        (8 * 1024 * 1024, "8MB"),
    ];

    for (size, name) in sizes {
        let data = vec![7u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("sha256_hex", name), &data, |b, data| {
            b.iter(|| sha256_hex(black_box(data)));
        });
    }

    group.finish();
}

/// Benchmark hashing through the async reader path used for spools
fn bench_sha256_reader(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let data = vec![3u8; 4 * 1024 * 1024];

    let mut group = c.benchmark_group("sha256_reader");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("4MB", |b| {
        b.to_async(&runtime).iter(|| async {
            let mut reader = black_box(&data[..]);
            sha256_reader(&mut reader).await.unwrap()
        });
    });
    group.finish();
}

fn bench_canonical_string(c: &mut Criterion) {
    let target = CloudTarget {
        upload_ref: "upl-1".to_string(),
        key: "incoming/2024/03/recording.mp4".to_string(),
        region: "eu-west-1".to_string(),
        bucket: "media".to_string(),
        host: "media.s3.eu-west-1.amazonaws.com".to_string(),
    };
    let hash = sha256_hex(b"part body");

    let mut headers = HeaderMap::new();
    headers.insert("x-amz-content-sha256", hash.parse().unwrap());
    headers.insert("x-amz-date", "20240305T101112Z".parse().unwrap());
    headers.insert("x-amz-acl", "private".parse().unwrap());
    headers.insert("content-type", "video/mp4".parse().unwrap());

    c.bench_function("canonical_string", |b| {
        b.iter(|| {
            canonical_string(
                black_box(&target),
                &Method::PUT,
                "partNumber=12&uploadId=mpu-77",
                black_box(&headers),
                &hash,
                "20240305T101112Z",
            )
        });
    });
}

criterion_group!(benches, bench_sha256_part_sizes, bench_sha256_reader, bench_canonical_string);
criterion_main!(benches);
