use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use volsync::progress::NoProgress;
use volsync::transport::rsync_output::parse_line;
use volsync::transport::RsyncOutputParser;
use volsync::{filter_and_sort, format_bytes, Commit, TagFilter};

fn bench_format_bytes(c: &mut Criterion) {
    let mut group = c.benchmark_group("format_bytes");
    for (name, value) in [
        ("bytes", 512.0),
        ("exact", 1024.0 * 1024.0),
        ("fraction", 73.23 * 1024.0 * 1024.0 * 1024.0),
        ("carry", 9.9999 * 1024.0),
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(name), &value, |b, v| {
            b.iter(|| format_bytes(black_box(*v)))
        });
    }
    group.finish();
}

fn bench_parse_lines(c: &mut Criterion) {
    let progress = "     14,221,312  50%   14.88MB/s    0:00:00 (xfr#1, to-chk=1/3)";
    let summary = "sent 11,157,504 bytes  received 4,229 bytes  4,464,693.20 bytes/sec";
    let noise = "pg_wal/000000010000000000000001";

    let mut group = c.benchmark_group("rsync_parse_line");
    for (name, line) in [("progress", progress), ("summary", summary), ("ignored", noise)] {
        group.bench_with_input(BenchmarkId::from_parameter(name), &line, |b, line| {
            b.iter(|| parse_line(black_box(line)))
        });
    }
    group.finish();

    c.bench_function("rsync_session_1000_records", |b| {
        let records: Vec<String> = (0..1000)
            .map(|i| format!("{:>15} {:>3}%   12.50MB/s    0:00:01", i * 4096, i / 10))
            .collect();
        b.iter(|| {
            let mut parser = RsyncOutputParser::new(&NoProgress);
            for record in &records {
                parser.process_line(record);
            }
            parser.process_line(summary);
            black_box(parser.stats())
        })
    });
}

fn bench_filter_and_sort(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter_and_sort");
    for count in [100usize, 1000, 10000] {
        let commits: Vec<Commit> = (0..count)
            .map(|i| {
                let props = json!({
                    "timestamp": format!("2019-09-{:02}T13:45:{:02}Z", 1 + i % 28, i % 60),
                    "tags": {"env": if i % 3 == 0 { "prod" } else { "dev" }},
                });
                Commit::new(format!("c{}", i), props.as_object().cloned().unwrap_or_default())
            })
            .collect();
        let tags = [TagFilter::equals("env", "prod")];

        group.bench_with_input(BenchmarkId::from_parameter(count), &commits, |b, commits| {
            b.iter(|| filter_and_sort(black_box(commits.clone()), &tags))
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_format_bytes,
    bench_parse_lines,
    bench_filter_and_sort
);
criterion_main!(benches);
