use std::hint::black_box;
use std::time::UNIX_EPOCH;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use vigil::system::process::{ProcessRecord, ProcessSnapshot, command_line_from_args_blob};

fn make_blob(argc: usize) -> Vec<u8> {
    let mut out = (argc as i32).to_ne_bytes().to_vec();
    out.extend_from_slice(b"/Applications/Example.app/Contents/MacOS/Example\0\0\0\0");
    for i in 0..argc {
        out.extend_from_slice(format!("--flag-{i}=value-{i}").as_bytes());
        out.push(0);
    }
    for i in 0..argc {
        out.extend_from_slice(format!("ENV_{i}=/usr/local/share/{i}").as_bytes());
        out.push(0);
    }
    out
}

fn make_records(n: usize) -> Vec<ProcessRecord> {
    (0..n)
        .map(|i| {
            let pid = i as u32 + 1;
            let parent_pid = if i == 0 { 0 } else { (i as u32 / 2) + 1 };
            ProcessRecord {
                pid,
                parent_pid,
                real_uid: (i % 8) as u32,
                effective_uid: (i % 8) as u32,
                real_gid: (i % 4) as u32,
                start_time: 1_700_000_000 + i as u64,
                name: format!("proc_{i}"),
                command_line: format!("proc_{i} --work"),
                is_zombie: i % 97 == 0,
                resident_memory_kib: Some(((n - i) as u64 + 1) * 4),
                cpu_time_tenths: Some(i as u64),
                sampled_at: UNIX_EPOCH,
            }
        })
        .collect()
}

fn bench_args_reconstruction(c: &mut Criterion) {
    let mut group = c.benchmark_group("args_reconstruction_4_32_256");

    for argc in [4usize, 32, 256] {
        let blob = make_blob(argc);
        group.bench_with_input(BenchmarkId::from_parameter(argc), &blob, |b, blob| {
            b.iter(|| black_box(command_line_from_args_blob(black_box(blob))))
        });
    }

    group.finish();
}

fn bench_snapshot_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_build_500_1000_2000");

    for size in [500usize, 1000, 2000] {
        let records = make_records(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &records, |b, records| {
            b.iter(|| {
                let snapshot = ProcessSnapshot::from_records(black_box(records.clone()));
                black_box(snapshot);
            })
        });
    }

    group.finish();
}

fn bench_lineage_walk(c: &mut Criterion) {
    let mut group = c.benchmark_group("lineage_walk_500_1000_2000");

    for size in [500usize, 1000, 2000] {
        let snapshot = ProcessSnapshot::from_records(make_records(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &snapshot, |b, snapshot| {
            b.iter(|| {
                let mut depth = 0usize;
                let mut pid = size as u32;
                while let Some(parent) = snapshot.parent_of(black_box(pid)) {
                    depth += 1;
                    pid = parent.pid;
                }
                black_box(depth);
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_args_reconstruction,
    bench_snapshot_build,
    bench_lineage_walk
);
criterion_main!(benches);
