// WAL throughput benchmarks.
//
// Measures the cost of the node driver's one-fsync-per-ready-batch write
// path (`Wal::save_entries` + `save_hard_state` + `sync`) across batch
// sizes and payload sizes, plus segment rotation and full-directory replay,
// since those are the operations the readiness loop blocks on.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use raft_node::consensus::{Entry, EntryKind, HardState};
use raft_node::wal::{Wal, WalMetadata};
use tempfile::TempDir;

fn entries(count: u64, start: u64, payload_len: usize) -> Vec<Entry> {
    (0..count)
        .map(|i| Entry {
            index: start + i,
            term: 1,
            kind: EntryKind::Normal,
            data: vec![0xab; payload_len],
        })
        .collect()
}

fn open_wal(dir: &TempDir, segment_size: u64) -> Wal {
    Wal::create(dir.path(), segment_size, &WalMetadata { cluster_id: 1, node_id: 1 }).unwrap()
}

fn bench_append_and_sync(c: &mut Criterion) {
    let mut group = c.benchmark_group("append_and_sync");

    for batch_size in [1usize, 16, 128] {
        group.bench_with_input(
            BenchmarkId::new("batch", batch_size),
            &batch_size,
            |b, &batch_size| {
                let dir = TempDir::new().unwrap();
                let mut wal = open_wal(&dir, 256 * 1024 * 1024);
                let mut next_index = 1u64;
                b.iter(|| {
                    let batch = entries(batch_size as u64, next_index, 64);
                    next_index += batch_size as u64;
                    wal.save_entries(black_box(&batch)).unwrap();
                    wal.save_hard_state(&HardState { term: 1, vote: 1, commit: next_index - 1 }).unwrap();
                    wal.sync().unwrap();
                });
            },
        );
    }

    group.finish();
}

fn bench_payload_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("payload_size");

    for payload_len in [64usize, 1024, 16 * 1024] {
        group.bench_with_input(
            BenchmarkId::from_parameter(payload_len),
            &payload_len,
            |b, &payload_len| {
                let dir = TempDir::new().unwrap();
                let mut wal = open_wal(&dir, 256 * 1024 * 1024);
                let mut next_index = 1u64;
                b.iter(|| {
                    let batch = entries(1, next_index, payload_len);
                    next_index += 1;
                    wal.save_entries(black_box(&batch)).unwrap();
                    wal.sync().unwrap();
                });
            },
        );
    }

    group.finish();
}

fn bench_segment_rotation(c: &mut Criterion) {
    // A small target segment size so `cut` fires on (almost) every batch,
    // isolating rotation cost from steady-state append cost.
    let dir = TempDir::new().unwrap();
    let mut wal = open_wal(&dir, 64 * 1024);
    let mut next_index = 1u64;

    c.bench_function("segment_rotation", |b| {
        b.iter(|| {
            let batch = entries(8, next_index, 512);
            next_index += 8;
            wal.save_entries(black_box(&batch)).unwrap();
            wal.sync().unwrap();
        });
    });
}

fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay");

    for entry_count in [100u64, 10_000] {
        group.bench_with_input(
            BenchmarkId::from_parameter(entry_count),
            &entry_count,
            |b, &entry_count| {
                let dir = TempDir::new().unwrap();
                {
                    let mut wal = open_wal(&dir, 256 * 1024 * 1024);
                    let batch = entries(entry_count, 1, 64);
                    wal.save_entries(&batch).unwrap();
                    wal.save_hard_state(&HardState { term: 1, vote: 1, commit: entry_count }).unwrap();
                    wal.sync().unwrap();
                }
                b.iter(|| {
                    let (_wal, replayed) = Wal::open(dir.path(), 256 * 1024 * 1024, 0).unwrap();
                    black_box(replayed.entries.len());
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_append_and_sync,
    bench_payload_size,
    bench_segment_rotation,
    bench_replay
);
criterion_main!(benches);
