use super::*;

use crate::shard::appender::ShardAppender;
use crate::shard::{Point, PointType, PointValue};

fn write_shard(path: &std::path::Path, series_id: u64, blocks: &[&[(i64, i64)]]) {
    let header = ShardHeader {
        duration_class: 0,
        duration_secs: 3_600,
        window_start: 0,
        status: ShardStatus::Active,
        generation: 0,
    };
    let mut appender = ShardAppender::open_or_create(path, header).unwrap();
    for block in blocks {
        let points: Vec<Point> = block
            .iter()
            .map(|(ts, v)| Point { ts: *ts, value: PointValue::Integer(*v) })
            .collect();
        appender.append_block(series_id, &points, PointType::Integer).unwrap();
        appender.commit().unwrap();
    }
}

#[test]
fn needs_optimization_false_for_fresh_shard() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("1");
    write_shard(&path, 1, &[&[(0, 1), (1, 2)]]);

    let shard = Shard::open(&path).unwrap();
    let thresholds = OptimizerThresholds { tombstone_ratio: 0.3, min_avg_block_len: 1 };
    assert!(!needs_optimization(&shard, &thresholds));
}

#[test]
fn needs_optimization_true_past_tombstone_ratio() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("1");
    write_shard(&path, 1, &[&[(0, 1)], &[(10, 2)]]);

    let shard = Shard::open(&path).unwrap();
    let first_block = shard.index()[0].blocks[0].clone();
    shard.tombstone(1, first_block.block_offset).unwrap();

    let thresholds = OptimizerThresholds { tombstone_ratio: 0.3, min_avg_block_len: 1 };
    assert!(needs_optimization(&shard, &thresholds));
}

#[test]
fn optimize_shard_preserves_live_points_and_bumps_generation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("1");
    write_shard(&path, 1, &[&[(0, 1), (1, 2)], &[(2, 3), (3, 4)]]);

    let handles = ShardHandlePool::new(dir.path(), 8);
    optimize_shard(&path, &handles).unwrap();

    let shard = Shard::open(&path).unwrap();
    assert_eq!(shard.header().generation, 1);
    let points = shard.scan(1, i64::MIN, i64::MAX).unwrap();
    assert_eq!(points.len(), 4);
    assert_eq!(points.iter().map(|p| p.ts).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
}

#[test]
fn optimize_shard_drops_tombstoned_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("1");
    write_shard(&path, 1, &[&[(0, 1)], &[(10, 2)]]);

    let shard = Shard::open(&path).unwrap();
    let first_block = shard.index()[0].blocks[0].clone();
    shard.tombstone(1, first_block.block_offset).unwrap();
    drop(shard);

    let handles = ShardHandlePool::new(dir.path(), 8);
    optimize_shard(&path, &handles).unwrap();

    let shard = Shard::open(&path).unwrap();
    let points = shard.scan(1, i64::MIN, i64::MAX).unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].ts, 10);
}

#[test]
fn run_scans_directory_and_skips_non_shard_files() {
    let dir = tempfile::tempdir().unwrap();
    write_shard(&dir.path().join("1"), 1, &[&[(0, 1)]]);
    std::fs::write(dir.path().join("1.tombstones"), b"ignored").unwrap();

    let handles = ShardHandlePool::new(dir.path(), 8);
    let thresholds = OptimizerThresholds { tombstone_ratio: 2.0, min_avg_block_len: 0 };
    let report = run(dir.path(), &handles, &thresholds).unwrap();
    assert_eq!(report.shards_scanned, 1);
    assert_eq!(report.shards_rewritten, 0);
}
