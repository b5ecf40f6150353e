use super::*;

use crate::catalog::{Catalog, SeriesType};
use crate::shard::handles::ShardHandlePool;

#[test]
fn insert_and_peek_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let buffer = Buffer::open(dir.path(), DEFAULT_PAGE_CAPACITY).unwrap();

    buffer.insert(1, Point { ts: 20, value: PointValue::Integer(2) }).unwrap();
    buffer.insert(1, Point { ts: 10, value: PointValue::Integer(1) }).unwrap();

    let points = buffer.peek(1);
    assert_eq!(points.len(), 2);
    assert_eq!(points[0].ts, 10);
    assert_eq!(points[1].ts, 20);
    assert_eq!(buffer.page_len(1), 2);
}

#[test]
fn page_full_reported_at_capacity() {
    let dir = tempfile::tempdir().unwrap();
    let buffer = Buffer::open(dir.path(), 2).unwrap();

    assert!(!buffer.insert(1, Point { ts: 1, value: PointValue::Integer(1) }).unwrap());
    assert!(buffer.insert(1, Point { ts: 2, value: PointValue::Integer(2) }).unwrap());
    assert!(buffer.any_page_full());
}

#[test]
fn series_with_pending_data_lists_only_nonempty() {
    let dir = tempfile::tempdir().unwrap();
    let buffer = Buffer::open(dir.path(), DEFAULT_PAGE_CAPACITY).unwrap();

    buffer.insert(1, Point { ts: 1, value: PointValue::Integer(1) }).unwrap();
    buffer.insert(2, Point { ts: 1, value: PointValue::Float(1.5) }).unwrap();

    let mut pending = buffer.series_with_pending_data();
    pending.sort();
    assert_eq!(pending, vec![1, 2]);
    assert_eq!(buffer.total_buffered_points(), 2);
}

#[test]
fn reopen_replays_journal() {
    let dir = tempfile::tempdir().unwrap();
    {
        let buffer = Buffer::open(dir.path(), DEFAULT_PAGE_CAPACITY).unwrap();
        buffer.insert(7, Point { ts: 1, value: PointValue::String("up".into()) }).unwrap();
        buffer.insert(7, Point { ts: 2, value: PointValue::String("down".into()) }).unwrap();
    }

    let buffer = Buffer::open(dir.path(), DEFAULT_PAGE_CAPACITY).unwrap();
    assert_eq!(buffer.page_len(7), 2);
}

#[test]
fn drain_all_empties_pages_and_truncates_journal() {
    let dir = tempfile::tempdir().unwrap();
    let buffer = Buffer::open(dir.path(), DEFAULT_PAGE_CAPACITY).unwrap();
    buffer.insert(3, Point { ts: 5, value: PointValue::Integer(9) }).unwrap();

    let drained = buffer.drain_all().unwrap();
    assert_eq!(drained.get(&3).map(Vec::len), Some(1));
    assert_eq!(buffer.total_buffered_points(), 0);

    drop(buffer);
    let reopened = Buffer::open(dir.path(), DEFAULT_PAGE_CAPACITY).unwrap();
    assert_eq!(reopened.total_buffered_points(), 0);
}

#[test]
fn sync_run_flushes_points_into_a_shard_and_updates_catalog() {
    let root = tempfile::tempdir().unwrap();
    let buffer = Buffer::open(root.path().join("buffer"), DEFAULT_PAGE_CAPACITY).unwrap();
    let catalog = Catalog::open(root.path().join("catalog")).unwrap();
    let shard_dir = root.path().join("shards");
    std::fs::create_dir_all(&shard_dir).unwrap();
    let handles = ShardHandlePool::new(&shard_dir, 16);
    let durations = [3_600u32];

    let series_id = catalog.create("cpu", SeriesType::Integer, 0, 0).unwrap();
    buffer.insert(series_id, Point { ts: 10, value: PointValue::Integer(1) }).unwrap();
    buffer.insert(series_id, Point { ts: 20, value: PointValue::Integer(2) }).unwrap();

    let report = sync::run(&buffer, &catalog, &handles, &shard_dir, &durations).unwrap();
    assert_eq!(report.series_flushed, 1);
    assert_eq!(report.points_flushed, 2);
    assert_eq!(report.blocks_appended, 1);

    assert_eq!(buffer.total_buffered_points(), 0);
    let series = catalog.get(series_id).unwrap();
    assert_eq!(series.point_count, 2);
    assert_eq!(series.first_ts, Some(10));
    assert_eq!(series.last_ts, Some(20));
    assert_eq!(series.shard_ids.len(), 1);
}

#[test]
fn sync_run_is_a_noop_with_nothing_pending() {
    let root = tempfile::tempdir().unwrap();
    let buffer = Buffer::open(root.path().join("buffer"), DEFAULT_PAGE_CAPACITY).unwrap();
    let catalog = Catalog::open(root.path().join("catalog")).unwrap();
    let shard_dir = root.path().join("shards");
    std::fs::create_dir_all(&shard_dir).unwrap();
    let handles = ShardHandlePool::new(&shard_dir, 16);

    let report = sync::run(&buffer, &catalog, &handles, &shard_dir, &[3_600]).unwrap();
    assert_eq!(report.series_flushed, 0);
    assert_eq!(report.blocks_appended, 0);
}
