use tempfile::tempdir;

use crate::shard::{
    Point, PointType, PointValue, Shard, ShardHeader, ShardStatus, ShardWriter, handles::ShardHandlePool,
};

fn header(window_start: i64, generation: u32) -> ShardHeader {
    ShardHeader {
        duration_class: 0,
        duration_secs: 3600,
        window_start,
        status: ShardStatus::Active,
        generation,
    }
}

fn int_point(ts: i64, v: i64) -> Point {
    Point {
        ts,
        value: PointValue::Integer(v),
    }
}

#[test]
fn write_then_read_single_series() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("0");

    let mut writer = ShardWriter::create(&path, header(0, 1)).expect("create");
    writer
        .push_all(1, vec![int_point(1, 10), int_point(2, 20), int_point(3, 30)])
        .expect("push_all");
    writer.finish().expect("finish");

    let shard = Shard::open(&path).expect("open");
    assert_eq!(shard.header().generation, 1);
    let points = shard.scan(1, 0, 100).expect("scan");
    assert_eq!(
        points,
        vec![int_point(1, 10), int_point(2, 20), int_point(3, 30)]
    );
}

#[test]
fn multiple_series_share_one_shard() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("0");

    let mut writer = ShardWriter::create(&path, header(0, 1)).expect("create");
    writer.push_all(1, vec![int_point(1, 1)]).expect("push series 1");
    writer.push_all(2, vec![int_point(1, 2)]).expect("push series 2");
    writer.finish().expect("finish");

    let shard = Shard::open(&path).expect("open");
    assert_eq!(shard.index().len(), 2);
    assert_eq!(shard.scan(1, 0, 10).expect("scan 1"), vec![int_point(1, 1)]);
    assert_eq!(shard.scan(2, 0, 10).expect("scan 2"), vec![int_point(1, 2)]);
    // A series with no data in this shard reads as empty, never an error.
    assert!(shard.scan(3, 0, 10).expect("scan 3").is_empty());
}

#[test]
fn float_and_string_series_round_trip() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("0");

    let mut writer = ShardWriter::create(&path, header(0, 1)).expect("create");
    writer
        .push_all(
            1,
            vec![
                Point {
                    ts: 1,
                    value: PointValue::Float(1.5),
                },
                Point {
                    ts: 2,
                    value: PointValue::Float(-2.25),
                },
            ],
        )
        .expect("push floats");
    writer
        .push_all(
            2,
            vec![Point {
                ts: 1,
                value: PointValue::String("hello".into()),
            }],
        )
        .expect("push strings");
    writer.finish().expect("finish");

    let shard = Shard::open(&path).expect("open");
    let floats = shard.scan(1, 0, 10).expect("scan floats");
    assert_eq!(floats[0].value, PointValue::Float(1.5));
    assert_eq!(floats[1].value, PointValue::Float(-2.25));
    let strings = shard.scan(2, 0, 10).expect("scan strings");
    assert_eq!(strings[0].value, PointValue::String("hello".into()));
}

#[test]
fn tombstone_hides_block_until_next_open_then_persists() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("0");

    let mut writer = ShardWriter::create(&path, header(0, 1)).expect("create");
    writer.push_all(1, vec![int_point(1, 1)]).expect("push");
    writer.finish().expect("finish");

    let shard = Shard::open(&path).expect("open");
    let block_offset = shard.index()[0].blocks[0].block_offset;
    assert_eq!(shard.scan(1, 0, 10).expect("scan").len(), 1);

    shard.tombstone(1, block_offset).expect("tombstone");
    assert!(shard.scan(1, 0, 10).expect("scan after tombstone").is_empty());

    // Reopening picks the tombstone back up from the sidecar file.
    let reopened = Shard::open(&path).expect("reopen");
    assert!(reopened.scan(1, 0, 10).expect("scan reopened").is_empty());
    assert_eq!(reopened.tombstone_count(), 1);
}

#[test]
fn truncated_file_has_no_footer() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("0");

    let mut writer = ShardWriter::create(&path, header(0, 1)).expect("create");
    writer.push_all(1, vec![int_point(1, 1)]).expect("push");
    writer.finish().expect("finish");

    let full = std::fs::read(&path).expect("read");
    std::fs::write(&path, &full[..full.len() - 10]).expect("truncate");

    let err = Shard::open(&path).expect_err("truncated shard must fail to open");
    match err {
        crate::shard::ShardError::MissingFooter | crate::shard::ShardError::ChecksumMismatch => {}
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn corrupted_block_crc_is_detected() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("0");

    let mut writer = ShardWriter::create(&path, header(0, 1)).expect("create");
    writer.push_all(1, vec![int_point(1, 1), int_point(2, 2)]).expect("push");
    writer.finish().expect("finish");

    let mut bytes = std::fs::read(&path).expect("read");
    // Flip a byte inside the first block's body (just past the header + length prefix).
    let flip_at = crate::shard::SHARD_HEADER_SIZE + crate::shard::BLOCK_LEN_SIZE + 2;
    bytes[flip_at] ^= 0xFF;
    std::fs::write(&path, &bytes).expect("write corrupted");

    let shard = Shard::open(&path).expect("header/footer still valid, open succeeds");
    let err = shard.scan(1, 0, 10).expect_err("corrupted block must fail on read");
    assert!(matches!(err, crate::shard::ShardError::ChecksumMismatch));
}

#[test]
fn handle_pool_evicts_least_recently_used() {
    let dir = tempdir().expect("tempdir");
    for id in 0..3u64 {
        let path = dir.path().join(id.to_string());
        let mut writer = ShardWriter::create(&path, header(id as i64, 1)).expect("create");
        writer.push_all(1, vec![int_point(1, id as i64)]).expect("push");
        writer.finish().expect("finish");
    }

    let pool = ShardHandlePool::new(dir.path(), 2);
    pool.get(0).expect("open 0");
    pool.get(1).expect("open 1");
    assert_eq!(pool.resident_count(), 2);
    // Touch 0 so 1 becomes the least-recently-used entry.
    pool.get(0).expect("re-touch 0");
    pool.get(2).expect("open 2 evicts 1");
    assert_eq!(pool.resident_count(), 2);

    // 0 and 2 should still be resident (no reopen needed); fetching 1
    // again just means a fresh open, not an error.
    assert!(pool.get(1).is_ok());
}

#[test]
fn window_start_buckets_by_duration() {
    assert_eq!(crate::shard::window_start(0, 3600), 0);
    assert_eq!(crate::shard::window_start(3599, 3600), 0);
    assert_eq!(crate::shard::window_start(3600, 3600), 3600);
    assert_eq!(crate::shard::window_start(-1, 3600), -3600);
}
