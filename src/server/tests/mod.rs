use super::*;

use crate::query::SeriesSelector;
use crate::replication::ReplicaSink;
use crate::shard::PointValue;

fn open_db(root: &Path, config: DbConfig) -> Database {
    Database::open(root, config).unwrap()
}

struct RecordingSink {
    accepted: usize,
}

impl ReplicaSink for RecordingSink {
    fn send(&mut self, _pkg: crate::wire::Package) -> Result<bool, ReplicationError> {
        self.accepted += 1;
        Ok(true)
    }
}

#[test]
fn insert_local_series_buffers_and_replicates_to_peer() {
    let root = tempfile::tempdir().unwrap();
    let mut config = DbConfig { initial_pool_count: 1, local_pool_id: 0, ..Default::default() };
    config.replica_peer_id = Some(1);
    let db = open_db(root.path(), config);

    let outcome = db.insert("cpu", Point { ts: 1, value: PointValue::Integer(42) }).unwrap();
    assert!(matches!(outcome, InsertOutcome::Local { .. }));
    assert_eq!(db.catalog().len(), 1);

    // The replica peer's fifo should now hold exactly this one write.
    let fifo_dir = root.path().join("fifo").join("1");
    assert!(fifo_dir.exists());
}

#[test]
fn insert_remote_series_reports_owning_pool_without_buffering() {
    let root = tempfile::tempdir().unwrap();
    let config = DbConfig { initial_pool_count: 4, local_pool_id: 0, ..Default::default() };
    let db = open_db(root.path(), config);

    // Find a name that hashes somewhere other than pool 0.
    let name = (0..64)
        .map(|i| format!("series{i}"))
        .find(|n| db.lookup().resolve(n) != 0)
        .expect("some name should hash off pool 0 with 4 pools");

    let outcome = db.insert(&name, Point { ts: 1, value: PointValue::Integer(1) }).unwrap();
    match outcome {
        InsertOutcome::Remote(pool_id) => assert_ne!(pool_id, 0),
        InsertOutcome::Local { .. } => panic!("expected a remote outcome"),
    }
    assert_eq!(db.catalog().len(), 0);
}

#[test]
fn buffersync_then_query_local_returns_flushed_points() {
    let root = tempfile::tempdir().unwrap();
    let config = DbConfig { initial_pool_count: 1, local_pool_id: 0, ..Default::default() };
    let db = open_db(root.path(), config);

    db.insert("cpu", Point { ts: 10, value: PointValue::Integer(1) }).unwrap();
    db.insert("cpu", Point { ts: 20, value: PointValue::Integer(2) }).unwrap();
    let report = db.run_buffersync().unwrap();
    assert_eq!(report.series_flushed, 1);

    let query = Query { selector: SeriesSelector::Names(vec!["cpu".into()]), from: 0, to: 100, aggregate: None };
    let results = db.query_local(&query).unwrap();
    assert_eq!(results["cpu"].iter().map(|p| p.ts).collect::<Vec<_>>(), vec![10, 20]);
}

#[test]
fn stats_reflects_series_and_task_state() {
    let root = tempfile::tempdir().unwrap();
    let config = DbConfig { initial_pool_count: 1, local_pool_id: 0, ..Default::default() };
    let db = open_db(root.path(), config);
    db.insert("cpu", Point { ts: 1, value: PointValue::Integer(1) }).unwrap();

    let stats = db.stats();
    assert_eq!(stats.series_count, 1);
    assert_eq!(stats.initsync_state, Some(TaskState::Idle));
    assert_eq!(stats.reindex_state, Some(TaskState::Idle));
}

#[test]
fn step_initsync_streams_the_only_series_then_completes() {
    let root = tempfile::tempdir().unwrap();
    let config = DbConfig { initial_pool_count: 1, local_pool_id: 0, ..Default::default() };
    let db = open_db(root.path(), config);
    db.insert("cpu", Point { ts: 1, value: PointValue::Integer(1) }).unwrap();

    let mut sink = RecordingSink { accepted: 0 };
    let outcome = db.step_initsync(&mut sink).unwrap();
    assert!(matches!(outcome, replication::StepOutcome::Sent(_)));
    assert_eq!(sink.accepted, 1);

    let outcome = db.step_initsync(&mut sink).unwrap();
    assert_eq!(outcome, replication::StepOutcome::Idle);
    assert_eq!(db.stats().initsync_state, Some(TaskState::Done));
}

#[test]
fn step_initsync_pauses_when_replica_fifo_is_past_its_soft_cap() {
    let root = tempfile::tempdir().unwrap();
    let mut config =
        DbConfig { initial_pool_count: 1, local_pool_id: 0, fifo_soft_cap_bytes: 1, ..Default::default() };
    config.replica_peer_id = Some(1);
    let db = open_db(root.path(), config);
    // The write itself lands in the replica fifo, immediately pushing it
    // past a 1-byte soft cap.
    db.insert("cpu", Point { ts: 1, value: PointValue::Integer(1) }).unwrap();

    let mut sink = RecordingSink { accepted: 0 };
    let outcome = db.step_initsync(&mut sink).unwrap();
    assert_eq!(outcome, replication::StepOutcome::Paused);
    assert_eq!(sink.accepted, 0, "initsync must not stream while the replica fifo is past its soft cap");
    assert_eq!(db.stats().initsync_state, Some(TaskState::Paused));
}

#[test]
fn opening_an_already_locked_database_fails() {
    let root = tempfile::tempdir().unwrap();
    let config = DbConfig { initial_pool_count: 1, local_pool_id: 0, ..Default::default() };
    let _db = open_db(root.path(), config.clone());

    let err = Database::open(root.path(), config).unwrap_err();
    assert!(matches!(err, ServerError::AlreadyLocked(_)));
}

#[test]
fn query_local_tagged_with_deadline_returns_partial_once_expired() {
    let root = tempfile::tempdir().unwrap();
    let config = DbConfig { initial_pool_count: 1, local_pool_id: 0, ..Default::default() };
    let db = open_db(root.path(), config);

    db.insert("cpu", Point { ts: 1, value: PointValue::Integer(1) }).unwrap();
    db.insert("mem", Point { ts: 1, value: PointValue::Integer(2) }).unwrap();

    let query = Query { selector: SeriesSelector::Names(vec!["cpu".into(), "mem".into()]), from: 0, to: 100, aggregate: None };

    let deadline = query::Deadline::never();
    let (results, partial) = db.query_local_tagged_with_deadline(&query, &deadline).unwrap();
    assert_eq!(results.len(), 2);
    assert!(!partial);

    let expired = query::Deadline::after(std::time::Duration::from_secs(0));
    let (results, partial) = db.query_local_tagged_with_deadline(&query, &expired).unwrap();
    assert!(results.is_empty());
    assert!(partial);
}

#[test]
fn query_local_tagged_with_deadline_honors_an_explicit_cancel() {
    let root = tempfile::tempdir().unwrap();
    let config = DbConfig { initial_pool_count: 1, local_pool_id: 0, ..Default::default() };
    let db = open_db(root.path(), config);
    db.insert("cpu", Point { ts: 1, value: PointValue::Integer(1) }).unwrap();

    let deadline = query::Deadline::never();
    let cancel = deadline.cancel_handle();
    cancel.cancel();

    let query = Query { selector: SeriesSelector::Names(vec!["cpu".into()]), from: 0, to: 100, aggregate: None };
    let (results, partial) = db.query_local_tagged_with_deadline(&query, &deadline).unwrap();
    assert!(results.is_empty());
    assert!(partial);
}

#[test]
fn plan_fanout_excludes_local_pool() {
    let root = tempfile::tempdir().unwrap();
    let config = DbConfig { initial_pool_count: 3, local_pool_id: 0, ..Default::default() };
    let db = open_db(root.path(), config);

    let query = Query {
        selector: SeriesSelector::Names(vec!["cpu".into(), "mem".into()]),
        from: 0,
        to: 100,
        aggregate: None,
    };
    let fanout = db.plan_fanout(&query);
    assert!(!fanout.contains(&0));
}
