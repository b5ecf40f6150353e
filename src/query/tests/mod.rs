use super::*;

use crate::catalog::SeriesType;
use crate::lookup::Lookup;

fn setup(root: &std::path::Path) -> (Catalog, Buffer, ShardHandlePool) {
    let catalog = Catalog::open(root.join("catalog")).unwrap();
    let buffer = Buffer::open(root.join("buffer"), 64).unwrap();
    let shard_dir = root.join("shards");
    std::fs::create_dir_all(&shard_dir).unwrap();
    let handles = ShardHandlePool::new(&shard_dir, 16);
    (catalog, buffer, handles)
}

#[test]
fn execute_merges_buffer_and_shard_points() {
    let root = tempfile::tempdir().unwrap();
    let (catalog, buffer, handles) = setup(root.path());
    let shard_dir = root.path().join("shards");

    let series_id = catalog.create("cpu", SeriesType::Integer, 0, 0).unwrap();
    buffer.insert(series_id, Point { ts: 10, value: PointValue::Integer(1) }).unwrap();
    buffer.insert(series_id, Point { ts: 20, value: PointValue::Integer(2) }).unwrap();
    let report = crate::buffer::sync::run(&buffer, &catalog, &handles, &shard_dir, &[3_600]).unwrap();
    assert_eq!(report.series_flushed, 1);

    buffer.insert(series_id, Point { ts: 30, value: PointValue::Integer(3) }).unwrap();

    let executor = LocalExecutor::new(&catalog, &buffer, &handles);
    let query = Query { selector: SeriesSelector::Names(vec!["cpu".into()]), from: 0, to: 100, aggregate: None };
    let results = executor.execute(&query).unwrap();
    let points = results.get("cpu").unwrap();
    assert_eq!(points.iter().map(|p| p.ts).collect::<Vec<_>>(), vec![10, 20, 30]);
}

#[test]
fn execute_applies_scalar_aggregate() {
    let root = tempfile::tempdir().unwrap();
    let (catalog, buffer, handles) = setup(root.path());
    let series_id = catalog.create("cpu", SeriesType::Integer, 0, 0).unwrap();
    buffer.insert(series_id, Point { ts: 1, value: PointValue::Integer(10) }).unwrap();
    buffer.insert(series_id, Point { ts: 2, value: PointValue::Integer(20) }).unwrap();

    let executor = LocalExecutor::new(&catalog, &buffer, &handles);
    let query = Query {
        selector: SeriesSelector::Names(vec!["cpu".into()]),
        from: 0,
        to: 100,
        aggregate: Some(Aggregate::Sum),
    };
    let results = executor.execute(&query).unwrap();
    let points = results.get("cpu").unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].value, PointValue::Float(30.0));
}

#[test]
fn execute_skips_series_with_no_points_in_range_rather_than_failing() {
    let root = tempfile::tempdir().unwrap();
    let (catalog, buffer, handles) = setup(root.path());
    catalog.create("empty", SeriesType::Integer, 0, 0).unwrap();

    let executor = LocalExecutor::new(&catalog, &buffer, &handles);
    let query = Query {
        selector: SeriesSelector::Names(vec!["empty".into()]),
        from: 0,
        to: 100,
        aggregate: Some(Aggregate::Count),
    };
    let results = executor.execute(&query).unwrap();
    assert_eq!(results.get("empty").map(Vec::len), Some(0));
}

#[test]
fn regex_selector_matches_multiple_series() {
    let root = tempfile::tempdir().unwrap();
    let (catalog, buffer, handles) = setup(root.path());
    let a = catalog.create("host.cpu", SeriesType::Integer, 0, 0).unwrap();
    let b = catalog.create("host.mem", SeriesType::Integer, 0, 0).unwrap();
    catalog.create("other", SeriesType::Integer, 0, 0).unwrap();
    buffer.insert(a, Point { ts: 1, value: PointValue::Integer(1) }).unwrap();
    buffer.insert(b, Point { ts: 1, value: PointValue::Integer(2) }).unwrap();

    let executor = LocalExecutor::new(&catalog, &buffer, &handles);
    let query =
        Query { selector: SeriesSelector::Regex("^host\\.".into()), from: 0, to: 100, aggregate: None };
    let results = executor.execute(&query).unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.contains_key("host.cpu"));
    assert!(results.contains_key("host.mem"));
}

#[test]
fn filter_aggregate_keeps_only_matching_points() {
    let root = tempfile::tempdir().unwrap();
    let (catalog, buffer, handles) = setup(root.path());
    let series_id = catalog.create("cpu", SeriesType::Integer, 0, 0).unwrap();
    for ts in 0..5 {
        buffer.insert(series_id, Point { ts, value: PointValue::Integer(ts) }).unwrap();
    }

    let executor = LocalExecutor::new(&catalog, &buffer, &handles);
    let query = Query {
        selector: SeriesSelector::Names(vec!["cpu".into()]),
        from: 0,
        to: 100,
        aggregate: Some(Aggregate::Filter(Filter::Compare(FilterOp::Ge, 3.0))),
    };
    let results = executor.execute(&query).unwrap();
    let points = results.get("cpu").unwrap();
    assert_eq!(points.iter().map(|p| p.ts).collect::<Vec<_>>(), vec![3, 4]);
}

#[test]
fn difference_aggregate_computes_consecutive_deltas() {
    let root = tempfile::tempdir().unwrap();
    let (catalog, buffer, handles) = setup(root.path());
    let series_id = catalog.create("cpu", SeriesType::Integer, 0, 0).unwrap();
    buffer.insert(series_id, Point { ts: 1, value: PointValue::Integer(10) }).unwrap();
    buffer.insert(series_id, Point { ts: 2, value: PointValue::Integer(15) }).unwrap();
    buffer.insert(series_id, Point { ts: 3, value: PointValue::Integer(12) }).unwrap();

    let executor = LocalExecutor::new(&catalog, &buffer, &handles);
    let query = Query {
        selector: SeriesSelector::Names(vec!["cpu".into()]),
        from: 0,
        to: 100,
        aggregate: Some(Aggregate::Difference),
    };
    let results = executor.execute(&query).unwrap();
    let points = results.get("cpu").unwrap();
    assert_eq!(points.len(), 2);
    assert_eq!(points[0].value, PointValue::Float(5.0));
    assert_eq!(points[1].value, PointValue::Float(-3.0));
}

#[test]
fn plan_fanout_excludes_local_and_down_pools() {
    let lookup = Lookup::new(4).unwrap();
    let pools = PoolTable::new();
    pools.mark_unreachable(2);

    // NUM_SLOTS is a multiple of 4 here, so Names selectors exercise
    // whichever concrete pools the series names actually hash to.
    let names: Vec<String> = (0..32).map(|i| format!("series{i}")).collect();
    let selector = SeriesSelector::Names(names.clone());
    let local_pool_id = lookup.resolve(&names[0]) as u16;
    let fanout = plan_fanout(&selector, &lookup, local_pool_id, &pools);
    assert!(!fanout.contains(&local_pool_id));
    assert!(!fanout.contains(&2));

    let regex_fanout = plan_fanout(&SeriesSelector::Regex(".*".into()), &lookup, local_pool_id, &pools);
    assert!(!regex_fanout.contains(&local_pool_id));
    assert!(!regex_fanout.contains(&2));
}

fn tagged(ts: i64, value: i64, generation: u32, pool_id: u16) -> TaggedPoint {
    TaggedPoint { point: Point { ts, value: PointValue::Integer(value) }, generation, pool_id }
}

#[test]
fn merge_results_unions_and_dedupes_overlapping_series() {
    let mut local = BTreeMap::new();
    local.insert("cpu".to_string(), vec![tagged(1, 1, 0, 0)]);

    let mut remote = BTreeMap::new();
    remote.insert("cpu".to_string(), vec![tagged(1, 1, 0, 1), tagged(2, 2, 0, 1)]);
    remote.insert("mem".to_string(), vec![tagged(1, 9, 0, 1)]);

    let merged = merge_results(local, vec![remote]);
    assert_eq!(merged["cpu"].len(), 2);
    assert_eq!(merged["mem"].len(), 1);
}

#[test]
fn merge_results_breaks_timestamp_ties_by_generation_then_pool_id() {
    // Same timestamp, disagreeing values, from two different sources —
    // the reindex-overlap scenario spec.md §4.9's tie-break rule exists
    // for. Higher generation must win regardless of arrival order.
    let mut local = BTreeMap::new();
    local.insert("cpu".to_string(), vec![tagged(5, 100, 2, 0)]);
    let mut remote = BTreeMap::new();
    remote.insert("cpu".to_string(), vec![tagged(5, 999, 7, 1)]);
    let merged = merge_results(local, vec![remote]);
    assert_eq!(merged["cpu"], vec![Point { ts: 5, value: PointValue::Integer(999) }]);

    // Generations tied: the higher owning-pool id wins.
    let mut local = BTreeMap::new();
    local.insert("cpu".to_string(), vec![tagged(5, 100, 3, 0)]);
    let mut remote = BTreeMap::new();
    remote.insert("cpu".to_string(), vec![tagged(5, 999, 3, 1)]);
    let merged = merge_results(local, vec![remote]);
    assert_eq!(merged["cpu"], vec![Point { ts: 5, value: PointValue::Integer(999) }]);

    // Same tie, but this time the higher pool id is local.
    let mut local = BTreeMap::new();
    local.insert("cpu".to_string(), vec![tagged(5, 100, 3, 1)]);
    let mut remote = BTreeMap::new();
    remote.insert("cpu".to_string(), vec![tagged(5, 999, 3, 0)]);
    let merged = merge_results(local, vec![remote]);
    assert_eq!(merged["cpu"], vec![Point { ts: 5, value: PointValue::Integer(100) }]);
}
