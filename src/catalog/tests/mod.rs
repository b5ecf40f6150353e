use super::*;

fn open_tmp() -> (tempfile::TempDir, Catalog) {
    let dir = tempfile::tempdir().unwrap();
    let catalog = Catalog::open(dir.path()).unwrap();
    (dir, catalog)
}

#[test]
fn create_and_get_roundtrip() {
    let (_dir, catalog) = open_tmp();
    let id = catalog.create("cpu", SeriesType::Integer, 0, 0).unwrap();
    let series = catalog.get(id).unwrap();
    assert_eq!(series.name, "cpu");
    assert_eq!(series.series_type, SeriesType::Integer);
    assert_eq!(series.point_count, 0);
    assert!(series.first_ts.is_none());
}

#[test]
fn duplicate_name_rejected() {
    let (_dir, catalog) = open_tmp();
    catalog.create("cpu", SeriesType::Integer, 0, 0).unwrap();
    assert!(matches!(
        catalog.create("cpu", SeriesType::Float, 0, 0),
        Err(CatalogError::AlreadyExists(_))
    ));
}

#[test]
fn get_or_create_is_idempotent() {
    let (_dir, catalog) = open_tmp();
    let a = catalog.get_or_create("mem", SeriesType::Float, 0, 0).unwrap();
    let b = catalog.get_or_create("mem", SeriesType::Float, 0, 0).unwrap();
    assert_eq!(a, b);
    assert_eq!(catalog.len(), 1);
}

#[test]
fn update_stats_tracks_bounds_and_count() {
    let (_dir, catalog) = open_tmp();
    let id = catalog.create("cpu", SeriesType::Integer, 0, 0).unwrap();
    catalog.update_stats(id, 3, 10, 30).unwrap();
    catalog.update_stats(id, 2, 5, 20).unwrap();
    let series = catalog.get(id).unwrap();
    assert_eq!(series.point_count, 5);
    assert_eq!(series.first_ts, Some(5));
    assert_eq!(series.last_ts, Some(30));
}

#[test]
fn record_shard_is_deduplicated() {
    let (_dir, catalog) = open_tmp();
    let id = catalog.create("cpu", SeriesType::Integer, 0, 0).unwrap();
    catalog.record_shard(id, 42).unwrap();
    catalog.record_shard(id, 42).unwrap();
    catalog.record_shard(id, 7).unwrap();
    let series = catalog.get(id).unwrap();
    assert_eq!(series.shard_ids, vec![42, 7]);
}

#[test]
fn drop_removes_from_name_and_id_lookup() {
    let (_dir, catalog) = open_tmp();
    let id = catalog.create("cpu", SeriesType::Integer, 0, 0).unwrap();
    catalog.drop_series(id).unwrap();
    assert!(catalog.get(id).is_none());
    assert!(catalog.get_by_name("cpu").is_none());
    assert!(catalog.id_for_name("cpu").is_none());
}

#[test]
fn scan_filters_by_predicate() {
    let (_dir, catalog) = open_tmp();
    catalog.create("cpu.user", SeriesType::Integer, 0, 0).unwrap();
    catalog.create("cpu.sys", SeriesType::Integer, 0, 0).unwrap();
    catalog.create("mem.free", SeriesType::Integer, 0, 0).unwrap();

    let matched = catalog.scan(|name| name.starts_with("cpu."));
    let mut names: Vec<&str> = matched.iter().map(|s| s.name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["cpu.sys", "cpu.user"]);
}

#[test]
fn reopen_replays_event_log() {
    let dir = tempfile::tempdir().unwrap();
    let id = {
        let catalog = Catalog::open(dir.path()).unwrap();
        let id = catalog.create("cpu", SeriesType::Integer, 1, 0).unwrap();
        catalog.update_stats(id, 10, 1, 100).unwrap();
        catalog.record_shard(id, 9).unwrap();
        id
    };

    let catalog = Catalog::open(dir.path()).unwrap();
    let series = catalog.get(id).unwrap();
    assert_eq!(series.name, "cpu");
    assert_eq!(series.point_count, 10);
    assert_eq!(series.shard_ids, vec![9]);
}

#[test]
fn checkpoint_then_reopen_preserves_state() {
    let dir = tempfile::tempdir().unwrap();
    let id = {
        let catalog = Catalog::open(dir.path()).unwrap();
        let id = catalog.create("cpu", SeriesType::Integer, 1, 0).unwrap();
        catalog.update_stats(id, 4, 1, 4).unwrap();
        catalog.checkpoint().unwrap();
        catalog.update_stats(id, 1, 5, 5).unwrap();
        id
    };

    let catalog = Catalog::open(dir.path()).unwrap();
    let series = catalog.get(id).unwrap();
    assert_eq!(series.point_count, 5);
    assert_eq!(series.last_ts, Some(5));
}

#[test]
fn retype_changes_point_type() {
    let (_dir, catalog) = open_tmp();
    let id = catalog.create("cpu", SeriesType::Integer, 0, 0).unwrap();
    catalog.retype(id, SeriesType::Float).unwrap();
    assert_eq!(catalog.get(id).unwrap().series_type, SeriesType::Float);
}
