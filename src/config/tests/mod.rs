use super::*;

#[test]
fn default_config_validates() {
    DbConfig::default().validate().unwrap();
}

#[test]
fn empty_durations_rejected() {
    let mut config = DbConfig::default();
    config.shard_durations_secs.clear();
    assert!(config.validate().is_err());
}

#[test]
fn default_duration_class_out_of_range_rejected() {
    let mut config = DbConfig::default();
    config.default_duration_class = config.shard_durations_secs.len() as u8;
    assert!(config.validate().is_err());
}

#[test]
fn fifo_caps_must_be_ordered() {
    let mut config = DbConfig::default();
    config.fifo_hard_cap_bytes = config.fifo_soft_cap_bytes - 1;
    assert!(config.validate().is_err());
}

#[test]
fn load_from_toml_roundtrips_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("database.toml");
    std::fs::write(&path, "local_pool_id = 3\nworker_threads = 8\n").unwrap();

    let config = DbConfig::load(&path).unwrap();
    assert_eq!(config.local_pool_id, 3);
    assert_eq!(config.worker_threads, 8);
    // Untouched fields keep their defaults.
    assert_eq!(config.buffer_page_capacity, DbConfig::default().buffer_page_capacity);
}

#[test]
fn duration_secs_looks_up_by_class() {
    let config = DbConfig::default();
    assert_eq!(config.duration_secs(0), Some(3_600));
    assert_eq!(config.duration_secs(99), None);
}
