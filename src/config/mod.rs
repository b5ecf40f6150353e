//! Server configuration.
//!
//! The teacher repo has no file-based configuration layer of its own — every
//! tunable is a field on `EngineConfig` constructed in-process. A clustered
//! server needs an actual config file (shard durations, buffer sizing,
//! optimizer thresholds, FIFO caps, fan-out deadlines all vary per
//! deployment), so this module is grounded in the pack's config-loading
//! repos instead: a plain `serde`-derived struct deserialized from TOML,
//! the same shape `onurtuna-OasisNvr` and `prataprc-rdms` use for their own
//! structured configuration.

#[cfg(test)]
mod tests;

use std::{fs, io, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating a [`DbConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("I/O error reading config: {0}")]
    Io(#[from] io::Error),

    /// The file's contents did not parse as valid TOML for [`DbConfig`].
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A field failed validation (e.g. an empty duration table).
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// The full set of server-wide tunables, normally loaded from
/// `<dbpath>/database.toml` (or wherever `--config` points).
///
/// Every field carries a sensible default via [`DbConfig::default`], so a
/// fresh database can be opened with `DbConfig::default()` and no file at
/// all — `siridb-server`'s `--config` flag is the external collaborator
/// that would normally supply this from disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Number of pools this server believes the cluster currently has.
    /// Only meaningful for the first bring-up; subsequent pool-count
    /// changes arrive via the reindex protocol, not this file.
    pub initial_pool_count: usize,

    /// This server's own pool id.
    pub local_pool_id: u16,

    /// Fixed set of shard durations, in seconds, indexed by duration
    /// class. A series is pinned to one class (an index into this table)
    /// for its lifetime — see spec.md §4.3.
    pub shard_durations_secs: Vec<u32>,

    /// Default duration class assigned to newly created series.
    pub default_duration_class: u8,

    /// Maximum number of points held in a series' buffer page before
    /// buffersync is forced regardless of the timer (spec.md §4.4).
    pub buffer_page_capacity: usize,

    /// How often the background buffersync task runs even if no page is
    /// full yet.
    pub buffersync_interval_secs: u64,

    /// Tombstone-ratio threshold above which the optimizer rewrites a
    /// shard (spec.md §4.6).
    pub optimizer_tombstone_ratio: f64,

    /// Average live-block-length floor (bytes); shards below this are
    /// also eligible for optimization.
    pub optimizer_min_avg_block_len: usize,

    /// How often the optimizer worker scans for eligible shards.
    pub optimizer_interval_secs: u64,

    /// Number of concurrently open shard file handles to keep resident
    /// per server (see [`crate::shard::handles`]).
    pub shard_handle_capacity: usize,

    /// Soft cap, in bytes, per-peer FIFO directory: beyond this,
    /// initsync/reindex progress pauses but writes keep being accepted.
    pub fifo_soft_cap_bytes: u64,

    /// Hard cap, in bytes, per-peer FIFO directory: beyond this, writes
    /// to the affected series fail with `replication-saturated`.
    pub fifo_hard_cap_bytes: u64,

    /// Maximum size of a single FIFO segment file before rolling to the
    /// next one.
    pub fifo_segment_cap_bytes: u64,

    /// Default per-pool fan-out deadline for a query, in milliseconds,
    /// used when the query's own remaining time budget is unset.
    pub fanout_deadline_ms: u64,

    /// Number of worker threads handling buffer flush, shard reads,
    /// optimization, and initsync/reindex streaming (spec.md §5).
    pub worker_threads: usize,

    /// Peer id of this pool's other server, if any (a pool is 1-2
    /// servers, spec.md glossary). Every local write is additionally
    /// queued to this peer's replication FIFO. `None` for a single-server
    /// pool or standalone bring-up.
    pub replica_peer_id: Option<u16>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            initial_pool_count: 1,
            local_pool_id: 0,
            shard_durations_secs: vec![3_600, 86_400, 604_800],
            default_duration_class: 1,
            buffer_page_capacity: 512,
            buffersync_interval_secs: 5,
            optimizer_tombstone_ratio: 0.3,
            optimizer_min_avg_block_len: 64,
            optimizer_interval_secs: 300,
            shard_handle_capacity: 256,
            fifo_soft_cap_bytes: 256 * 1024 * 1024,
            fifo_hard_cap_bytes: 1024 * 1024 * 1024,
            fifo_segment_cap_bytes: 64 * 1024 * 1024,
            fanout_deadline_ms: 10_000,
            worker_threads: 4,
            replica_peer_id: None,
        }
    }
}

impl DbConfig {
    /// Loads and validates a config from a TOML file on disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates field invariants not expressible in the type system.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shard_durations_secs.is_empty() {
            return Err(ConfigError::Invalid("shard_durations_secs must not be empty".into()));
        }
        if self.shard_durations_secs.iter().any(|&d| d == 0) {
            return Err(ConfigError::Invalid("shard durations must be non-zero".into()));
        }
        if (self.default_duration_class as usize) >= self.shard_durations_secs.len() {
            return Err(ConfigError::Invalid(
                "default_duration_class out of range for shard_durations_secs".into(),
            ));
        }
        if self.buffer_page_capacity == 0 {
            return Err(ConfigError::Invalid("buffer_page_capacity must be at least 1".into()));
        }
        if self.initial_pool_count == 0 {
            return Err(ConfigError::Invalid("initial_pool_count must be at least 1".into()));
        }
        if self.fifo_hard_cap_bytes < self.fifo_soft_cap_bytes {
            return Err(ConfigError::Invalid(
                "fifo_hard_cap_bytes must be >= fifo_soft_cap_bytes".into(),
            ));
        }
        Ok(())
    }

    /// The duration, in seconds, for a given duration class.
    pub fn duration_secs(&self, duration_class: u8) -> Option<u32> {
        self.shard_durations_secs.get(duration_class as usize).copied()
    }
}
