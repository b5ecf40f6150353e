//! Shard optimizer (spec.md §4.6).
//!
//! A background worker that rewrites fragmented shards: for each shard
//! whose tombstone ratio or average live block length crosses a
//! configured threshold, it reads every live block, merges the blocks
//! belonging to each series into one contiguous run, and writes a new
//! shard file at the same path with a bumped generation via
//! [`crate::shard::builder::ShardWriter`] — the same atomic
//! write-tmp-then-rename publish the teacher's compaction strategies use
//! for a rewritten SSTable, adapted here to operate on a single shard
//! file in place rather than merging many SSTables into one.
//!
//! The optimizer only ever holds a read lock on the source shard (via
//! [`crate::shard::Shard::open`]'s lock-free mmap); the new generation is
//! published by rename, and the handle pool is told to evict its cached
//! handle so the next reader picks up the new file.

#[cfg(test)]
mod tests;

use std::{fs, path::Path};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::shard::builder::ShardWriter;
use crate::shard::handles::ShardHandlePool;
use crate::shard::{Shard, ShardError, ShardHeader, ShardStatus};

/// Errors returned by optimizer operations.
#[derive(Debug, Error)]
pub enum OptimizerError {
    /// Underlying shard I/O failure.
    #[error("shard error: {0}")]
    Shard(#[from] ShardError),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fragmentation thresholds that make a shard eligible for optimization.
#[derive(Debug, Clone, Copy)]
pub struct OptimizerThresholds {
    /// Tombstone-to-total block ratio above which a shard is rewritten.
    pub tombstone_ratio: f64,
    /// Average live block length (bytes) floor; shards below this are
    /// also eligible (many small blocks hurt read locality).
    pub min_avg_block_len: usize,
}

/// Outcome of scanning and possibly rewriting one shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardOutcome {
    /// The shard did not meet either fragmentation threshold.
    Skipped,
    /// The shard was rewritten to a new generation.
    Rewritten,
}

/// Summary of one optimizer pass over a shard directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct OptimizerReport {
    /// Number of shard files examined.
    pub shards_scanned: usize,
    /// Number of shards rewritten this pass.
    pub shards_rewritten: usize,
}

fn average_live_block_len(shard: &Shard) -> usize {
    let mut total_len = 0u64;
    let mut total_count = 0u64;
    for series in shard.index() {
        for block in &series.blocks {
            if !block.is_tombstoned() {
                total_len += block.block_len as u64;
                total_count += 1;
            }
        }
    }
    if total_count == 0 { 0 } else { (total_len / total_count) as usize }
}

fn total_block_count(shard: &Shard) -> usize {
    shard.index().iter().map(|s| s.blocks.len()).sum()
}

/// Whether `shard` crosses either fragmentation threshold.
pub fn needs_optimization(shard: &Shard, thresholds: &OptimizerThresholds) -> bool {
    let total = total_block_count(shard);
    if total == 0 {
        return false;
    }
    let tombstoned = shard.tombstone_count();
    let ratio = tombstoned as f64 / total as f64;
    ratio >= thresholds.tombstone_ratio || average_live_block_len(shard) < thresholds.min_avg_block_len
}

/// Rewrites one shard in place: every live block, across every series, is
/// decoded and re-packed into a fresh file at the same path with
/// `generation + 1`. The source shard's multiset of live points is
/// preserved exactly (spec.md §8 property 5); tombstoned blocks are
/// dropped.
pub fn optimize_shard(path: impl AsRef<Path>, handles: &ShardHandlePool) -> Result<(), OptimizerError> {
    let path = path.as_ref();
    let shard = Shard::open(path)?;
    let header = shard.header().clone();

    let new_header = ShardHeader {
        duration_class: header.duration_class,
        duration_secs: header.duration_secs,
        window_start: header.window_start,
        status: ShardStatus::Active,
        generation: header.generation + 1,
    };

    let mut writer = ShardWriter::create(path, new_header)?;
    for series in shard.index() {
        let blocks = shard.blocks_for(series.series_id, i64::MIN, i64::MAX);
        if blocks.is_empty() {
            continue;
        }
        let mut points = Vec::new();
        for block in blocks {
            points.extend(shard.decode_block(block)?);
        }
        points.sort_by_key(|p| p.ts);
        points.dedup_by_key(|p| p.ts);
        writer.push_all(series.series_id, points)?;
    }
    writer.finish()?;

    // Drop the old handle so the next reader maps the rewritten file,
    // and remove the tombstone sidecar and shard writer's committed-length
    // sidecar — the new generation starts clean.
    handles.evict(shard_id_for(path));
    let _ = fs::remove_file(path.with_extension("tombstones"));
    let _ = fs::remove_file(crate::shard::appender::committed_sidecar_path(path));

    info!(path = %path.display(), generation = header.generation + 1, "shard optimized");
    Ok(())
}

fn shard_id_for(path: &Path) -> u64 {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.parse::<u64>().ok())
        .unwrap_or(0)
}

/// Scans every shard file in `shard_dir` and rewrites those that cross a
/// fragmentation threshold. Shard files are named by their numeric shard
/// id (see [`crate::shard::shard_id`]); any other entry in the directory
/// (tombstone sidecars, `.committed` files, stray `.tmp` files) is
/// ignored.
pub fn run(
    shard_dir: &Path,
    handles: &ShardHandlePool,
    thresholds: &OptimizerThresholds,
) -> Result<OptimizerReport, OptimizerError> {
    let mut report = OptimizerReport::default();
    let entries = match fs::read_dir(shard_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() || path.extension().is_some() {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if file_name.parse::<u64>().is_err() {
            continue;
        }

        let shard = match Shard::open(&path) {
            Ok(shard) => shard,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "optimizer: skipping unreadable shard");
                continue;
            }
        };
        report.shards_scanned += 1;

        if !needs_optimization(&shard, thresholds) {
            continue;
        }
        drop(shard);

        match optimize_shard(&path, handles) {
            Ok(()) => {
                report.shards_rewritten += 1;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "optimizer: rewrite failed, leaving shard as-is");
            }
        }
    }

    debug!(
        scanned = report.shards_scanned,
        rewritten = report.shards_rewritten,
        "optimizer pass complete"
    );
    Ok(report)
}
