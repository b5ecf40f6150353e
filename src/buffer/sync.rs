//! The buffersync task (spec.md §4.4).
//!
//! Runs periodically (and should also be triggered whenever
//! [`super::Buffer::insert`] reports a full page). For every series with
//! pending data it sorts the page, groups points by shard window,
//! appends one block per `(series, window)` via
//! [`crate::shard::appender::ShardAppender`], records the new residency
//! and stats in the catalog, then clears the buffer.

use std::{collections::BTreeMap, path::Path};

use tracing::{debug, warn};

use crate::catalog::Catalog;
use crate::shard::handles::ShardHandlePool;
use crate::shard::{self, Point, ShardAppender, ShardHeader, ShardStatus};

use super::{Buffer, BufferError};

/// Outcome of one buffersync pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyncReport {
    /// Number of series flushed.
    pub series_flushed: usize,
    /// Number of points flushed across all series.
    pub points_flushed: usize,
    /// Number of blocks appended across all shards touched.
    pub blocks_appended: usize,
}

/// Looks up the duration (seconds) for a duration class, clamping to the
/// last configured class if the index is stale (e.g. config shrunk).
fn duration_secs_for(durations: &[u32], duration_class: u8) -> u32 {
    durations
        .get(duration_class as usize)
        .copied()
        .unwrap_or_else(|| *durations.last().unwrap_or(&3600))
}

/// Flushes one series' drained points to their shard windows and records
/// the new residency and stats in the catalog.
fn flush_series(
    catalog: &Catalog,
    handles: &ShardHandlePool,
    shard_dir: &Path,
    durations: &[u32],
    series_id: u64,
    points: Vec<Point>,
    report: &mut SyncReport,
) -> Result<(), BufferError> {
    let Some(series) = catalog.get(series_id) else {
        warn!(series_id, "buffersync: series missing from catalog, skipping");
        return Ok(());
    };

    let duration_secs = duration_secs_for(durations, series.duration_class);
    let mut by_window: BTreeMap<i64, Vec<Point>> = BTreeMap::new();
    for point in points {
        let window = shard::window_start(point.ts, duration_secs);
        by_window.entry(window).or_default().push(point);
    }

    let mut flushed_any = false;
    for (window_start, mut window_points) in by_window {
        window_points.sort_by_key(|p| p.ts);
        let point_type = window_points[0].value.point_type();
        let shard_id = shard::shard_id(series.duration_class, window_start);
        let shard_path = shard_dir.join(shard_id.to_string());

        let header = ShardHeader {
            duration_class: series.duration_class,
            duration_secs,
            window_start,
            status: ShardStatus::Active,
            generation: 0,
        };
        let mut appender = ShardAppender::open_or_create(&shard_path, header)?;
        let first_ts = window_points[0].ts;
        let last_ts = window_points[window_points.len() - 1].ts;
        let count = window_points.len();
        appender.append_block(series_id, &window_points, point_type)?;
        appender.commit()?;
        handles.evict(shard_id);

        catalog
            .record_shard(series_id, shard_id)
            .map_err(|e| BufferError::Internal(format!("catalog record_shard failed: {e}")))?;
        catalog
            .update_stats(series_id, count as u64, first_ts, last_ts)
            .map_err(|e| BufferError::Internal(format!("catalog update_stats failed: {e}")))?;

        report.blocks_appended += 1;
        report.points_flushed += count;
        flushed_any = true;
    }

    if flushed_any {
        report.series_flushed += 1;
    }
    Ok(())
}

/// Runs one full buffersync pass: every series currently holding
/// buffered points is flushed to its shard(s) and the buffer is cleared.
///
/// `shard_dir` is the server's `shards/` directory; `durations` is
/// indexed by duration class (see [`crate::config::DbConfig::shard_durations_secs`]).
///
/// The whole pending set is drained from the buffer up front so the
/// drain and the journal truncation stay one atomic step (see
/// [`Buffer::drain_all`]). If a shard write fails partway through, every
/// series not yet durably flushed — including the one that failed — is
/// re-inserted into the buffer before the error is returned, so nothing
/// drained is ever lost even though it leaves the buffer rather than
/// clearing it outright.
pub fn run(
    buffer: &Buffer,
    catalog: &Catalog,
    handles: &ShardHandlePool,
    shard_dir: &Path,
    durations: &[u32],
) -> Result<SyncReport, BufferError> {
    let mut report = SyncReport::default();
    let mut drained: Vec<(u64, Vec<Point>)> = buffer.drain_all()?.into_iter().collect();

    while let Some((series_id, points)) = drained.pop() {
        if points.is_empty() {
            continue;
        }
        if let Err(err) =
            flush_series(catalog, handles, shard_dir, durations, series_id, points.clone(), &mut report)
        {
            warn!(series_id, %err, "buffersync: flush failed, re-buffering pending points");
            for (sid, pending) in drained {
                for point in pending {
                    buffer.insert(sid, point)?;
                }
            }
            for point in points {
                buffer.insert(series_id, point)?;
            }
            return Err(err);
        }
    }

    if report.series_flushed > 0 {
        debug!(
            series = report.series_flushed,
            points = report.points_flushed,
            blocks = report.blocks_appended,
            "buffersync complete"
        );
    }

    Ok(report)
}
