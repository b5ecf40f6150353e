//! Initsync and reindex: the two catalog-walking replication drivers
//! (spec.md §4.8).
//!
//! Steady-state replication is just [`crate::fifo::Fifo`] draining
//! packages appended as writes land. Initsync and reindex instead need
//! to walk the *entire* catalog once — initsync to bring a freshly
//! joined pool member up to date, reindex to migrate a series to a new
//! owning pool after [`crate::lookup::Lookup::rebuild`] — so each gets
//! its own driver here that streams one series' worth of data per
//! [`Initsync::step`]/[`Reindex::step`] call through the same
//! [`crate::wire::Package`] framing the FIFO uses.
//!
//! Progress is a single `next_series_id` cursor, persisted to a sidecar
//! file the same tmp-then-rename way [`crate::fifo`]'s read cursor and
//! [`crate::catalog::Catalog`]'s snapshot are, so a crash resumes the
//! walk from the last fully-streamed series rather than restarting it.
//!
//! # State machine
//!
//! Both drivers share [`TaskState`]: `Idle -> Running -> {Paused ->
//! Running} -> Done`, with `Error` reachable from `Running` on an
//! unexpected local failure (a `Paused` task resumes once its caller
//! calls `start` again having seen the condition clear — peer
//! reachability, or the replica FIFO draining back under its soft cap;
//! an `Error`'d one needs an explicit
//! [`Initsync::resume`]/[`Reindex::resume`] call, spec.md §4.8). Each
//! `step` also takes the replica FIFO's current size against its
//! configured soft cap and pauses rather than streaming further if it's
//! past that cap (spec.md §5 backpressure).
//!
//! Sending a batch is abstracted behind [`ReplicaSink`] rather than any
//! concrete transport — the actual peer connection and acknowledgement
//! protocol are commodity networking components outside this crate's
//! scope; a sink only needs to report whether the peer accepted the
//! batch or is currently unreachable.

#[cfg(test)]
mod tests;

use std::{
    fs,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::buffer::{Buffer, BufferError};
use crate::catalog::{Catalog, CatalogError, Series, SeriesType};
use crate::encoding::{Decode, Encode, EncodingError};
use crate::lookup::Lookup;
use crate::shard::handles::ShardHandlePool;
use crate::shard::{Point, PointValue, ShardError};
use crate::wire::Package;

/// Package type carrying one series' initsync/reindex batch.
pub const TP_REPLICATION_BATCH: u8 = 0x10;

/// Errors returned by replication drivers.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// Underlying I/O error (cursor persistence).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding/decoding error building a batch.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Underlying shard I/O failure.
    #[error("shard error: {0}")]
    Shard(#[from] ShardError),

    /// Underlying buffer failure.
    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// Underlying catalog failure.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// `step` was called on a task that isn't `Running`.
    #[error("task is not running (state: {0:?})")]
    NotRunning(TaskState),
}

/// Lifecycle state of an initsync or reindex task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Not yet started.
    Idle,
    /// Actively walking the catalog.
    Running,
    /// The peer is unreachable; `step` is a no-op until `start`/`resume`.
    Paused,
    /// Every series has been walked.
    Done,
    /// An unexpected local failure stopped the walk; requires `resume`.
    Error,
}

/// Outcome of one driver `step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// One series was streamed; more may remain.
    Sent(u64),
    /// Nothing to do right now (e.g. the series at the cursor had no
    /// data, or the walk is already `Done`/`Paused`).
    Idle,
    /// The peer reported it is unreachable; the task paused.
    Paused,
}

/// What a driver does with one series' worth of data.
pub trait ReplicaSink {
    /// Sends `pkg` to the peer. `Ok(true)` means accepted, `Ok(false)`
    /// means the peer is unreachable right now (the caller pauses and
    /// retries later); `Err` is an unexpected local failure.
    fn send(&mut self, pkg: Package) -> Result<bool, ReplicationError>;
}

/// One series' committed points plus enough metadata for the receiver to
/// recreate it if it doesn't already exist locally.
#[derive(Debug, Clone)]
struct ReplicationBatch {
    series_id: u64,
    name: String,
    series_type: SeriesType,
    duration_class: u8,
    points: Vec<Point>,
}

impl Encode for ReplicationBatch {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.series_id.encode_to(buf)?;
        self.name.encode_to(buf)?;
        self.series_type.encode_to(buf)?;
        self.duration_class.encode_to(buf)?;
        (self.points.len() as u32).encode_to(buf)?;
        for point in &self.points {
            point.ts.encode_to(buf)?;
            match &point.value {
                PointValue::Integer(v) => {
                    0u8.encode_to(buf)?;
                    v.encode_to(buf)?;
                }
                PointValue::Float(v) => {
                    1u8.encode_to(buf)?;
                    v.to_bits().encode_to(buf)?;
                }
                PointValue::String(s) => {
                    2u8.encode_to(buf)?;
                    s.encode_to(buf)?;
                }
            }
        }
        Ok(())
    }
}

impl Decode for ReplicationBatch {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (series_id, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (name, n) = String::decode_from(&buf[offset..])?;
        offset += n;
        let (series_type, n) = SeriesType::decode_from(&buf[offset..])?;
        offset += n;
        let (duration_class, n) = u8::decode_from(&buf[offset..])?;
        offset += n;
        let (count, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let mut points = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (ts, n) = i64::decode_from(&buf[offset..])?;
            offset += n;
            let (tag, n) = u8::decode_from(&buf[offset..])?;
            offset += n;
            let value = match tag {
                0 => {
                    let (v, n) = i64::decode_from(&buf[offset..])?;
                    offset += n;
                    PointValue::Integer(v)
                }
                1 => {
                    let (bits, n) = u64::decode_from(&buf[offset..])?;
                    offset += n;
                    PointValue::Float(f64::from_bits(bits))
                }
                2 => {
                    let (s, n) = String::decode_from(&buf[offset..])?;
                    offset += n;
                    PointValue::String(s)
                }
                other => {
                    return Err(EncodingError::InvalidTag { tag: other as u32, type_name: "ReplicationPointTag" });
                }
            };
            points.push(Point { ts, value });
        }
        Ok((Self { series_id, name, series_type, duration_class, points }, offset))
    }
}

/// Persisted walk progress: the id of the next series to consider, and
/// the state the task was in when last persisted.
struct Progress {
    path: PathBuf,
    next_series_id: u64,
    state: TaskState,
}

fn state_tag(state: TaskState) -> u8 {
    match state {
        TaskState::Idle => 0,
        TaskState::Running => 1,
        TaskState::Paused => 2,
        TaskState::Done => 3,
        TaskState::Error => 4,
    }
}

fn state_from_tag(tag: u8) -> TaskState {
    match tag {
        1 => TaskState::Running,
        2 => TaskState::Paused,
        3 => TaskState::Done,
        4 => TaskState::Error,
        _ => TaskState::Idle,
    }
}

impl Progress {
    fn load(path: PathBuf) -> Result<Self, ReplicationError> {
        match fs::read(&path) {
            Ok(bytes) if bytes.len() == 9 => {
                let next_series_id = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
                let state = state_from_tag(bytes[8]);
                Ok(Self { path, next_series_id, state })
            }
            Ok(_) | Err(_) => Ok(Self { path, next_series_id: 0, state: TaskState::Idle }),
        }
    }

    fn persist(&self) -> Result<(), ReplicationError> {
        let mut bytes = Vec::with_capacity(9);
        bytes.extend_from_slice(&self.next_series_id.to_le_bytes());
        bytes.push(state_tag(self.state));
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Collects one series' buffered-plus-committed points, building the
/// batch a driver streams for it.
fn collect_batch(
    series: &Series,
    buffer: &Buffer,
    handles: &ShardHandlePool,
) -> Result<ReplicationBatch, ReplicationError> {
    let mut points = Vec::new();
    for &shard_id in &series.shard_ids {
        let shard = handles.get(shard_id)?;
        points.extend(shard.scan(series.id, i64::MIN, i64::MAX)?);
    }
    points.extend(buffer.peek(series.id));
    points.sort_by_key(|p| p.ts);
    points.dedup_by_key(|p| p.ts);
    Ok(ReplicationBatch {
        series_id: series.id,
        name: series.name.clone(),
        series_type: series.series_type,
        duration_class: series.duration_class,
        points,
    })
}

fn batch_to_package(batch: &ReplicationBatch, pid: u16) -> Result<Package, ReplicationError> {
    let mut body = Vec::new();
    batch.encode_to(&mut body)?;
    Ok(Package::new(pid, TP_REPLICATION_BATCH, body))
}

/// Streams every known series to a newly joined (or resyncing) peer, in
/// series-id order, resuming from the last series it didn't confirm
/// streaming before a restart.
pub struct Initsync {
    progress: Progress,
    next_pid: u16,
}

impl Initsync {
    /// Opens (or resumes) an initsync walk, persisting its cursor under
    /// `state_dir/initsync-cursor`.
    pub fn open(state_dir: impl AsRef<Path>) -> Result<Self, ReplicationError> {
        fs::create_dir_all(&state_dir)?;
        let progress = Progress::load(state_dir.as_ref().join("initsync-cursor"))?;
        Ok(Self { progress, next_pid: 0 })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        self.progress.state
    }

    /// Starts (or restarts) the walk from `Idle`, `Paused`, or `Done`.
    pub fn start(&mut self) -> Result<(), ReplicationError> {
        self.progress.state = TaskState::Running;
        self.progress.persist()
    }

    /// Leaves `Error` and resumes from the last persisted cursor.
    pub fn resume(&mut self) -> Result<(), ReplicationError> {
        if self.progress.state != TaskState::Error {
            return Err(ReplicationError::NotRunning(self.progress.state));
        }
        self.progress.state = TaskState::Running;
        self.progress.persist()
    }

    /// Streams the next eligible series, if any. Advances and persists
    /// the cursor only once the sink confirms the batch was accepted.
    ///
    /// `fifo_total_bytes`/`fifo_soft_cap_bytes` let the caller pass in the
    /// replica FIFO's current size against its configured soft cap
    /// (spec.md §5 backpressure): once the FIFO is past the soft cap, this
    /// pauses rather than streaming more data the replica can't drain yet.
    /// Writes keep landing in the FIFO regardless — only this walk pauses.
    pub fn step(
        &mut self,
        catalog: &Catalog,
        buffer: &Buffer,
        handles: &ShardHandlePool,
        sink: &mut dyn ReplicaSink,
        fifo_total_bytes: u64,
        fifo_soft_cap_bytes: u64,
    ) -> Result<StepOutcome, ReplicationError> {
        if self.progress.state != TaskState::Running {
            return Ok(StepOutcome::Idle);
        }
        if fifo_total_bytes >= fifo_soft_cap_bytes {
            self.progress.state = TaskState::Paused;
            self.progress.persist()?;
            warn!(fifo_total_bytes, fifo_soft_cap_bytes, "initsync: replica fifo past soft cap, pausing");
            return Ok(StepOutcome::Paused);
        }

        let series = catalog
            .all_sorted_by_id()
            .into_iter()
            .find(|s| s.id >= self.progress.next_series_id);

        let Some(series) = series else {
            self.progress.state = TaskState::Done;
            self.progress.persist()?;
            info!("initsync: walk complete");
            return Ok(StepOutcome::Idle);
        };

        let result = self.send_series(&series, buffer, handles, sink);
        match result {
            Ok(StepOutcome::Sent(id)) => {
                self.progress.next_series_id = series.id + 1;
                self.progress.persist()?;
                Ok(StepOutcome::Sent(id))
            }
            Ok(StepOutcome::Paused) => {
                self.progress.state = TaskState::Paused;
                self.progress.persist()?;
                warn!(series_id = series.id, "initsync: peer unreachable, pausing");
                Ok(StepOutcome::Paused)
            }
            Ok(StepOutcome::Idle) => {
                self.progress.next_series_id = series.id + 1;
                self.progress.persist()?;
                Ok(StepOutcome::Idle)
            }
            Err(err) => {
                self.progress.state = TaskState::Error;
                self.progress.persist()?;
                warn!(series_id = series.id, %err, "initsync: unexpected failure, entering error state");
                Err(err)
            }
        }
    }

    fn send_series(
        &mut self,
        series: &Series,
        buffer: &Buffer,
        handles: &ShardHandlePool,
        sink: &mut dyn ReplicaSink,
    ) -> Result<StepOutcome, ReplicationError> {
        let batch = collect_batch(series, buffer, handles)?;
        if batch.points.is_empty() {
            return Ok(StepOutcome::Idle);
        }
        let pkg = batch_to_package(&batch, self.next_pid)?;
        self.next_pid = self.next_pid.wrapping_add(1);
        if sink.send(pkg)? {
            debug!(series_id = series.id, points = batch.points.len(), "initsync: streamed series");
            Ok(StepOutcome::Sent(series.id))
        } else {
            Ok(StepOutcome::Paused)
        }
    }
}

/// Encodes a single freshly-inserted point as a one-record batch package,
/// the same framing [`Initsync`]/[`Reindex`] use for a full series, so a
/// peer's receiving end never needs to distinguish a steady-state write
/// from a resync one. This is the wire unit the server appends to a
/// peer's [`crate::fifo::Fifo`] for steady-state replication (spec.md
/// §4.7's "steady-state replication is just Fifo draining packages as
/// writes land").
pub fn encode_write(series: &Series, point: Point, pid: u16) -> Result<Package, ReplicationError> {
    let batch = ReplicationBatch {
        series_id: series.id,
        name: series.name.clone(),
        series_type: series.series_type,
        duration_class: series.duration_class,
        points: vec![point],
    };
    batch_to_package(&batch, pid)
}

/// Migrates locally-owned series whose [`Lookup::resolve`] now points to
/// a different pool, streaming each to its new owner and dropping the
/// local copy once the peer has accepted it.
pub struct Reindex {
    progress: Progress,
    next_pid: u16,
}

impl Reindex {
    /// Opens (or resumes) a reindex walk, persisting its cursor under
    /// `state_dir/reindex-cursor`.
    pub fn open(state_dir: impl AsRef<Path>) -> Result<Self, ReplicationError> {
        fs::create_dir_all(&state_dir)?;
        let progress = Progress::load(state_dir.as_ref().join("reindex-cursor"))?;
        Ok(Self { progress, next_pid: 0 })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        self.progress.state
    }

    /// Starts (or restarts) the walk, typically right after
    /// [`Lookup::rebuild`] changes pool ownership.
    pub fn start(&mut self) -> Result<(), ReplicationError> {
        self.progress.state = TaskState::Running;
        self.progress.persist()
    }

    /// Leaves `Error` and resumes from the last persisted cursor.
    pub fn resume(&mut self) -> Result<(), ReplicationError> {
        if self.progress.state != TaskState::Error {
            return Err(ReplicationError::NotRunning(self.progress.state));
        }
        self.progress.state = TaskState::Running;
        self.progress.persist()
    }

    /// Finds the next locally-owned series whose current hash no longer
    /// resolves to `local_pool_id`, streams it to its new owner, drops
    /// the local copy, and advances the cursor past it. Series that are
    /// still correctly routed are skipped without pausing the walk.
    ///
    /// `fifo_total_bytes`/`fifo_soft_cap_bytes` apply the same FIFO
    /// soft-cap backpressure [`Initsync::step`] does, pausing the migration
    /// walk rather than piling more data onto a replica that is already
    /// behind.
    pub fn step(
        &mut self,
        catalog: &Catalog,
        lookup: &Lookup,
        local_pool_id: u16,
        buffer: &Buffer,
        handles: &ShardHandlePool,
        sink: &mut dyn ReplicaSink,
        fifo_total_bytes: u64,
        fifo_soft_cap_bytes: u64,
    ) -> Result<StepOutcome, ReplicationError> {
        if self.progress.state != TaskState::Running {
            return Ok(StepOutcome::Idle);
        }
        if fifo_total_bytes >= fifo_soft_cap_bytes {
            self.progress.state = TaskState::Paused;
            self.progress.persist()?;
            warn!(fifo_total_bytes, fifo_soft_cap_bytes, "reindex: replica fifo past soft cap, pausing");
            return Ok(StepOutcome::Paused);
        }

        let candidates = catalog.all_sorted_by_id();
        let mut scanned_to_end = true;
        for series in candidates.into_iter().filter(|s| s.id >= self.progress.next_series_id) {
            if series.pool_id != local_pool_id || lookup.resolve(&series.name) as u16 == local_pool_id {
                self.progress.next_series_id = series.id + 1;
                continue;
            }
            scanned_to_end = false;
            let result = self.migrate_series(catalog, &series, buffer, handles, sink);
            match result {
                Ok(StepOutcome::Sent(id)) => {
                    self.progress.next_series_id = series.id + 1;
                    self.progress.persist()?;
                    return Ok(StepOutcome::Sent(id));
                }
                Ok(StepOutcome::Paused) => {
                    self.progress.state = TaskState::Paused;
                    self.progress.persist()?;
                    warn!(series_id = series.id, "reindex: peer unreachable, pausing");
                    return Ok(StepOutcome::Paused);
                }
                Ok(StepOutcome::Idle) => {
                    self.progress.next_series_id = series.id + 1;
                    self.progress.persist()?;
                    return Ok(StepOutcome::Idle);
                }
                Err(err) => {
                    self.progress.state = TaskState::Error;
                    self.progress.persist()?;
                    warn!(series_id = series.id, %err, "reindex: unexpected failure, entering error state");
                    return Err(err);
                }
            }
        }

        if scanned_to_end {
            self.progress.state = TaskState::Done;
            self.progress.persist()?;
            info!("reindex: walk complete, nothing left to migrate");
        } else {
            self.progress.persist()?;
        }
        Ok(StepOutcome::Idle)
    }

    fn migrate_series(
        &mut self,
        catalog: &Catalog,
        series: &Series,
        buffer: &Buffer,
        handles: &ShardHandlePool,
        sink: &mut dyn ReplicaSink,
    ) -> Result<StepOutcome, ReplicationError> {
        let batch = collect_batch(series, buffer, handles)?;
        let pkg = batch_to_package(&batch, self.next_pid)?;
        self.next_pid = self.next_pid.wrapping_add(1);
        if !sink.send(pkg)? {
            return Ok(StepOutcome::Paused);
        }
        catalog.drop_series(series.id)?;
        info!(series_id = series.id, "reindex: migrated series to new owner, dropped local copy");
        Ok(StepOutcome::Sent(series.id))
    }
}
