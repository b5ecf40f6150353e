//! Server facade (spec.md §2, §4.10, §5).
//!
//! [`Database`] is the single entry point a network handler or test
//! harness drives: it wires together the series catalog, write buffer,
//! shard handle pool, pool lookup table, per-peer replication FIFOs, and
//! the initsync/reindex drivers, the way the teacher's `Engine` wires
//! together a manifest, memtables, and SSTables behind one handle. Each
//! component keeps its own internal locking (catalog: lock-free read
//! path with a single writer lock; buffer: one mutex; shard handles:
//! LRU-capped pool) rather than one big lock around everything, matching
//! spec.md §5's "shared resources" model.
//!
//! Network I/O, the query grammar/parser, and the actual peer connection
//! used by replication are external collaborators outside this crate's
//! scope (spec.md §1); this module exposes the operations those
//! collaborators would call.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{info, warn};

use crate::buffer::{self, Buffer, BufferError};
use crate::catalog::{Catalog, CatalogError, SeriesType};
use crate::config::{ConfigError, DbConfig};
use crate::fifo::{AppendOutcome, Fifo, FifoError};
use crate::lookup::{Lookup, LookupError};
use crate::optimizer::{self, OptimizerError, OptimizerReport, OptimizerThresholds};
use crate::query::{self, LocalExecutor, PoolTable, Query, QueryError};
use crate::replication::{self, Initsync, Reindex, ReplicationError, TaskState};
use crate::shard::handles::ShardHandlePool;
use crate::shard::Point;
use std::collections::BTreeMap;

const LOCK_FILENAME: &str = ".lock";
const CATALOG_DIR: &str = "database.dat";
const BUFFER_DIR: &str = "buffer";
const SHARD_DIR: &str = "shards";
const FIFO_DIR: &str = "fifo";
const REPLICATION_STATE_DIR: &str = "replication";

/// Errors raised opening or operating a [`Database`].
#[derive(Debug, Error)]
pub enum ServerError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The config failed validation.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Underlying catalog failure.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Underlying buffer failure.
    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// Underlying lookup table failure.
    #[error("lookup error: {0}")]
    Lookup(#[from] LookupError),

    /// Underlying query failure.
    #[error("query error: {0}")]
    Query(#[from] QueryError),

    /// Underlying optimizer failure.
    #[error("optimizer error: {0}")]
    Optimizer(#[from] OptimizerError),

    /// Underlying replication driver failure.
    #[error("replication error: {0}")]
    Replication(#[from] ReplicationError),

    /// Underlying FIFO failure.
    #[error("fifo error: {0}")]
    Fifo(#[from] FifoError),

    /// A replica FIFO's hard cap was exceeded (spec.md §7 `replication-saturated`).
    #[error("replication-saturated: fifo for peer {0} is at its hard cap")]
    ReplicationSaturated(u16),

    /// Another process already holds this database's `.lock` file.
    #[error("database already locked by another process: {0}")]
    AlreadyLocked(PathBuf),
}

/// Where an inserted point ended up (spec.md §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// This server owns the series' pool. `buffered` is `true` if the
    /// series' buffer page just reached capacity and should be flushed
    /// soon.
    Local { buffered: bool },
    /// A different pool owns this series; the caller (network layer)
    /// must forward the write there.
    Remote(u16),
}

/// Point-in-time counters mirroring the teacher's `EngineStats`
/// (spec.md §10 supplemental "introspection" feature).
#[derive(Debug, Clone, Default)]
pub struct DatabaseStats {
    pub series_count: usize,
    pub shard_handles_resident: usize,
    pub fifo_peer_count: usize,
    pub initsync_state: Option<TaskState>,
    pub reindex_state: Option<TaskState>,
}

struct LockGuard(PathBuf);

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.0);
    }
}

/// A single server's slice of a SiriDB cluster: one pool member, holding
/// the series it owns plus whatever a reindex has transiently handed it.
pub struct Database {
    dir: PathBuf,
    config: DbConfig,
    catalog: Catalog,
    buffer: Buffer,
    handles: ShardHandlePool,
    lookup: Lookup,
    pools: PoolTable,
    fifos: Mutex<HashMap<u16, Fifo>>,
    initsync: Mutex<Initsync>,
    reindex: Mutex<Reindex>,
    write_pid: AtomicU16,
    _lock: LockGuard,
}

impl Database {
    /// Opens (or creates) a database rooted at `dir`, taking the process
    /// lock (spec.md §6 on-disk layout's `.lock`).
    pub fn open(dir: impl AsRef<Path>, config: DbConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let lock_path = dir.join(LOCK_FILENAME);
        File::options().write(true).create_new(true).open(&lock_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                ServerError::AlreadyLocked(lock_path.clone())
            } else {
                ServerError::Io(e)
            }
        })?;

        let catalog = Catalog::open(dir.join(CATALOG_DIR))?;
        let buffer = Buffer::open(dir.join(BUFFER_DIR), config.buffer_page_capacity)?;
        let shard_dir = dir.join(SHARD_DIR);
        fs::create_dir_all(&shard_dir)?;
        let handles = ShardHandlePool::new(&shard_dir, config.shard_handle_capacity);
        let lookup = Lookup::new(config.initial_pool_count)?;

        let replication_dir = dir.join(REPLICATION_STATE_DIR);
        fs::create_dir_all(&replication_dir)?;
        let initsync = Initsync::open(replication_dir.join("initsync"))?;
        let reindex = Reindex::open(replication_dir.join("reindex"))?;

        info!(dir = %dir.display(), local_pool_id = config.local_pool_id, "database opened");

        Ok(Self {
            dir,
            config,
            catalog,
            buffer,
            handles,
            lookup,
            pools: PoolTable::new(),
            fifos: Mutex::new(HashMap::new()),
            initsync: Mutex::new(initsync),
            reindex: Mutex::new(reindex),
            write_pid: AtomicU16::new(0),
            _lock: LockGuard(lock_path),
        })
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn handles(&self) -> &ShardHandlePool {
        &self.handles
    }

    pub fn lookup(&self) -> &Lookup {
        &self.lookup
    }

    pub fn pools(&self) -> &PoolTable {
        &self.pools
    }

    fn local_pool_id(&self) -> u16 {
        self.config.local_pool_id
    }

    fn shard_dir(&self) -> PathBuf {
        self.dir.join(SHARD_DIR)
    }

    fn with_fifo<R>(
        &self,
        peer_id: u16,
        f: impl FnOnce(&mut Fifo) -> Result<R, FifoError>,
    ) -> Result<R, ServerError> {
        let mut fifos = self.fifos.lock().unwrap_or_else(|e| e.into_inner());
        if !fifos.contains_key(&peer_id) {
            let dir = self.dir.join(FIFO_DIR).join(peer_id.to_string());
            let fifo = Fifo::open(dir, self.config.fifo_segment_cap_bytes, self.config.fifo_hard_cap_bytes)?;
            fifos.insert(peer_id, fifo);
        }
        let fifo = fifos.get_mut(&peer_id).expect("just inserted above");
        Ok(f(fifo)?)
    }

    /// Inserts one point (spec.md §4.10): if this server owns the
    /// series' pool it is buffered (creating the series on first write)
    /// and, if this pool has a replica peer, queued to that peer's FIFO;
    /// otherwise the caller learns which pool actually owns it.
    pub fn insert(&self, series_name: &str, point: Point) -> Result<InsertOutcome, ServerError> {
        let owner = self.lookup.resolve(series_name) as u16;
        if owner != self.local_pool_id() {
            return Ok(InsertOutcome::Remote(owner));
        }

        let series_type = SeriesType::from(point.value.point_type());
        let series_id = self.catalog.get_or_create(
            series_name,
            series_type,
            self.config.default_duration_class,
            self.local_pool_id(),
        )?;
        let buffered = self.buffer.insert(series_id, point.clone())?;

        if let Some(peer_id) = self.config.replica_peer_id {
            let series =
                self.catalog.get(series_id).ok_or_else(|| CatalogError::NotFound(series_name.to_string()))?;
            let pid = self.write_pid.fetch_add(1, Ordering::Relaxed);
            let pkg = replication::encode_write(&series, point, pid)?;
            match self.with_fifo(peer_id, |fifo| fifo.append(&pkg))? {
                AppendOutcome::Ok => {}
                AppendOutcome::NoFreeSpace => {
                    warn!(series = series_name, peer_id, "replication-saturated: fifo hard cap exceeded");
                    return Err(ServerError::ReplicationSaturated(peer_id));
                }
            }
        }

        Ok(InsertOutcome::Local { buffered })
    }

    /// Runs the query's local portion against this server's own data
    /// (spec.md §4.9 steps 1, 3, 4). Fanning the query out to remote
    /// pools and merging their results back in via
    /// [`query::merge_results`] is the network layer's job.
    pub fn query_local(&self, query: &Query) -> Result<BTreeMap<String, Vec<Point>>, ServerError> {
        let executor = LocalExecutor::new(&self.catalog, &self.buffer, &self.handles);
        Ok(executor.execute(query)?)
    }

    /// Like [`Self::query_local`], but keeps each point tagged with its
    /// generation and this pool's id, the form [`query::merge_results`]
    /// needs to apply spec.md §4.9's cross-pool tie-break once a remote
    /// pool's tagged results are available too.
    pub fn query_local_tagged(&self, query: &Query) -> Result<BTreeMap<String, Vec<query::TaggedPoint>>, ServerError> {
        let executor = LocalExecutor::new(&self.catalog, &self.buffer, &self.handles);
        Ok(executor.execute_tagged(query, self.local_pool_id())?)
    }

    /// Like [`Self::query_local_tagged`], but enforces `deadline` while
    /// walking the matched series (spec.md §5) and reports whether the
    /// walk was cut short. The network layer ORs this `partial` flag
    /// together with each remote leg's own flag before answering the
    /// query's issuer (spec.md §5 scenario F).
    pub fn query_local_tagged_with_deadline(
        &self,
        query: &Query,
        deadline: &query::Deadline,
    ) -> Result<(BTreeMap<String, Vec<query::TaggedPoint>>, bool), ServerError> {
        let executor = LocalExecutor::new(&self.catalog, &self.buffer, &self.handles);
        Ok(executor.execute_tagged_with_deadline(query, self.local_pool_id(), deadline)?)
    }

    /// Which remote pools a query must additionally be sent to.
    pub fn plan_fanout(&self, query: &Query) -> Vec<u16> {
        query::plan_fanout(&query.selector, &self.lookup, self.local_pool_id(), &self.pools)
    }

    /// Runs one buffersync pass, flushing every series currently holding
    /// buffered points to its shard(s) (spec.md §4.4).
    pub fn run_buffersync(&self) -> Result<buffer::sync::SyncReport, ServerError> {
        let shard_dir = self.shard_dir();
        Ok(buffer::sync::run(&self.buffer, &self.catalog, &self.handles, &shard_dir, &self.config.shard_durations_secs)?)
    }

    /// Runs one optimizer pass over this server's shard directory
    /// (spec.md §4.6).
    pub fn run_optimizer(&self) -> Result<OptimizerReport, ServerError> {
        let thresholds = OptimizerThresholds {
            tombstone_ratio: self.config.optimizer_tombstone_ratio,
            min_avg_block_len: self.config.optimizer_min_avg_block_len,
        };
        let shard_dir = self.shard_dir();
        Ok(optimizer::run(&shard_dir, &self.handles, &thresholds)?)
    }

    /// Current size of this pool's replica FIFO, if it has one, against
    /// which initsync/reindex apply spec.md §5's soft-cap backpressure.
    /// A pool with no replica peer has nothing to pause for.
    fn replica_fifo_bytes(&self) -> Result<u64, ServerError> {
        match self.config.replica_peer_id {
            Some(peer_id) => Ok(self.with_fifo(peer_id, |fifo| fifo.total_bytes())?),
            None => Ok(0),
        }
    }

    /// Starts (or resumes) initial sync to a freshly joined peer, then
    /// runs one step of it. Pauses instead of streaming further if this
    /// pool's replica FIFO is already past its configured soft cap
    /// (spec.md §5 backpressure).
    pub fn step_initsync(&self, sink: &mut dyn replication::ReplicaSink) -> Result<replication::StepOutcome, ServerError> {
        let mut initsync = self.initsync.lock().unwrap_or_else(|e| e.into_inner());
        if initsync.state() == TaskState::Idle {
            initsync.start()?;
        }
        let fifo_bytes = self.replica_fifo_bytes()?;
        Ok(initsync.step(&self.catalog, &self.buffer, &self.handles, sink, fifo_bytes, self.config.fifo_soft_cap_bytes)?)
    }

    /// Runs one step of reindex after [`Lookup::rebuild`] changed which
    /// pool owns which series. Subject to the same FIFO soft-cap
    /// backpressure as [`Self::step_initsync`].
    pub fn step_reindex(&self, sink: &mut dyn replication::ReplicaSink) -> Result<replication::StepOutcome, ServerError> {
        let mut reindex = self.reindex.lock().unwrap_or_else(|e| e.into_inner());
        if reindex.state() == TaskState::Idle {
            reindex.start()?;
        }
        let fifo_bytes = self.replica_fifo_bytes()?;
        Ok(reindex.step(
            &self.catalog,
            &self.lookup,
            self.local_pool_id(),
            &self.buffer,
            &self.handles,
            sink,
            fifo_bytes,
            self.config.fifo_soft_cap_bytes,
        )?)
    }

    /// Snapshot of server-wide counters (spec.md §10 supplemental
    /// introspection feature), mirroring the teacher's `Engine::stats`.
    pub fn stats(&self) -> DatabaseStats {
        let fifo_peer_count = self.fifos.lock().unwrap_or_else(|e| e.into_inner()).len();
        DatabaseStats {
            series_count: self.catalog.len(),
            shard_handles_resident: self.handles.resident_count(),
            fifo_peer_count,
            initsync_state: Some(self.initsync.lock().unwrap_or_else(|e| e.into_inner()).state()),
            reindex_state: Some(self.reindex.lock().unwrap_or_else(|e| e.into_inner()).state()),
        }
    }

    /// Checkpoints the catalog's event log to a fresh snapshot. Called
    /// periodically and on graceful shutdown.
    pub fn checkpoint(&self) -> Result<(), ServerError> {
        Ok(self.catalog.checkpoint()?)
    }

    /// Gracefully shuts down: flushes every buffered point to its
    /// shard(s) and checkpoints the catalog. The process lock itself is
    /// released when this `Database` is dropped.
    pub fn close(&self) -> Result<(), ServerError> {
        self.run_buffersync()?;
        self.checkpoint()?;
        Ok(())
    }
}
