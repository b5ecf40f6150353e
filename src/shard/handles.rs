//! Shard file-handle pool.
//!
//! Resolves spec.md §9's open question between the original source's two
//! divergent file-handle designs (`siri/file/handler.h`, an array of
//! pointers indexed by a rotating cursor; `siri/filehandler.h`, a partial
//! `imap64`-keyed map). We implement the richer `file/handler` shape: a
//! small, fixed-capacity pool of open [`Shard`]s keyed by shard id,
//! evicting the least-recently-opened entry when the pool is full.
//!
//! Keeping a bounded number of `Shard`s (each holding an open `mmap`)
//! resident avoids re-opening and re-validating a shard's header/footer on
//! every read, while keeping the process' open-file and mapped-memory
//! footprint predictable under a database with many more shards on disk
//! than fit comfortably in memory at once.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use super::{Shard, ShardError};

/// Default number of concurrently-open shard handles per server.
pub const DEFAULT_CAPACITY: usize = 256;

struct Slot {
    shard: Arc<Shard>,
    last_used: u64,
}

/// A bounded pool of open [`Shard`] handles, keyed by shard id.
pub struct ShardHandlePool {
    dir: PathBuf,
    capacity: usize,
    slots: Mutex<HashMap<u64, Slot>>,
    clock: std::sync::atomic::AtomicU64,
}

impl ShardHandlePool {
    /// Creates a pool rooted at `dir` (the server's `shards/` directory)
    /// with room for `capacity` concurrently-open handles.
    pub fn new<P: AsRef<Path>>(dir: P, capacity: usize) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            capacity: capacity.max(1),
            slots: Mutex::new(HashMap::new()),
            clock: std::sync::atomic::AtomicU64::new(0),
        }
    }

    fn path_for(&self, shard_id: u64) -> PathBuf {
        self.dir.join(shard_id.to_string())
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }

    /// Returns the shard for `shard_id`, opening and caching it if it
    /// isn't already resident. Evicts the least-recently-opened handle
    /// first if the pool is at capacity.
    pub fn get(&self, shard_id: u64) -> Result<Arc<Shard>, ShardError> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = slots.get_mut(&shard_id) {
            slot.last_used = self.tick();
            return Ok(Arc::clone(&slot.shard));
        }
        drop(slots);

        let shard = Arc::new(Shard::open(self.path_for(shard_id))?);

        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if slots.len() >= self.capacity && !slots.contains_key(&shard_id) {
            if let Some(evict_id) = slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(id, _)| *id)
            {
                slots.remove(&evict_id);
            }
        }
        slots.insert(
            shard_id,
            Slot {
                shard: Arc::clone(&shard),
                last_used: self.tick(),
            },
        );
        Ok(shard)
    }

    /// Forces eviction of a cached handle, e.g. after the optimizer
    /// supersedes a shard and writers want the next reader to pick up the
    /// new generation from disk.
    pub fn evict(&self, shard_id: u64) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.remove(&shard_id);
    }

    /// Number of handles currently resident.
    pub fn resident_count(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
