//! Pool lookup table.
//!
//! Maps a series name deterministically to one of the cluster's pools via a
//! fixed-size slot table, the same scheme the original SiriDB server uses:
//! a series always hashes into one of [`NUM_SLOTS`] slots, and each slot
//! holds the index of the pool currently responsible for it. Growing the
//! pool count reshuffles the table in place so that, on average, only the
//! slots that must move do.
//!
//! # Concurrency
//!
//! Readers never block. The table is held behind an `arc-swap`-style
//! pointer: [`Lookup::resolve`] takes a snapshot `Arc` and looks up the
//! slot without any lock, while [`Lookup::rebuild`] builds a brand new
//! table and swaps the pointer once it is complete.

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crc32fast::Hasher as Crc32;
use thiserror::Error;

/// Number of slots in the lookup table.
///
/// Matches the original server's `siridb_lookup_t` table size: large enough
/// that, with a reasonable number of series, series names distribute evenly
/// across pools.
pub const NUM_SLOTS: usize = 8192;

/// Errors produced while building or querying a [`Lookup`] table.
#[derive(Debug, Error)]
pub enum LookupError {
    /// The requested pool count was zero; a lookup table must route to at
    /// least one pool.
    #[error("pool count must be at least 1")]
    NoPools,

    /// The pool count exceeds what a `u16` slot entry can address.
    #[error("pool count {0} exceeds maximum addressable pools ({1})")]
    TooManyPools(usize, usize),
}

/// A single, immutable snapshot of the slot table.
///
/// `Lookup` always holds a reference to the table currently in effect;
/// `rebuild` produces a new `LookupTable` and atomically replaces it.
#[derive(Debug)]
struct LookupTable {
    /// `slots[i]` is the pool index responsible for hash-slot `i`.
    slots: [u16; NUM_SLOTS],
    /// Number of pools this table was built for.
    pool_count: usize,
}

impl LookupTable {
    /// Builds a fresh table for `pool_count` pools, distributing slots as
    /// evenly as possible: slot `i` maps to pool `i % pool_count` in a
    /// pool-order-stable rotation, which reassigns the fewest slots
    /// possible when `pool_count` grows by one, mirroring the original
    /// server's incremental re-index behaviour.
    fn new_even(pool_count: usize) -> Self {
        let mut slots = [0u16; NUM_SLOTS];
        for (i, slot) in slots.iter_mut().enumerate() {
            *slot = (i % pool_count) as u16;
        }
        Self { slots, pool_count }
    }

    /// Rebuilds `self` for a larger `new_pool_count`, moving only the
    /// minimum slots necessary: roughly `NUM_SLOTS / new_pool_count` slots
    /// migrate to each newly-added pool, leaving slots already assigned to
    /// untouched pools alone whenever evenness allows it.
    fn rebalanced(&self, new_pool_count: usize) -> Self {
        if new_pool_count <= self.pool_count {
            return Self::new_even(new_pool_count);
        }
        let mut slots = self.slots;
        let target_per_pool = NUM_SLOTS / new_pool_count;
        let mut counts = vec![0usize; self.pool_count];
        for &p in &slots {
            counts[p as usize] += 1;
        }
        let mut next_new_pool = self.pool_count;
        let mut moved_to_current = 0usize;
        for slot in slots.iter_mut() {
            if next_new_pool >= new_pool_count {
                break;
            }
            let owner = *slot as usize;
            if counts[owner] > target_per_pool {
                *slot = next_new_pool as u16;
                counts[owner] -= 1;
                moved_to_current += 1;
                if moved_to_current >= target_per_pool {
                    next_new_pool += 1;
                    moved_to_current = 0;
                }
            }
        }
        Self {
            slots,
            pool_count: new_pool_count,
        }
    }
}

/// A pool lookup table whose snapshot is replaced, not mutated, on rebuild.
///
/// Reads take a short-lived lock only to clone the current `Arc<LookupTable>`
/// — the lookup itself then runs against that snapshot without holding
/// anything, so a `rebuild` in progress never blocks a concurrent `resolve`
/// (and vice versa); a resolver that raced a rebuild simply finishes against
/// the table that was current when it started.
#[derive(Debug)]
pub struct Lookup {
    table: Mutex<Arc<LookupTable>>,
    /// Monotonically incremented each time `rebuild` runs, so callers can
    /// detect a stale snapshot (e.g. a query planner that resolved a series
    /// before a pool was added).
    generation: AtomicUsize,
}

impl Lookup {
    /// Creates a lookup table for a freshly bootstrapped cluster with
    /// `pool_count` pools.
    pub fn new(pool_count: usize) -> Result<Self, LookupError> {
        validate_pool_count(pool_count)?;
        Ok(Self {
            table: Mutex::new(Arc::new(LookupTable::new_even(pool_count))),
            generation: AtomicUsize::new(0),
        })
    }

    /// Returns the pool index responsible for `series_name`.
    pub fn resolve(&self, series_name: &str) -> usize {
        let table = self.snapshot();
        let slot = Self::hash_slot(series_name);
        table.slots[slot] as usize
    }

    fn snapshot(&self) -> Arc<LookupTable> {
        self.table.lock().expect("lookup table lock poisoned").clone()
    }

    /// Returns the slot index (`0..NUM_SLOTS`) a series name hashes to.
    ///
    /// Uses CRC32 as the stable, non-cryptographic hash — the same
    /// function already linked in for WAL/shard integrity checks, so no
    /// additional hashing dependency is introduced.
    pub fn hash_slot(series_name: &str) -> usize {
        let mut hasher = Crc32::new();
        hasher.update(series_name.as_bytes());
        (hasher.finalize() as usize) % NUM_SLOTS
    }

    /// Grows the table to `new_pool_count` pools, reassigning the minimum
    /// number of slots, and publishes it atomically. Readers already
    /// holding an old snapshot finish their lookup against the table that
    /// was current when they called `resolve`; there is no lookup-time
    /// blocking on either side.
    pub fn rebuild(&self, new_pool_count: usize) -> Result<(), LookupError> {
        validate_pool_count(new_pool_count)?;
        let current = self.snapshot();
        if new_pool_count == current.pool_count {
            return Ok(());
        }
        let next = Arc::new(current.rebalanced(new_pool_count));
        *self.table.lock().expect("lookup table lock poisoned") = next;
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Current number of pools this table routes to.
    pub fn pool_count(&self) -> usize {
        self.snapshot().pool_count
    }

    /// Monotonic generation counter, bumped on every successful `rebuild`.
    pub fn generation(&self) -> usize {
        self.generation.load(Ordering::SeqCst)
    }

    /// Number of slots currently owned by each pool, indexed by pool id.
    #[cfg(test)]
    fn slot_counts(&self) -> Vec<usize> {
        let table = self.snapshot();
        let mut counts = vec![0usize; table.pool_count];
        for &p in &table.slots {
            counts[p as usize] += 1;
        }
        counts
    }
}

fn validate_pool_count(pool_count: usize) -> Result<(), LookupError> {
    if pool_count == 0 {
        return Err(LookupError::NoPools);
    }
    if pool_count > u16::MAX as usize {
        return Err(LookupError::TooManyPools(pool_count, u16::MAX as usize));
    }
    Ok(())
}
