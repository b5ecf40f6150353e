//! Pool reachability tracking for the fan-out planner.
//!
//! Mirrors the original source's pool tri-state (`online`/`available`/
//! `accessible`, spec.md §10 supplemental features): a pool can be a known
//! member of the cluster but temporarily unreachable (`online=false`), up
//! but mid-reindex and not yet serving queries (`available=false`), or up
//! and reachable but its local database is in a degraded/loading state
//! (`accessible=false`). The fan-out planner only dispatches to pools
//! that are all three, so a query doesn't pay a full fan-out deadline on
//! a pool it already knows is down.

use std::collections::HashMap;
use std::sync::RwLock;

/// One pool's last-known reachability, as of the last heartbeat/attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// The pool has at least one server currently connected to this one.
    pub online: bool,
    /// The pool isn't mid-reindex in a way that would make its answer
    /// incomplete.
    pub available: bool,
    /// The pool's own database is open and serving (not `fatal`, spec.md §7).
    pub accessible: bool,
}

impl PoolStatus {
    /// A freshly discovered pool is assumed fully up until told otherwise.
    pub const UP: Self = Self { online: true, available: true, accessible: true };

    /// Whether the fan-out planner should dispatch to this pool.
    pub fn fully_up(&self) -> bool {
        self.online && self.available && self.accessible
    }
}

impl Default for PoolStatus {
    fn default() -> Self {
        Self::UP
    }
}

/// Tracks reachability for every pool this server knows about, other than
/// itself.
#[derive(Debug, Default)]
pub struct PoolTable {
    statuses: RwLock<HashMap<u16, PoolStatus>>,
}

impl PoolTable {
    /// Creates an empty table; every pool starts out `fully_up` when first
    /// queried (optimistic until a failure is observed).
    pub fn new() -> Self {
        Self::default()
    }

    /// Current status of `pool_id`, defaulting to fully up if never
    /// explicitly marked otherwise.
    pub fn status(&self, pool_id: u16) -> PoolStatus {
        self.statuses
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&pool_id)
            .copied()
            .unwrap_or_default()
    }

    /// Records an explicit status for `pool_id`, e.g. after a fan-out
    /// timeout (`online = false`) or a reindex notification
    /// (`available = false`).
    pub fn set_status(&self, pool_id: u16, status: PoolStatus) {
        self.statuses.write().unwrap_or_else(|e| e.into_inner()).insert(pool_id, status);
    }

    /// Marks a pool unreachable after a failed dispatch, leaving
    /// `available`/`accessible` untouched.
    pub fn mark_unreachable(&self, pool_id: u16) {
        let mut current = self.status(pool_id);
        current.online = false;
        self.set_status(pool_id, current);
    }

    /// Marks a pool reachable again, e.g. after a successful heartbeat.
    pub fn mark_reachable(&self, pool_id: u16) {
        let mut current = self.status(pool_id);
        current.online = true;
        self.set_status(pool_id, current);
    }
}
