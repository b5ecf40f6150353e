//! Per-query deadline and cooperative cancellation (spec.md §5).
//!
//! spec.md §5 describes a single event thread dispatching work to a small
//! worker pool, with each worker checking a deadline and a cancellation
//! flag at block boundaries. The event-thread/worker-pool split itself is
//! a property of the network-layer host process that embeds this crate —
//! accepting connections, reading packages, and fanning a query out to
//! remote pools are already external collaborators per spec.md §1, and
//! nothing in this crate spawns its own threads. What this module gives
//! that host is the contract a worker checks against: a deadline, and a
//! flag a cancel package's receiver can flip early. `LocalExecutor`
//! (see [`super::LocalExecutor::execute_tagged_with_deadline`]) checks
//! both once per series — the natural block boundary for a query that
//! spans several series.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A query's remaining time budget plus a cooperative cancel flag.
///
/// Cloning shares the same cancel flag (it's an `Arc`), so a clone handed
/// to a worker and a [`CancelHandle`] handed to whatever receives a
/// cancel package observe the same cancellation.
#[derive(Debug, Clone)]
pub struct Deadline {
    expires_at: Instant,
    cancelled: Arc<AtomicBool>,
}

impl Deadline {
    /// A deadline expiring `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self { expires_at: Instant::now() + budget, cancelled: Arc::new(AtomicBool::new(false)) }
    }

    /// A deadline that never expires on its own: for local callers (tests,
    /// embedders querying their own pool directly) that have no timeout to
    /// enforce but may still want a cancel handle.
    pub fn never() -> Self {
        Self::after(Duration::from_secs(u64::MAX / 2))
    }

    /// A handle a cancel package's receiver can flip to abort this query
    /// immediately, without waiting for the time budget to elapse.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancelled.clone())
    }

    /// Whether a worker checking this deadline at a block boundary should
    /// stop: either the time budget elapsed, or an explicit cancel
    /// package already arrived.
    pub fn is_expired(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed) || Instant::now() >= self.expires_at
    }
}

/// The cancel side of a [`Deadline`], held by whatever receives a query's
/// cancel package (spec.md §5: "a cancelled fan-out leg is aborted via a
/// cancel package carrying the original query's pid").
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Marks the associated [`Deadline`] expired from this point on.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}
