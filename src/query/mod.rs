//! Cluster query executor (spec.md §4.9).
//!
//! This module implements only the pipeline spec.md §4.9 describes:
//! resolve a series expression against the local catalog, merge each
//! matched series' buffer and shard data via
//! [`crate::shard::iterator::MergedScanIterator`], optionally aggregate,
//! and — for a pool that fans a query out — merge remote pools'
//! `{series name -> points}` results with the local ones. The query
//! grammar/parser itself is an external collaborator (spec.md §1); `ast`
//! below defines only the node types this executor consumes, standing in
//! for that parser's output.

#[cfg(test)]
mod tests;

pub mod aggregate;
pub mod deadline;
pub mod pools;

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, warn};

use crate::buffer::{Buffer, BufferError};
use crate::catalog::{Catalog, CatalogError, Series};
use crate::shard::handles::ShardHandlePool;
use crate::shard::iterator::{GenPoint, MergedScanIterator};
use crate::shard::{Point, PointValue, Shard, ShardError};

pub use aggregate::{Aggregate, AggregateOutput, Filter, FilterOp};
pub use deadline::{CancelHandle, Deadline};
pub use pools::{PoolStatus, PoolTable};

/// Errors raised while planning or executing a query.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Underlying catalog failure.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Underlying shard I/O failure.
    #[error("shard error: {0}")]
    Shard(#[from] ShardError),

    /// Underlying buffer failure.
    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// A `regex` series selector or string filter failed to compile.
    #[error("invalid regex pattern: {0}")]
    BadPattern(String),

    /// A numeric aggregation was applied to a string series.
    #[error("aggregation requires a numeric series")]
    NotNumeric,

    /// A regex filter was applied to a non-string series.
    #[error("filter regex requires a string series")]
    NotString,

    /// A scalar aggregation was applied to a series with no points in range.
    #[error("aggregation over an empty point stream")]
    EmptySeries,
}

/// Which series a query targets.
#[derive(Debug, Clone, PartialEq)]
pub enum SeriesSelector {
    /// An explicit list of series names.
    Names(Vec<String>),
    /// A regular expression matched against series names.
    Regex(String),
}

/// A parsed `select ... from <series-expr> where ... aggregate ...`
/// query, as the external parser would hand it to this executor.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub selector: SeriesSelector,
    pub from: i64,
    pub to: i64,
    pub aggregate: Option<Aggregate>,
}

/// A point tagged with where it came from, carried between a pool's local
/// execution and [`merge_results`] so the cross-pool half of spec.md §4.9's
/// tie-break ("the higher-generation shard wins; if tied, the owning-pool
/// id wins") has the information it needs. Generation `u32::MAX` marks a
/// point that already passed through aggregation or the buffer tail —
/// both outrank any on-disk shard generation, since they reflect the most
/// recent state this pool knows about.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedPoint {
    pub point: Point,
    pub generation: u32,
    pub pool_id: u16,
}

impl TaggedPoint {
    /// Whether `self` should replace `other` when both occupy the same
    /// timestamp slot: higher generation wins, ties broken by higher pool id.
    fn wins_over(&self, other: &TaggedPoint) -> bool {
        (self.generation, self.pool_id) > (other.generation, other.pool_id)
    }
}

/// Resolves a [`SeriesSelector`] against the local catalog.
fn resolve_selector(catalog: &Catalog, selector: &SeriesSelector) -> Result<Vec<Series>, QueryError> {
    match selector {
        SeriesSelector::Names(names) => {
            Ok(names.iter().filter_map(|name| catalog.get_by_name(name)).collect())
        }
        SeriesSelector::Regex(pattern) => {
            let re = regex::Regex::new(pattern).map_err(|e| QueryError::BadPattern(e.to_string()))?;
            Ok(catalog.scan(|name| re.is_match(name)))
        }
    }
}

/// Computes, for a name-list selector, which remote pools could own a
/// matched series (spec.md §4.9 step 1); for a regex selector every other
/// known pool must be asked, since matching names it doesn't already know
/// about could live anywhere.
pub fn plan_fanout(
    selector: &SeriesSelector,
    lookup: &crate::lookup::Lookup,
    local_pool_id: u16,
    pools: &PoolTable,
) -> Vec<u16> {
    let candidates: Vec<u16> = match selector {
        SeriesSelector::Names(names) => {
            let mut pool_ids: Vec<u16> = names.iter().map(|name| lookup.resolve(name) as u16).collect();
            pool_ids.sort_unstable();
            pool_ids.dedup();
            pool_ids
        }
        SeriesSelector::Regex(_) => (0..lookup.pool_count() as u16).collect(),
    };
    candidates
        .into_iter()
        .filter(|&pool_id| pool_id != local_pool_id && pools.status(pool_id).fully_up())
        .collect()
}

/// Executes a query's local portion: series resolution, buffer/shard
/// merge, and aggregation (spec.md §4.9 steps 1, 3, 4).
pub struct LocalExecutor<'a> {
    catalog: &'a Catalog,
    buffer: &'a Buffer,
    handles: &'a ShardHandlePool,
}

impl<'a> LocalExecutor<'a> {
    pub fn new(catalog: &'a Catalog, buffer: &'a Buffer, handles: &'a ShardHandlePool) -> Self {
        Self { catalog, buffer, handles }
    }

    fn read_series(&self, series: &Series, from: i64, to: i64) -> Result<Vec<GenPoint>, QueryError> {
        let mut opened: Vec<std::sync::Arc<Shard>> = Vec::new();
        for &shard_id in &series.shard_ids {
            let shard = self.handles.get(shard_id)?;
            let header = shard.header();
            let window_end = header.window_start + header.duration_secs as i64;
            if header.window_start < to && window_end > from {
                opened.push(shard);
            }
        }
        let refs: Vec<&Shard> = opened.iter().map(|s| s.as_ref()).collect();
        let buffer_tail = self.buffer.peek(series.id);
        let merged = MergedScanIterator::new(&refs, series.id, from, to, buffer_tail)?;
        Ok(merged.collect_deduped())
    }

    /// Reads and, if requested, aggregates a single series — the unit of
    /// work [`Self::execute_tagged`] and
    /// [`Self::execute_tagged_with_deadline`] both loop over, and the
    /// "block boundary" a deadline/cancellation check happens between.
    /// Returns `Ok(None)` for a series whose aggregation can't be computed
    /// (e.g. a scalar aggregate over no points in range): logged and
    /// skipped rather than failing the whole query.
    fn execute_one_series(
        &self,
        s: &Series,
        query: &Query,
        local_pool_id: u16,
    ) -> Result<Option<Vec<TaggedPoint>>, QueryError> {
        let points = self.read_series(s, query.from, query.to)?;
        let tagged = match &query.aggregate {
            Some(agg) => {
                let plain: Vec<Point> = points.iter().map(|gp| gp.point.clone()).collect();
                match aggregate::apply(agg, &plain) {
                    Ok(AggregateOutput::Scalar(v)) => vec![TaggedPoint {
                        point: Point { ts: query.to, value: PointValue::Float(v) },
                        generation: u32::MAX,
                        pool_id: local_pool_id,
                    }],
                    Ok(AggregateOutput::Points(pts)) => pts
                        .into_iter()
                        .map(|point| TaggedPoint { point, generation: u32::MAX, pool_id: local_pool_id })
                        .collect(),
                    Err(QueryError::EmptySeries) => {
                        debug!(series = %s.name, "query: no points in range, skipping aggregation");
                        return Ok(None);
                    }
                    Err(err) => {
                        warn!(series = %s.name, %err, "query: aggregation failed, skipping series");
                        return Ok(None);
                    }
                }
            }
            None => points
                .into_iter()
                .map(|gp| TaggedPoint { point: gp.point, generation: gp.generation, pool_id: local_pool_id })
                .collect(),
        };
        Ok(Some(tagged))
    }

    /// Runs the query against local data only, returning `{series name ->
    /// points}`, tagged with the generation each point came from and
    /// `local_pool_id`. This is the form the network layer fans out and
    /// hands to [`merge_results`]; plain [`Self::execute`] is a thin
    /// wrapper for callers that only need this pool's own answer, and
    /// [`Self::execute_tagged_with_deadline`] is this same walk with a
    /// deadline/cancellation check enforced (spec.md §5).
    pub fn execute_tagged(
        &self,
        query: &Query,
        local_pool_id: u16,
    ) -> Result<BTreeMap<String, Vec<TaggedPoint>>, QueryError> {
        let series = resolve_selector(self.catalog, &query.selector)?;
        let mut out = BTreeMap::new();
        for s in series {
            if let Some(tagged) = self.execute_one_series(&s, query, local_pool_id)? {
                out.insert(s.name, tagged);
            }
        }
        Ok(out)
    }

    /// Runs the query against local data only, returning `{series name ->
    /// points}` with origin tags stripped. See [`Self::execute_tagged`] for
    /// the form that preserves them across a cross-pool merge.
    pub fn execute(&self, query: &Query) -> Result<BTreeMap<String, Vec<Point>>, QueryError> {
        // Tags only matter once more than one pool's results are compared;
        // a pool resolving its own query has no one to lose a tie-break to.
        let tagged = self.execute_tagged(query, 0)?;
        Ok(tagged
            .into_iter()
            .map(|(name, points)| (name, points.into_iter().map(|tp| tp.point).collect()))
            .collect())
    }

    /// Like [`Self::execute_tagged`], but checks `deadline` once per series
    /// (the natural block boundary for a query spanning several series)
    /// and stops early if it has expired or been cancelled, per spec.md
    /// §5's deadline/cancellation model. The returned `bool` is the
    /// `partial` flag scenario F describes: `true` means at least one
    /// matched series was left unprocessed. A caller fanning this query
    /// out to remote pools ORs this flag together with each remote leg's
    /// own partial flag before reporting it to the issuer.
    pub fn execute_tagged_with_deadline(
        &self,
        query: &Query,
        local_pool_id: u16,
        deadline: &Deadline,
    ) -> Result<(BTreeMap<String, Vec<TaggedPoint>>, bool), QueryError> {
        let series = resolve_selector(self.catalog, &query.selector)?;
        let mut out = BTreeMap::new();
        let mut partial = false;
        for s in series {
            if deadline.is_expired() {
                debug!(remaining = out.len(), "query: deadline expired, returning partial results");
                partial = true;
                break;
            }
            if let Some(tagged) = self.execute_one_series(&s, query, local_pool_id)? {
                out.insert(s.name, tagged);
            }
        }
        Ok((out, partial))
    }
}

/// Merges this pool's local results with remote pools' results
/// (spec.md §4.9 step 5): union by series name; on overlap (possible
/// during a reindex, when both the old and new owner answer for the
/// same series) the two point vectors are merged and deduplicated by
/// timestamp, keeping the higher-generation point and — per spec.md
/// §4.9's tie-break — the higher owning-pool id when generations match.
pub fn merge_results(
    mut local: BTreeMap<String, Vec<TaggedPoint>>,
    remote: Vec<BTreeMap<String, Vec<TaggedPoint>>>,
) -> BTreeMap<String, Vec<Point>> {
    for remote_map in remote {
        for (name, points) in remote_map {
            local.entry(name).or_default().extend(points);
        }
    }
    local
        .into_iter()
        .map(|(name, mut points)| {
            points.sort_by_key(|tp| tp.point.ts);
            let mut deduped: Vec<TaggedPoint> = Vec::with_capacity(points.len());
            for point in points {
                match deduped.last_mut() {
                    Some(last) if last.point.ts == point.point.ts => {
                        if point.wins_over(last) {
                            *last = point;
                        }
                    }
                    _ => deduped.push(point),
                }
            }
            (name, deduped.into_iter().map(|tp| tp.point).collect())
        })
        .collect()
}
