//! Cross-shard point merging.
//!
//! A query's time range commonly spans more than one shard (e.g. several
//! hourly shards for a day-long `between`). [`MergedScanIterator`] takes
//! the already-open shards that intersect the range plus whatever buffer
//! points the caller supplies, and yields one strictly timestamp-ordered
//! stream — spec.md §4.9 step 3's "merge buffer points with shard blocks".

use std::collections::BinaryHeap;

use super::{Point, Shard, ShardError};

/// One point plus which generation/shard it came from, used to break
/// timestamp ties per spec.md §4.9: "the higher-generation shard wins; if
/// tied, the owning-pool id wins." This struct only carries the generation
/// half of that rule — it has no notion of which pool produced it, since a
/// single [`MergedScanIterator`] only ever merges shards within one pool.
/// The pool-id half is applied further up, in `query::merge_results`, once
/// each pool's results are tagged with their origin.
#[derive(Debug, Clone, PartialEq)]
pub struct GenPoint {
    /// The point itself.
    pub point: Point,
    /// Generation of the shard (or `u32::MAX` for buffer-resident points,
    /// which are always newer than any flushed shard).
    pub generation: u32,
}

#[derive(Debug, Clone, PartialEq)]
struct HeapItem {
    point: GenPoint,
    source: usize,
}

impl Eq for HeapItem {}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; reverse timestamp so the smallest
        // timestamp (then highest generation) pops first.
        other
            .point
            .point
            .ts
            .cmp(&self.point.point.ts)
            .then_with(|| self.point.generation.cmp(&other.point.generation))
    }
}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Merges one series' points across several shards (each contributing an
/// already-sorted run) plus an optional buffer tail, in ascending
/// timestamp order. Ties are resolved by preferring the higher generation,
/// matching spec.md §4.9's point-level tie-break.
pub struct MergedScanIterator {
    heap: BinaryHeap<HeapItem>,
    runs: Vec<std::vec::IntoIter<GenPoint>>,
}

impl MergedScanIterator {
    /// Builds a merged iterator for `series_id` in `[from, to)` from a set
    /// of shards (assumed pre-filtered to those whose window intersects
    /// the range) plus an optional buffer tail (generation `u32::MAX`).
    pub fn new(
        shards: &[&Shard],
        series_id: u64,
        from: i64,
        to: i64,
        buffer_tail: Vec<Point>,
    ) -> Result<Self, ShardError> {
        let mut runs = Vec::with_capacity(shards.len() + 1);
        for shard in shards {
            let points = shard.scan(series_id, from, to)?;
            let generation = shard.header().generation;
            runs.push(
                points
                    .into_iter()
                    .map(|point| GenPoint { point, generation })
                    .collect::<Vec<_>>(),
            );
        }
        if !buffer_tail.is_empty() {
            let mut tail: Vec<Point> = buffer_tail
                .into_iter()
                .filter(|p| p.ts >= from && p.ts < to)
                .collect();
            tail.sort_by_key(|p| p.ts);
            runs.push(
                tail.into_iter()
                    .map(|point| GenPoint {
                        point,
                        generation: u32::MAX,
                    })
                    .collect::<Vec<_>>(),
            );
        }

        let mut heap = BinaryHeap::with_capacity(runs.len());
        let mut iters: Vec<std::vec::IntoIter<GenPoint>> =
            runs.into_iter().map(|r| r.into_iter()).collect();
        for (source, iter) in iters.iter_mut().enumerate() {
            if let Some(point) = iter.next() {
                heap.push(HeapItem { point, source });
            }
        }

        Ok(Self { heap, runs: iters })
    }

    /// Drains the merge into a flat, deduplicated-by-timestamp vector of
    /// [`GenPoint`]s: when two points share a timestamp, the higher-generation
    /// one wins. The generation is kept on each point (rather than stripped
    /// to a plain [`Point`]) so a caller merging several pools' results can
    /// still apply the rest of spec.md §4.9's tie-break across pools.
    pub fn collect_deduped(mut self) -> Vec<GenPoint> {
        let mut out: Vec<GenPoint> = Vec::new();
        while let Some(item) = self.next_raw() {
            match out.last_mut() {
                Some(last) if last.point.ts == item.point.ts => {
                    if item.generation > last.generation {
                        *last = item;
                    }
                }
                _ => out.push(item),
            }
        }
        out
    }

    fn next_raw(&mut self) -> Option<GenPoint> {
        let HeapItem { point, source } = self.heap.pop()?;
        if let Some(next) = self.runs[source].next() {
            self.heap.push(HeapItem {
                point: next,
                source,
            });
        }
        Some(point)
    }
}

impl Iterator for MergedScanIterator {
    type Item = GenPoint;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_raw()
    }
}
