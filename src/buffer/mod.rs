//! Per-series write buffer and buffersync.
//!
//! Every series keeps a small bounded in-memory page of its most recent
//! points (spec.md §4.4). A write lands in the page first and is
//! journaled to one per-server *buffer file* before being acknowledged —
//! the same write-then-journal ordering the teacher's memtable uses for
//! its per-key entries, adapted here to a per-series ring rather than a
//! sorted multi-version map, since a buffer page only ever needs to
//! remember "everything not yet flushed to a shard", not multiple
//! versions of the same point.
//!
//! [`sync`] implements the buffersync task itself: sorting each page,
//! grouping by shard window, and appending one block per `(series,
//! window)` via [`crate::shard::appender::ShardAppender`].

#[cfg(test)]
mod tests;

pub mod sync;

use std::{collections::HashMap, io, path::Path, sync::Mutex};

use thiserror::Error;
use tracing::{debug, info};

use crate::encoding::{Decode, Encode, EncodingError};
use crate::shard::{Point, PointValue};
use crate::wal::{Wal, WalError};

const WAL_FILENAME: &str = "wal-000000.log";

/// Errors returned by buffer operations.
#[derive(Debug, Error)]
pub enum BufferError {
    /// Underlying WAL I/O failure.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding/decoding error.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Underlying shard I/O failure during buffersync.
    #[error("shard error: {0}")]
    Shard(#[from] crate::shard::ShardError),

    /// Internal invariant violation or poisoned lock.
    #[error("internal error: {0}")]
    Internal(String),
}

/// One durably-journaled write, replayed into a page at startup.
#[derive(Debug, Clone)]
struct BufferRecord {
    series_id: u64,
    point: Point,
}

impl Encode for BufferRecord {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.series_id.encode_to(buf)?;
        self.point.ts.encode_to(buf)?;
        match &self.point.value {
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
        Ok(())
    }
}

impl Decode for BufferRecord {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (series_id, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
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
                return Err(EncodingError::InvalidTag {
                    tag: other as u32,
                    type_name: "BufferValueTag",
                });
            }
        };
        Ok((Self { series_id, point: Point { ts, value } }, offset))
    }
}

/// Default number of points held per series before buffersync is forced.
pub const DEFAULT_PAGE_CAPACITY: usize = 512;

struct Inner {
    wal: Wal<BufferRecord>,
    pages: HashMap<u64, Vec<Point>>,
}

/// The server-wide write buffer: one page per series, backed by a single
/// durable journal file.
///
/// The journal and the in-memory pages are guarded by one lock rather
/// than two, so that draining a page and truncating the journal that
/// backs it are always one atomic step — a concurrent [`insert`](Buffer::insert)
/// either lands entirely before a drain (and is flushed with it) or
/// entirely after (and survives the journal truncation untouched). This
/// trades a little write concurrency during a sync pass for a buffer
/// that can never silently drop a journaled-but-undrained point.
pub struct Buffer {
    inner: Mutex<Inner>,
    page_capacity: usize,
}

impl Buffer {
    /// Opens (or creates) the buffer journal at `dir/wal-000000.log`,
    /// replaying any points not yet flushed to shards.
    pub fn open(dir: impl AsRef<Path>, page_capacity: usize) -> Result<Self, BufferError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let wal_path = dir.join(WAL_FILENAME);
        let wal = Wal::<BufferRecord>::open(&wal_path, None)?;

        let mut pages: HashMap<u64, Vec<Point>> = HashMap::new();
        let mut replayed = 0usize;
        for record in wal.replay_iter()? {
            let record = record?;
            pages.entry(record.series_id).or_default().push(record.point);
            replayed += 1;
        }
        info!(dir = %dir.display(), replayed, "buffer journal opened");

        Ok(Self {
            inner: Mutex::new(Inner { wal, pages }),
            page_capacity: page_capacity.max(1),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, BufferError> {
        self.inner
            .lock()
            .map_err(|_| BufferError::Internal("buffer lock poisoned".into()))
    }

    /// Appends `point` for `series_id`: durably journaled first, then
    /// made visible in the in-memory page. Returns `true` if the page
    /// has reached capacity and should be flushed as soon as possible
    /// (spec.md §4.4's "on page-full" trigger).
    pub fn insert(&self, series_id: u64, point: Point) -> Result<bool, BufferError> {
        let mut inner = self.lock()?;
        inner.wal.append(&BufferRecord { series_id, point: point.clone() })?;
        let page = inner.pages.entry(series_id).or_default();
        page.push(point);
        Ok(page.len() >= self.page_capacity)
    }

    /// Returns a sorted copy of `series_id`'s pending points, without
    /// removing them from the page.
    pub fn peek(&self, series_id: u64) -> Vec<Point> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut points = inner.pages.get(&series_id).cloned().unwrap_or_default();
        points.sort_by_key(|p| p.ts);
        points
    }

    /// Number of points currently buffered for `series_id`.
    pub fn page_len(&self, series_id: u64) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pages
            .get(&series_id)
            .map_or(0, Vec::len)
    }

    /// Series ids that currently hold at least one buffered point.
    pub fn series_with_pending_data(&self) -> Vec<u64> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pages
            .iter()
            .filter(|(_, page)| !page.is_empty())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Total number of buffered points across every series.
    pub fn total_buffered_points(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pages
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Whether any series' page has reached capacity.
    pub fn any_page_full(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pages
            .values()
            .any(|page| page.len() >= self.page_capacity)
    }

    /// Atomically drains every pending page (sorted) and truncates the
    /// journal in the same critical section, so a point is never lost
    /// between being read here and the journal being cleared. Used by
    /// [`sync::run`] once every drained point has been durably written
    /// to a shard.
    fn drain_all(&self) -> Result<HashMap<u64, Vec<Point>>, BufferError> {
        let mut inner = self.lock()?;
        let mut drained = std::mem::take(&mut inner.pages);
        for page in drained.values_mut() {
            page.sort_by_key(|p| p.ts);
        }
        inner.wal.truncate()?;
        debug!(series = drained.len(), "buffer journal truncated after buffersync");
        Ok(drained)
    }
}
