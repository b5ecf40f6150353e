//! Shard storage.
//!
//! A shard is an immutable, on-disk file holding every point block written
//! for many series that share one `(duration_class, window_start)` key,
//! once those series' buffer pages have been flushed (see
//! [`crate::buffer`]). Points are stored as compressed blocks: numeric
//! series use delta-of-delta timestamp encoding plus XOR-of-previous-bits
//! value encoding, string series use length-prefixed UTF-8 — mirroring the
//! compression SiriDB applies to its point blocks.
//!
//! # On-disk layout
//!
//! ```text
//! [HEADER 64B]
//! [BLOCK_LEN_LE][BLOCK_BYTES][BLOCK_CRC32_LE]
//! [BLOCK_LEN_LE][BLOCK_BYTES][BLOCK_CRC32_LE]
//! ...
//! [INDEX_LEN_LE][INDEX_BYTES][INDEX_CRC32_LE]
//! [FOOTER 32B]
//! ```
//!
//! - **Header** — shard identity: duration class, window start, a status
//!   byte, a generation counter, and a CRC32 over the rest of the header.
//! - **Blocks** — each holds one compressed run of points for one series,
//!   in append order. A block is superseded (not mutated) when the
//!   optimizer rewrites a shard; the old block's bytes simply aren't
//!   copied into the new file.
//! - **Index** — sorted by series id; each entry lists the blocks that
//!   belong to that series (offset, length, point count, `[min_ts,max_ts]`,
//!   and a flags byte carrying the point type plus a tombstone bit),
//!   enabling a reader to binary-search for the blocks overlapping a query
//!   range without scanning the whole shard.
//! - **Footer** — points at the index, fixed-size, written last so a
//!   partially-written shard is trivially detectable (footer absent).
//!
//! # Concurrency
//!
//! Shards are immutable once fully written: reads are lock-free via
//! `memmap2`. Tombstoning a block only flips a bit in an in-memory index
//! overlay (backed by a small sidecar file so it survives a restart); the
//! physical bytes are reclaimed only when the optimizer rewrites the shard
//! to a brand-new file and generation. The catalog swaps the old shard id
//! for the new one atomically ([`crate::catalog`]); no shard is ever
//! edited in place.

pub mod appender;
pub mod builder;
pub mod handles;
pub mod iterator;

#[cfg(test)]
mod tests;

pub use appender::ShardAppender;
pub use builder::ShardWriter;
pub use iterator::MergedScanIterator;

use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
    sync::RwLock,
};

use crate::encoding::{self, Decode, Encode, EncodingError};
use crc32fast::Hasher as Crc32;
use memmap2::Mmap;
use thiserror::Error;

pub(crate) const SHARD_MAGIC: [u8; 4] = *b"SHRD";
pub(crate) const SHARD_MAGIC_FOR_FOOTER: [u8; 4] = *b"SHRD";
const SHARD_VERSION: u16 = 1;
pub(crate) const SHARD_HEADER_SIZE: usize = 64;
pub(crate) const SHARD_FOOTER_SIZE: usize = 32;
pub(crate) const BLOCK_LEN_SIZE: usize = 4;
pub(crate) const BLOCK_CRC_SIZE: usize = 4;

/// Flags byte bit layout for a [`BlockEntry`].
const FLAG_TOMBSTONED: u8 = 0b0000_0001;
const FLAG_TYPE_MASK: u8 = 0b0000_0110;
const FLAG_TYPE_SHIFT: u32 = 1;

/// Errors returned by shard read/write operations.
#[derive(Debug, Error)]
pub enum ShardError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding/decoding error.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// A block or header/footer checksum did not match.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// The file does not start with the expected magic/version.
    #[error("bad shard header: {0}")]
    BadHeader(String),

    /// The shard's footer could not be located — the file was likely
    /// truncated mid-write (crash during the builder's final rename).
    #[error("shard footer missing or truncated")]
    MissingFooter,

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

/// The type of point stored in a block — determines block compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointType {
    /// 64-bit signed integer values.
    Integer,
    /// 64-bit floating point values.
    Float,
    /// UTF-8 string values.
    String,
}

impl PointType {
    fn to_tag(self) -> u8 {
        match self {
            PointType::Integer => 0,
            PointType::Float => 1,
            PointType::String => 2,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, ShardError> {
        match tag {
            0 => Ok(PointType::Integer),
            1 => Ok(PointType::Float),
            2 => Ok(PointType::String),
            other => Err(ShardError::BadHeader(format!("unknown point type tag {other}"))),
        }
    }
}

/// A single `(timestamp, value)` pair as produced by a query or flush.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    /// Timestamp, in the server's configured resolution (commonly seconds
    /// or nanoseconds since the epoch — the shard itself is resolution-agnostic).
    pub ts: i64,
    /// The point's value.
    pub value: PointValue,
}

/// A point's value, tagged by series type.
#[derive(Debug, Clone, PartialEq)]
pub enum PointValue {
    /// Integer-series value.
    Integer(i64),
    /// Float-series value.
    Float(f64),
    /// String-series value.
    String(String),
}

impl PointValue {
    /// The [`PointType`] this value belongs to.
    pub fn point_type(&self) -> PointType {
        match self {
            PointValue::Integer(_) => PointType::Integer,
            PointValue::Float(_) => PointType::Float,
            PointValue::String(_) => PointType::String,
        }
    }
}

/// Shard lifecycle status, carried in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardStatus {
    /// Normal, queryable shard.
    Active,
    /// Superseded by a newer generation; retained only until readers
    /// holding the old generation finish.
    Superseded,
    /// A read or checksum failure was observed on this shard; served
    /// degraded (tombstoned/unreadable blocks skipped rather than erroring).
    Degraded,
}

impl ShardStatus {
    fn to_tag(self) -> u8 {
        match self {
            ShardStatus::Active => 0,
            ShardStatus::Superseded => 1,
            ShardStatus::Degraded => 2,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, ShardError> {
        match tag {
            0 => Ok(ShardStatus::Active),
            1 => Ok(ShardStatus::Superseded),
            2 => Ok(ShardStatus::Degraded),
            other => Err(ShardError::BadHeader(format!("unknown shard status tag {other}"))),
        }
    }
}

/// Shard file header: identity of the `(duration_class, window)` this
/// shard belongs to, plus its generation.
#[derive(Debug, Clone)]
pub struct ShardHeader {
    /// Duration class — index into the server's configured shard-duration
    /// table (e.g. hourly, daily, weekly shards).
    pub duration_class: u8,
    /// Length, in seconds, of this duration class's window.
    pub duration_secs: u32,
    /// Start of this shard's time window (inclusive).
    pub window_start: i64,
    /// Lifecycle status.
    pub status: ShardStatus,
    /// Monotonic generation counter; bumped each time the optimizer
    /// rewrites this `(duration_class, window)` to a new file.
    pub generation: u32,
}

impl ShardHeader {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        let start = buf.len();
        SHARD_MAGIC.encode_to(buf)?;
        SHARD_VERSION.encode_to(buf)?;
        self.duration_class.encode_to(buf)?;
        self.duration_secs.encode_to(buf)?;
        self.window_start.encode_to(buf)?;
        self.status.to_tag().encode_to(buf)?;
        self.generation.encode_to(buf)?;
        while buf.len() - start < SHARD_HEADER_SIZE - 4 {
            buf.push(0);
        }
        let crc = {
            let mut hasher = Crc32::new();
            hasher.update(&buf[start..]);
            hasher.finalize()
        };
        crc.encode_to(buf)?;
        Ok(())
    }

    fn decode_from(buf: &[u8]) -> Result<Self, ShardError> {
        if buf.len() < SHARD_HEADER_SIZE {
            return Err(ShardError::BadHeader("buffer shorter than header".into()));
        }
        let body = &buf[..SHARD_HEADER_SIZE - 4];
        let stored_crc = u32::from_le_bytes(
            buf[SHARD_HEADER_SIZE - 4..SHARD_HEADER_SIZE]
                .try_into()
                .map_err(|_| ShardError::Internal("crc slice conversion failed".into()))?,
        );
        let mut hasher = Crc32::new();
        hasher.update(body);
        if hasher.finalize() != stored_crc {
            return Err(ShardError::ChecksumMismatch);
        }

        let mut offset = 0;
        let (magic, n) = <[u8; 4]>::decode_from(&buf[offset..])?;
        offset += n;
        if magic != SHARD_MAGIC {
            return Err(ShardError::BadHeader("bad magic".into()));
        }
        let (version, n) = u16::decode_from(&buf[offset..])?;
        offset += n;
        if version != SHARD_VERSION {
            return Err(ShardError::BadHeader(format!("unsupported version {version}")));
        }
        let (duration_class, n) = u8::decode_from(&buf[offset..])?;
        offset += n;
        let (duration_secs, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (window_start, n) = i64::decode_from(&buf[offset..])?;
        offset += n;
        let (status_tag, n) = u8::decode_from(&buf[offset..])?;
        offset += n;
        let status = ShardStatus::from_tag(status_tag)?;
        let (generation, _n) = u32::decode_from(&buf[offset..])?;

        Ok(Self {
            duration_class,
            duration_secs,
            window_start,
            status,
            generation,
        })
    }
}

/// One block belonging to one series within the shard.
#[derive(Debug, Clone)]
pub struct BlockEntry {
    /// Byte offset of the block's length prefix within the shard file.
    pub block_offset: u64,
    /// Total on-disk size of the block, including its length prefix and CRC.
    pub block_len: u32,
    /// Number of points stored in the block.
    pub point_count: u32,
    /// Timestamp of the first point in the block.
    pub first_ts: i64,
    /// Timestamp of the last point in the block.
    pub last_ts: i64,
    /// Point type plus a tombstone bit, packed per spec.md §6's `flags` field.
    flags: u8,
}

impl BlockEntry {
    fn new(
        block_offset: u64,
        block_len: u32,
        point_count: u32,
        first_ts: i64,
        last_ts: i64,
        point_type: PointType,
    ) -> Self {
        Self {
            block_offset,
            block_len,
            point_count,
            first_ts,
            last_ts,
            flags: point_type.to_tag() << FLAG_TYPE_SHIFT,
        }
    }

    /// Whether this block has been logically removed (bytes remain until
    /// the next optimize pass).
    pub fn is_tombstoned(&self) -> bool {
        self.flags & FLAG_TOMBSTONED != 0
    }

    /// The point type encoded for this block.
    pub fn point_type(&self) -> Result<PointType, ShardError> {
        PointType::from_tag((self.flags & FLAG_TYPE_MASK) >> FLAG_TYPE_SHIFT)
    }

    /// Whether `[from, to)` overlaps this block's `[first_ts, last_ts]`.
    pub fn overlaps(&self, from: i64, to: i64) -> bool {
        self.first_ts < to && self.last_ts >= from
    }
}

impl Encode for BlockEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.block_offset.encode_to(buf)?;
        self.block_len.encode_to(buf)?;
        self.point_count.encode_to(buf)?;
        self.first_ts.encode_to(buf)?;
        self.last_ts.encode_to(buf)?;
        self.flags.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for BlockEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (block_offset, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (block_len, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (point_count, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (first_ts, n) = i64::decode_from(&buf[offset..])?;
        offset += n;
        let (last_ts, n) = i64::decode_from(&buf[offset..])?;
        offset += n;
        let (flags, n) = u8::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                block_offset,
                block_len,
                point_count,
                first_ts,
                last_ts,
                flags,
            },
            offset,
        ))
    }
}

/// The blocks belonging to one series within a shard, per spec.md §6's
/// `{series_id, n_blocks, blocks...}` index entry.
#[derive(Debug, Clone)]
pub struct SeriesIndex {
    /// The series these blocks belong to.
    pub series_id: u64,
    /// Blocks in append order (not necessarily timestamp order across a
    /// fragmented series — readers merge them).
    pub blocks: Vec<BlockEntry>,
}

impl Encode for SeriesIndex {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.series_id.encode_to(buf)?;
        encoding::encode_vec(&self.blocks, buf)?;
        Ok(())
    }
}

impl Decode for SeriesIndex {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (series_id, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (blocks, n) = encoding::decode_vec::<BlockEntry>(&buf[offset..])?;
        offset += n;
        Ok((Self { series_id, blocks }, offset))
    }
}

/// An opened, immutable shard backed by a memory-mapped file.
///
/// The block index is loaded once at `open` time and held sorted by
/// series id for binary search. Tombstones applied after open live in a
/// separate in-memory overlay ([`Shard::tombstone`]) until the optimizer
/// rewrites the shard — the mmap'd index bytes themselves are never
/// touched.
pub struct Shard {
    path: PathBuf,
    mmap: Mmap,
    /// Effective file length: the last length published by a committed
    /// [`appender::ShardAppender`] batch, or the full mmap length for a
    /// shard written in one shot by [`ShardWriter`]. Bytes beyond this are
    /// an uncommitted tail from a crashed append and are never read.
    view_len: usize,
    header: ShardHeader,
    index: Vec<SeriesIndex>,
    tombstones: RwLock<Vec<(u64, u64)>>,
}

impl Shard {
    /// Opens and validates an existing shard file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ShardError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        // SAFETY: the file is immutable up to `view_len` (see module docs);
        // bytes past it may still be concurrently written by an appender,
        // but this shard never reads past `view_len`.
        let mmap = unsafe { Mmap::map(&file)? };

        let actual_len = mmap.len() as u64;
        let view_len = appender::read_committed_len(&path, actual_len)?.min(actual_len) as usize;

        if view_len < SHARD_HEADER_SIZE + SHARD_FOOTER_SIZE {
            return Err(ShardError::MissingFooter);
        }

        let header = ShardHeader::decode_from(&mmap[..SHARD_HEADER_SIZE])?;

        let footer_start = view_len - SHARD_FOOTER_SIZE;
        let footer = &mmap[footer_start..view_len];
        let (index_offset, index_len) = decode_footer(footer)?;

        let index_start = index_offset as usize;
        let index_end = index_start + index_len as usize;
        if index_end + BLOCK_CRC_SIZE > footer_start {
            return Err(ShardError::MissingFooter);
        }
        let index_bytes = &mmap[index_start..index_end];
        let stored_crc = u32::from_le_bytes(
            mmap[index_end..index_end + BLOCK_CRC_SIZE]
                .try_into()
                .map_err(|_| ShardError::Internal("index crc slice conversion failed".into()))?,
        );
        let mut hasher = Crc32::new();
        hasher.update(index_bytes);
        if hasher.finalize() != stored_crc {
            return Err(ShardError::ChecksumMismatch);
        }
        let (mut index, _) = encoding::decode_vec::<SeriesIndex>(index_bytes)?;
        index.sort_by_key(|s| s.series_id);

        let sidecar_tombstones = load_tombstone_sidecar(&path)?;

        let shard = Self {
            path,
            mmap,
            view_len,
            header,
            index,
            tombstones: RwLock::new(Vec::new()),
        };
        for (series_id, offset) in sidecar_tombstones {
            shard.apply_tombstone_in_memory(series_id, offset);
        }
        Ok(shard)
    }

    /// The shard's header (window, duration class, generation).
    pub fn header(&self) -> &ShardHeader {
        &self.header
    }

    /// The shard's block index, one entry per series that has data here.
    pub fn index(&self) -> &[SeriesIndex] {
        &self.index
    }

    fn series_index(&self, series_id: u64) -> Option<&SeriesIndex> {
        self.index
            .binary_search_by_key(&series_id, |s| s.series_id)
            .ok()
            .map(|i| &self.index[i])
    }

    /// Returns the live (non-tombstoned) blocks for `series_id` whose
    /// `[first_ts,last_ts]` overlaps `[from, to)`, in append order.
    pub fn blocks_for(&self, series_id: u64, from: i64, to: i64) -> Vec<&BlockEntry> {
        let tombstoned = self.tombstones.read().unwrap_or_else(|e| e.into_inner());
        let Some(series) = self.series_index(series_id) else {
            return Vec::new();
        };
        series
            .blocks
            .iter()
            .filter(|b| {
                b.overlaps(from, to)
                    && !b.is_tombstoned()
                    && !tombstoned.contains(&(series_id, b.block_offset))
            })
            .collect()
    }

    /// Decodes one block's points.
    pub fn decode_block(&self, block: &BlockEntry) -> Result<Vec<Point>, ShardError> {
        let bytes = self.block_bytes(block)?;
        builder::decode_block(bytes, block.point_type()?)
    }

    /// Returns all live points for `series_id` in `[from, to)` across this
    /// shard, in ascending timestamp order.
    pub fn scan(&self, series_id: u64, from: i64, to: i64) -> Result<Vec<Point>, ShardError> {
        let mut out = Vec::new();
        for block in self.blocks_for(series_id, from, to) {
            out.extend(self.decode_block(block)?);
        }
        out.retain(|p| p.ts >= from && p.ts < to);
        out.sort_by_key(|p| p.ts);
        Ok(out)
    }

    /// Marks one block's slot as tombstoned. The physical bytes stay in
    /// the file until the next optimizer pass rewrites it. Durable across
    /// restart via a sidecar file next to the shard.
    pub fn tombstone(&self, series_id: u64, block_offset: u64) -> Result<(), ShardError> {
        self.apply_tombstone_in_memory(series_id, block_offset);
        self.persist_tombstones()
    }

    fn apply_tombstone_in_memory(&self, series_id: u64, block_offset: u64) {
        let mut tombstoned = self.tombstones.write().unwrap_or_else(|e| e.into_inner());
        if !tombstoned.contains(&(series_id, block_offset)) {
            tombstoned.push((series_id, block_offset));
        }
    }

    fn persist_tombstones(&self) -> Result<(), ShardError> {
        let tombstoned = self.tombstones.read().unwrap_or_else(|e| e.into_inner());
        let records: Vec<TombstoneRecord> = tombstoned
            .iter()
            .map(|(s, o)| TombstoneRecord {
                series_id: *s,
                block_offset: *o,
            })
            .collect();
        let mut buf = Vec::new();
        encoding::encode_vec(&records, &mut buf)?;
        fs::write(tombstone_sidecar_path(&self.path), buf)?;
        Ok(())
    }

    /// Total number of tombstoned block slots across all series.
    pub fn tombstone_count(&self) -> usize {
        self.tombstones.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Total number of live (non-tombstoned) blocks across all series.
    pub fn live_block_count(&self) -> usize {
        let tombstoned = self.tombstones.read().unwrap_or_else(|e| e.into_inner());
        self.index
            .iter()
            .flat_map(|s| s.blocks.iter().map(move |b| (s.series_id, b)))
            .filter(|(sid, b)| !b.is_tombstoned() && !tombstoned.contains(&(*sid, b.block_offset)))
            .count()
    }

    /// The file path this shard was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `true` once the shard has been superseded by a newer generation
    /// and should no longer accept new readers.
    pub fn is_superseded(&self) -> bool {
        self.header.status == ShardStatus::Superseded
    }

    pub(crate) fn block_bytes(&self, entry: &BlockEntry) -> Result<&[u8], ShardError> {
        let start = entry.block_offset as usize;
        let end = start + entry.block_len as usize;
        if end > self.view_len {
            return Err(ShardError::Internal("block index out of range".into()));
        }
        let body_start = start + BLOCK_LEN_SIZE;
        let body_end = end - BLOCK_CRC_SIZE;
        let declared_len = u32::from_le_bytes(
            self.mmap[start..body_start]
                .try_into()
                .map_err(|_| ShardError::Internal("block len slice conversion failed".into()))?,
        ) as usize;
        if body_end - body_start != declared_len {
            return Err(ShardError::Internal("block length mismatch".into()));
        }
        let stored_crc = u32::from_le_bytes(
            self.mmap[body_end..end]
                .try_into()
                .map_err(|_| ShardError::Internal("block crc slice conversion failed".into()))?,
        );
        let body = &self.mmap[body_start..body_end];
        let mut hasher = Crc32::new();
        hasher.update(body);
        if hasher.finalize() != stored_crc {
            return Err(ShardError::ChecksumMismatch);
        }
        Ok(body)
    }
}

#[derive(Debug)]
struct TombstoneRecord {
    series_id: u64,
    block_offset: u64,
}

impl Encode for TombstoneRecord {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.series_id.encode_to(buf)?;
        self.block_offset.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for TombstoneRecord {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (series_id, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (block_offset, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                series_id,
                block_offset,
            },
            offset,
        ))
    }
}

fn tombstone_sidecar_path(shard_path: &Path) -> PathBuf {
    shard_path.with_extension("tombstones")
}

fn load_tombstone_sidecar(shard_path: &Path) -> Result<Vec<(u64, u64)>, ShardError> {
    let sidecar = tombstone_sidecar_path(shard_path);
    match fs::read(&sidecar) {
        Ok(bytes) => {
            let (records, _) = encoding::decode_vec::<TombstoneRecord>(&bytes)?;
            Ok(records.into_iter().map(|r| (r.series_id, r.block_offset)).collect())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(ShardError::Io(e)),
    }
}

fn decode_footer(footer: &[u8]) -> Result<(u64, u32), ShardError> {
    if footer.len() != SHARD_FOOTER_SIZE {
        return Err(ShardError::Internal("footer size mismatch".into()));
    }
    let mut offset = 0;
    let (index_offset, n) = u64::decode_from(&footer[offset..])
        .map_err(|e| ShardError::Internal(format!("footer decode: {e}")))?;
    offset += n;
    let (index_len, n) = u32::decode_from(&footer[offset..])
        .map_err(|e| ShardError::Internal(format!("footer decode: {e}")))?;
    offset += n;
    let tail_magic_start = SHARD_FOOTER_SIZE - 4;
    let tail_magic: [u8; 4] = footer[tail_magic_start..]
        .try_into()
        .map_err(|_| ShardError::Internal("footer magic slice conversion failed".into()))?;
    if tail_magic != SHARD_MAGIC {
        return Err(ShardError::BadHeader("bad footer magic".into()));
    }
    let _ = offset;
    Ok((index_offset, index_len))
}

/// Encodes a `(duration_class, window_start)` pair into the 64-bit shard id
/// used as its file name, per spec.md §3's `Shard` identity.
pub fn shard_id(duration_class: u8, window_start: i64) -> u64 {
    ((duration_class as u64) << 56) | (window_start as u64 & 0x00FF_FFFF_FFFF_FFFF)
}

/// The window `[k*duration, (k+1)*duration)` containing `ts`.
pub fn window_start(ts: i64, duration_secs: u32) -> i64 {
    let duration = duration_secs as i64;
    ts.div_euclid(duration) * duration
}
