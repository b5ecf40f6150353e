//! Incremental shard appends — the path buffersync uses to land new
//! blocks into a shard without rewriting the whole file, per spec.md
//! §4.3's `append_block` operation.
//!
//! # Crash safety
//!
//! Appending grows the file past its last durable length, then rewrites
//! the (cheap, index-sized) index and footer at the new tail, `fsync`s
//! everything, and only then atomically swaps a tiny `<shard>.committed`
//! sidecar (written to a `.tmp` path and renamed into place) to point at
//! the new length. A crash at any point before that rename leaves the
//! sidecar pointing at the previous length; [`ShardAppender::open_or_create`]
//! truncates the file back to that length on next open, discarding
//! whatever partial tail was left — exactly spec.md §4.3's "on failure,
//! the partial tail is truncated at next open".
//!
//! The index itself is always rewritten in full at the new tail (not
//! edited in place), matching spec.md §4.3's "a full rewrite moves the
//! index to a new location" — here that rewrite is just the (small) index,
//! not the (large) block data.

use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use crc32fast::Hasher as Crc32;

use crate::encoding::{self, Decode, Encode};

use super::builder;
use super::{
    BLOCK_CRC_SIZE, BLOCK_LEN_SIZE, BlockEntry, Point, PointType, SHARD_FOOTER_SIZE,
    SHARD_HEADER_SIZE, SeriesIndex, ShardError, ShardHeader,
};

pub(crate) fn committed_sidecar_path(shard_path: &Path) -> PathBuf {
    shard_path.with_extension("committed")
}

/// Reads the durable length recorded by the last successful commit, or
/// the file's actual length if no sidecar exists yet (a shard written in
/// one shot by [`super::ShardWriter`] has no incremental commits).
pub(crate) fn read_committed_len(shard_path: &Path, actual_len: u64) -> Result<u64, ShardError> {
    let sidecar = committed_sidecar_path(shard_path);
    match fs::read(&sidecar) {
        Ok(bytes) if bytes.len() == 12 => {
            let len = u64::from_le_bytes(bytes[0..8].try_into().map_err(|_| {
                ShardError::Internal("committed sidecar length slice conversion failed".into())
            })?);
            let stored_crc = u32::from_le_bytes(bytes[8..12].try_into().map_err(|_| {
                ShardError::Internal("committed sidecar crc slice conversion failed".into())
            })?);
            let mut hasher = Crc32::new();
            hasher.update(&bytes[0..8]);
            if hasher.finalize() != stored_crc {
                return Err(ShardError::ChecksumMismatch);
            }
            Ok(len.min(actual_len))
        }
        Ok(_) => Err(ShardError::Internal("malformed committed sidecar".into())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(actual_len),
        Err(e) => Err(ShardError::Io(e)),
    }
}

fn write_committed_len(shard_path: &Path, len: u64) -> Result<(), ShardError> {
    let mut buf = Vec::with_capacity(12);
    buf.extend_from_slice(&len.to_le_bytes());
    let mut hasher = Crc32::new();
    hasher.update(&len.to_le_bytes());
    buf.extend_from_slice(&hasher.finalize().to_le_bytes());

    let sidecar = committed_sidecar_path(shard_path);
    let tmp = sidecar.with_extension("committed.tmp");
    fs::write(&tmp, &buf)?;
    fs::rename(&tmp, &sidecar)?;
    Ok(())
}

/// Incremental writer for a shard file that may already exist and have
/// live blocks from earlier append cycles.
pub struct ShardAppender {
    path: PathBuf,
    file: File,
    header: ShardHeader,
    index: BTreeMap<u64, Vec<BlockEntry>>,
    /// File length as of the last successful [`commit`](Self::commit) (or
    /// at open, if no append has happened yet this session).
    committed_len: u64,
    /// Write cursor for the in-progress batch; advances with each
    /// [`append_block`](Self::append_block) call and is only made durable
    /// by `commit`.
    cursor: u64,
    /// Whether any block has been appended since the last commit.
    dirty: bool,
}

impl ShardAppender {
    /// Opens an existing shard for appending, or creates a new one with
    /// `header` if `path` doesn't exist yet.
    pub fn open_or_create(path: impl AsRef<Path>, header: ShardHeader) -> Result<Self, ShardError> {
        let path = path.as_ref().to_path_buf();

        if path.exists() {
            let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
            let actual_len = file.metadata()?.len();
            let committed_len = read_committed_len(&path, actual_len)?;
            file.set_len(committed_len)?;

            if committed_len < SHARD_HEADER_SIZE as u64 + SHARD_FOOTER_SIZE as u64 {
                return Err(ShardError::MissingFooter);
            }

            let mut header_bytes = vec![0u8; SHARD_HEADER_SIZE];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut header_bytes)?;
            let header = ShardHeader::decode_from(&header_bytes)?;

            let mut footer_bytes = vec![0u8; SHARD_FOOTER_SIZE];
            file.seek(SeekFrom::Start(committed_len - SHARD_FOOTER_SIZE as u64))?;
            file.read_exact(&mut footer_bytes)?;
            let (index_offset, index_len) = super::decode_footer(&footer_bytes)?;

            let mut index_bytes = vec![0u8; index_len as usize];
            file.seek(SeekFrom::Start(index_offset))?;
            file.read_exact(&mut index_bytes)?;
            let mut index_crc_bytes = [0u8; BLOCK_CRC_SIZE];
            file.read_exact(&mut index_crc_bytes)?;
            let stored_crc = u32::from_le_bytes(index_crc_bytes);
            let mut hasher = Crc32::new();
            hasher.update(&index_bytes);
            if hasher.finalize() != stored_crc {
                return Err(ShardError::ChecksumMismatch);
            }
            let (series_index, _) = encoding::decode_vec::<SeriesIndex>(&index_bytes)?;
            let index = series_index
                .into_iter()
                .map(|s| (s.series_id, s.blocks))
                .collect();

            Ok(Self {
                path,
                file,
                header,
                index,
                committed_len,
                cursor: index_offset,
                dirty: false,
            })
        } else {
            let mut file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(true)
                .open(&path)?;
            let mut header_bytes = Vec::with_capacity(SHARD_HEADER_SIZE);
            header.encode_to(&mut header_bytes)?;
            file.write_all(&header_bytes)?;
            file.flush()?;

            Ok(Self {
                path,
                file,
                header,
                index: BTreeMap::new(),
                committed_len: SHARD_HEADER_SIZE as u64,
                cursor: SHARD_HEADER_SIZE as u64,
                dirty: false,
            })
        }
    }

    /// The shard header as last seen (duration class, window, generation).
    pub fn header(&self) -> &ShardHeader {
        &self.header
    }

    /// Appends one block of points for `series_id` to the in-progress
    /// batch. Not durable until [`commit`](Self::commit) succeeds.
    pub fn append_block(
        &mut self,
        series_id: u64,
        points: &[Point],
        point_type: PointType,
    ) -> Result<u64, ShardError> {
        if points.is_empty() {
            return Err(ShardError::Internal("append_block: empty points".into()));
        }
        let first_ts = points[0].ts;
        let last_ts = points[points.len() - 1].ts;
        let point_count = points.len() as u32;

        let body = builder::encode_block(points, point_type)?;
        let body_len = u32::try_from(body.len())
            .map_err(|_| ShardError::Internal("block too large".into()))?;
        let mut crc = Crc32::new();
        crc.update(&body);
        let crc = crc.finalize();

        let block_offset = self.cursor;
        self.file.seek(SeekFrom::Start(block_offset))?;
        self.file.write_all(&body_len.to_le_bytes())?;
        self.file.write_all(&body)?;
        self.file.write_all(&crc.to_le_bytes())?;

        let block_len = (BLOCK_LEN_SIZE + body.len() + BLOCK_CRC_SIZE) as u32;
        self.cursor += block_len as u64;
        self.dirty = true;

        self.index
            .entry(series_id)
            .or_default()
            .push(BlockEntry::new(
                block_offset,
                block_len,
                point_count,
                first_ts,
                last_ts,
                point_type,
            ));

        Ok(block_offset)
    }

    /// Rewrites the index and footer at the new tail, `fsync`s the shard
    /// file, then atomically publishes the new committed length. Returns
    /// `false` (no-op) if nothing was appended since the last commit.
    pub fn commit(&mut self) -> Result<bool, ShardError> {
        if !self.dirty {
            return Ok(false);
        }

        let series_index: Vec<SeriesIndex> = self
            .index
            .iter()
            .map(|(series_id, blocks)| SeriesIndex {
                series_id: *series_id,
                blocks: blocks.clone(),
            })
            .collect();

        let index_offset = self.cursor;
        let mut index_bytes = Vec::new();
        encoding::encode_vec(&series_index, &mut index_bytes)?;
        let index_len = u32::try_from(index_bytes.len())
            .map_err(|_| ShardError::Internal("index too large".into()))?;

        let mut crc = Crc32::new();
        crc.update(&index_bytes);
        let crc = crc.finalize();

        self.file.seek(SeekFrom::Start(index_offset))?;
        self.file.write_all(&index_bytes)?;
        self.file.write_all(&crc.to_le_bytes())?;

        let mut footer = Vec::with_capacity(SHARD_FOOTER_SIZE);
        index_offset.encode_to(&mut footer)?;
        index_len.encode_to(&mut footer)?;
        while footer.len() < SHARD_FOOTER_SIZE - 4 {
            footer.push(0);
        }
        footer.extend_from_slice(&super::SHARD_MAGIC_FOR_FOOTER);
        self.file.write_all(&footer)?;
        self.file.sync_all()?;

        let new_len = index_offset + index_bytes.len() as u64 + BLOCK_CRC_SIZE as u64 + SHARD_FOOTER_SIZE as u64;
        write_committed_len(&self.path, new_len)?;

        self.committed_len = new_len;
        self.cursor = index_offset; // next batch's first block overwrites this index copy
        self.dirty = false;
        Ok(true)
    }

    /// The path this appender writes to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
