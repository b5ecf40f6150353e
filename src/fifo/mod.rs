//! Replication FIFO (spec.md §4.7).
//!
//! For every peer a local server replicates to, a FIFO directory holds
//! zero or more segment files named by a monotonic 64-bit id. Each
//! segment is a plain concatenation of [`crate::wire::Package`] frames —
//! the package's own length prefix is the FIFO's record framing, so no
//! extra length/CRC wrapper is needed (unlike [`crate::wal`], which
//! frames arbitrary `Encode`/`Decode` payloads that don't self-delimit).
//!
//! Delivery is tracked by a read cursor `(segment id, byte offset)`
//! persisted to a sidecar file next to the segments so that
//! `records_written - records_committed` survives a restart (spec.md §8
//! property 4). A segment is only unlinked once it has been fully
//! delivered *and* rotated past — the currently-active write segment is
//! never deleted out from under its own writer.

#[cfg(test)]
mod tests;

use std::{
    collections::VecDeque,
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::wire::{Package, WireError};

const CURSOR_FILENAME: &str = "cursor";

/// Errors returned by FIFO operations.
#[derive(Debug, Error)]
pub enum FifoError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A package frame failed to parse.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
}

/// Outcome of an [`Fifo::append`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The package was durably appended.
    Ok,
    /// The FIFO's hard cap is exceeded; the caller should fail the
    /// write with `replication-saturated` (spec.md §5, backpressure).
    NoFreeSpace,
}

struct Cursor {
    segment_id: u64,
    offset: u64,
}

impl Cursor {
    fn load(dir: &Path, fallback_segment: u64) -> Result<Self, FifoError> {
        let path = dir.join(CURSOR_FILENAME);
        match fs::read(&path) {
            Ok(bytes) if bytes.len() == 16 => {
                let segment_id = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
                let offset = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
                Ok(Self { segment_id, offset })
            }
            Ok(_) | Err(_) => Ok(Self { segment_id: fallback_segment, offset: 0 }),
        }
    }

    fn persist(&self, dir: &Path) -> Result<(), FifoError> {
        let mut bytes = Vec::with_capacity(16);
        bytes.extend_from_slice(&self.segment_id.to_le_bytes());
        bytes.extend_from_slice(&self.offset.to_le_bytes());
        let tmp = dir.join(format!("{CURSOR_FILENAME}.tmp"));
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, dir.join(CURSOR_FILENAME))?;
        Ok(())
    }
}

fn segment_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(id.to_string())
}

/// Lists segment ids present in `dir`, sorted ascending.
fn list_segments(dir: &Path) -> Result<VecDeque<u64>, FifoError> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str()
            && let Ok(id) = name.parse::<u64>()
        {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids.into())
}

/// Scans `path` for a truncated trailing package and truncates the file
/// to the last complete frame, returning the valid length.
fn truncate_partial_tail(path: &Path) -> Result<u64, FifoError> {
    let bytes = fs::read(path)?;
    let mut offset = 0usize;
    loop {
        match Package::parse_from(&bytes[offset..]) {
            Ok((_, consumed)) => offset += consumed,
            Err(_) => break,
        }
    }
    if offset != bytes.len() {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(offset as u64)?;
        file.sync_all()?;
        warn!(path = %path.display(), valid_len = offset, total_len = bytes.len(), "fifo: truncated partial tail");
    }
    Ok(offset as u64)
}

/// A peer's durable, ordered outbound replication queue.
pub struct Fifo {
    dir: PathBuf,
    segment_cap_bytes: u64,
    hard_cap_bytes: u64,
    segments: VecDeque<u64>,
    write_file: File,
    write_id: u64,
    write_len: u64,
    cursor: Cursor,
    /// Length of the last package returned by `peek`, not yet committed.
    pending_len: Option<u64>,
}

impl Fifo {
    /// Opens (or creates) the FIFO directory for one peer, truncating any
    /// partial tail left by a crash mid-append (spec.md §3 invariant 4).
    pub fn open(
        dir: impl AsRef<Path>,
        segment_cap_bytes: u64,
        hard_cap_bytes: u64,
    ) -> Result<Self, FifoError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut segments = list_segments(&dir)?;
        let write_id = if let Some(&last) = segments.back() {
            truncate_partial_tail(&segment_path(&dir, last))?;
            last
        } else {
            segments.push_back(0);
            0
        };

        let write_path = segment_path(&dir, write_id);
        let write_file = OpenOptions::new().create(true).append(true).read(true).open(&write_path)?;
        let write_len = write_file.metadata()?.len();

        let cursor = Cursor::load(&dir, segments.front().copied().unwrap_or(write_id))?;

        info!(
            dir = %dir.display(),
            segments = segments.len(),
            write_id,
            write_len,
            "fifo opened"
        );

        Ok(Self {
            dir,
            segment_cap_bytes,
            hard_cap_bytes,
            segments,
            write_file,
            write_id,
            write_len,
            cursor,
            pending_len: None,
        })
    }

    /// Total bytes across every segment still holding undelivered data.
    pub fn total_bytes(&self) -> Result<u64, FifoError> {
        let mut total = 0u64;
        for &id in &self.segments {
            let len = if id == self.write_id {
                self.write_len
            } else {
                fs::metadata(segment_path(&self.dir, id))?.len()
            };
            if id == self.cursor.segment_id {
                total += len.saturating_sub(self.cursor.offset);
            } else {
                total += len;
            }
        }
        Ok(total)
    }

    /// Appends one package, rolling to a new segment if the active one
    /// would exceed `segment_cap_bytes`, and refusing if `hard_cap_bytes`
    /// is already exceeded.
    pub fn append(&mut self, pkg: &Package) -> Result<AppendOutcome, FifoError> {
        if self.total_bytes()? >= self.hard_cap_bytes {
            return Ok(AppendOutcome::NoFreeSpace);
        }

        let bytes = pkg.to_vec()?;
        if self.write_len > 0 && self.write_len + bytes.len() as u64 > self.segment_cap_bytes {
            self.roll_segment()?;
        }

        self.write_file.write_all(&bytes)?;
        self.write_file.sync_all()?;
        self.write_len += bytes.len() as u64;
        Ok(AppendOutcome::Ok)
    }

    fn roll_segment(&mut self) -> Result<(), FifoError> {
        let next_id = self.write_id + 1;
        let file = OpenOptions::new().create(true).append(true).read(true).open(segment_path(&self.dir, next_id))?;
        self.write_file = file;
        self.write_id = next_id;
        self.write_len = 0;
        self.segments.push_back(next_id);
        debug!(dir = %self.dir.display(), next_id, "fifo: rolled to new segment");
        Ok(())
    }

    /// Returns the oldest undelivered package without consuming it.
    /// Returns `None` once every segment has been fully delivered.
    pub fn peek(&mut self) -> Result<Option<Package>, FifoError> {
        loop {
            let Some(&front_id) = self.segments.front() else {
                self.pending_len = None;
                return Ok(None);
            };
            let read_offset = if self.cursor.segment_id == front_id { self.cursor.offset } else { 0 };

            let path = segment_path(&self.dir, front_id);
            let len = if front_id == self.write_id { self.write_len } else { fs::metadata(&path)?.len() };
            if read_offset >= len {
                if front_id == self.write_id {
                    self.pending_len = None;
                    return Ok(None);
                }
                // Fully delivered, rolled-past segment: unlink and advance.
                self.segments.pop_front();
                let _ = fs::remove_file(&path);
                self.cursor = Cursor {
                    segment_id: self.segments.front().copied().unwrap_or(self.write_id),
                    offset: 0,
                };
                self.cursor.persist(&self.dir)?;
                continue;
            }

            let mut file = File::open(&path)?;
            file.seek(SeekFrom::Start(read_offset))?;
            let mut buf = vec![0u8; (len - read_offset) as usize];
            file.read_exact(&mut buf)?;
            let (pkg, consumed) = Package::parse_from(&buf)?;
            self.cursor.segment_id = front_id;
            self.pending_len = Some(consumed as u64);
            return Ok(Some(pkg));
        }
    }

    /// Marks the last peeked package as delivered, advancing the read
    /// cursor durably. Returns an error if called without a prior
    /// successful `peek`.
    pub fn commit(&mut self) -> Result<(), FifoError> {
        let Some(consumed) = self.pending_len.take() else {
            return Ok(());
        };
        self.cursor.offset += consumed;

        if self.cursor.segment_id != self.write_id {
            let path = segment_path(&self.dir, self.cursor.segment_id);
            let len = fs::metadata(&path)?.len();
            if self.cursor.offset >= len {
                self.segments.pop_front();
                let _ = fs::remove_file(&path);
                self.cursor = Cursor {
                    segment_id: self.segments.front().copied().unwrap_or(self.write_id),
                    offset: 0,
                };
            }
        }
        self.cursor.persist(&self.dir)
    }

    /// Number of segment files currently on disk for this peer.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }
}
