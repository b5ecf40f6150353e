//! Shard writer — builds a complete, immutable shard file from per-series
//! runs of points.
//!
//! # Atomicity
//!
//! 1. Write header, blocks, and index to `path.tmp`.
//! 2. Flush and sync the file.
//! 3. Rename `path.tmp` → `path` atomically.
//!
//! A crash during construction leaves only an orphaned `.tmp` file; the
//! shard at `path` either doesn't exist yet or is the complete, previous
//! version. The optimizer relies on exactly this property when rewriting a
//! shard in place (by path).

use std::{
    collections::BTreeMap,
    fs::{File, OpenOptions, rename},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use crc32fast::Hasher as Crc32;

use crate::encoding::{self, Decode, Encode};

use super::{
    BLOCK_CRC_SIZE, BLOCK_LEN_SIZE, BlockEntry, Point, PointType, PointValue, SHARD_FOOTER_SIZE,
    SHARD_HEADER_SIZE, SeriesIndex, ShardError, ShardHeader,
};

/// Maximum number of points packed into a single block before it is
/// flushed and a new one started.
const MAX_BLOCK_POINTS: usize = 2048;

/// Builds a shard file from one or more series, each fed a sorted (by
/// timestamp) stream of points.
pub struct ShardWriter {
    path: PathBuf,
    tmp_path: PathBuf,
    file: BufWriter<File>,
    header: ShardHeader,
    offset: u64,
    index: BTreeMap<u64, Vec<BlockEntry>>,
    pending: BTreeMap<u64, (PointType, Vec<Point>)>,
}

impl ShardWriter {
    /// Creates a new shard writer at `path`, writing through a sibling
    /// `.tmp` file until [`finish`](Self::finish) is called.
    pub fn create<P: AsRef<Path>>(path: P, header: ShardHeader) -> Result<Self, ShardError> {
        let path = path.as_ref().to_path_buf();
        let tmp_path = path.with_extension("shard.tmp");

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut file = BufWriter::new(file);

        let mut header_bytes = Vec::with_capacity(SHARD_HEADER_SIZE);
        header.encode_to(&mut header_bytes)?;
        debug_assert_eq!(header_bytes.len(), SHARD_HEADER_SIZE);
        file.write_all(&header_bytes)?;

        Ok(Self {
            path,
            tmp_path,
            file,
            header,
            offset: SHARD_HEADER_SIZE as u64,
            index: BTreeMap::new(),
            pending: BTreeMap::new(),
        })
    }

    /// Appends one point for `series_id`. Points for a given series must
    /// arrive in non-decreasing timestamp order and must match the type of
    /// any prior point pushed for that series in this shard.
    pub fn push(&mut self, series_id: u64, point: Point) -> Result<(), ShardError> {
        let point_type = point.value.point_type();
        let entry = self
            .pending
            .entry(series_id)
            .or_insert_with(|| (point_type, Vec::new()));
        if entry.1.is_empty() {
            entry.0 = point_type;
        } else if entry.0 != point_type {
            return Err(ShardError::Internal(format!(
                "point type mismatch for series {series_id}: first block is {:?}, point is {:?}",
                entry.0, point_type
            )));
        }
        entry.1.push(point);
        if entry.1.len() >= MAX_BLOCK_POINTS {
            self.flush_block(series_id)?;
        }
        Ok(())
    }

    /// Appends every point from an already-sorted slice for `series_id`.
    pub fn push_all(
        &mut self,
        series_id: u64,
        points: impl IntoIterator<Item = Point>,
    ) -> Result<(), ShardError> {
        for point in points {
            self.push(series_id, point)?;
        }
        Ok(())
    }

    fn flush_block(&mut self, series_id: u64) -> Result<(), ShardError> {
        let Some((point_type, points)) = self.pending.get_mut(&series_id) else {
            return Ok(());
        };
        if points.is_empty() {
            return Ok(());
        }
        let point_type = *point_type;
        let points = std::mem::take(points);
        let first_ts = points
            .first()
            .ok_or_else(|| ShardError::Internal("flush_block: empty points".into()))?
            .ts;
        let last_ts = points
            .last()
            .ok_or_else(|| ShardError::Internal("flush_block: empty points".into()))?
            .ts;
        let point_count = points.len() as u32;

        let body = encode_block(&points, point_type)?;
        let body_len = u32::try_from(body.len())
            .map_err(|_| ShardError::Internal("block too large".into()))?;

        let mut crc = Crc32::new();
        crc.update(&body);
        let crc = crc.finalize();

        let block_offset = self.offset;
        self.file.write_all(&body_len.to_le_bytes())?;
        self.file.write_all(&body)?;
        self.file.write_all(&crc.to_le_bytes())?;

        let block_len = (BLOCK_LEN_SIZE + body.len() + BLOCK_CRC_SIZE) as u32;
        self.offset += block_len as u64;

        self.index.entry(series_id).or_default().push(BlockEntry::new(
            block_offset,
            block_len,
            point_count,
            first_ts,
            last_ts,
            point_type,
        ));
        Ok(())
    }

    /// Flushes any pending points for every series, writes the index and
    /// footer, and atomically renames the `.tmp` file into place.
    pub fn finish(mut self) -> Result<(), ShardError> {
        let series_ids: Vec<u64> = self.pending.keys().copied().collect();
        for series_id in series_ids {
            self.flush_block(series_id)?;
        }

        let series_index: Vec<SeriesIndex> = self
            .index
            .into_iter()
            .map(|(series_id, blocks)| SeriesIndex { series_id, blocks })
            .collect();

        let index_offset = self.offset;
        let index_bytes = {
            let mut buf = Vec::new();
            encoding::encode_vec(&series_index, &mut buf)?;
            buf
        };
        let index_len = u32::try_from(index_bytes.len())
            .map_err(|_| ShardError::Internal("index too large".into()))?;

        let mut crc = Crc32::new();
        crc.update(&index_bytes);
        let crc = crc.finalize();

        self.file.write_all(&index_bytes)?;
        self.file.write_all(&crc.to_le_bytes())?;

        let mut footer = Vec::with_capacity(SHARD_FOOTER_SIZE);
        index_offset.encode_to(&mut footer)?;
        index_len.encode_to(&mut footer)?;
        while footer.len() < SHARD_FOOTER_SIZE - 4 {
            footer.push(0);
        }
        footer.extend_from_slice(&super::SHARD_MAGIC_FOR_FOOTER);
        debug_assert_eq!(footer.len(), SHARD_FOOTER_SIZE);
        self.file.write_all(&footer)?;

        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        drop(self.file);

        rename(&self.tmp_path, &self.path)?;
        let _ = &self.header;
        Ok(())
    }
}

/// Encodes a run of points into a single compressed block.
///
/// Numeric series (integer/float) use delta-of-delta timestamp encoding
/// (each timestamp delta stored relative to the previous delta, which is
/// usually zero or small for regularly-sampled series) plus XOR-of-previous
/// value encoding (consecutive samples of a slowly-changing series XOR to
/// mostly-zero bit patterns). String series store each point as a plain
/// `[i64 ts][String value]` pair — string payloads don't benefit from the
/// numeric compression scheme.
pub(crate) fn encode_block(points: &[Point], point_type: PointType) -> Result<Vec<u8>, ShardError> {
    let mut buf = Vec::new();
    (points.len() as u32).encode_to(&mut buf)?;

    match point_type {
        PointType::String => {
            for p in points {
                p.ts.encode_to(&mut buf)?;
                match &p.value {
                    PointValue::String(s) => s.encode_to(&mut buf)?,
                    _ => {
                        return Err(ShardError::Internal(
                            "string block contains non-string point".into(),
                        ));
                    }
                }
            }
        }
        PointType::Integer => {
            let mut prev_ts: i64 = 0;
            let mut prev_delta: i64 = 0;
            let mut prev_value: u64 = 0;
            for (i, p) in points.iter().enumerate() {
                let value_bits = match p.value {
                    PointValue::Integer(v) => v as u64,
                    _ => {
                        return Err(ShardError::Internal(
                            "integer block contains non-integer point".into(),
                        ));
                    }
                };
                if i == 0 {
                    p.ts.encode_to(&mut buf)?;
                    value_bits.encode_to(&mut buf)?;
                } else {
                    let delta = p.ts - prev_ts;
                    let dod = delta - prev_delta;
                    dod.encode_to(&mut buf)?;
                    (value_bits ^ prev_value).encode_to(&mut buf)?;
                    prev_delta = delta;
                }
                prev_ts = p.ts;
                prev_value = value_bits;
            }
        }
        PointType::Float => {
            let mut prev_ts: i64 = 0;
            let mut prev_delta: i64 = 0;
            let mut prev_bits: u64 = 0;
            for (i, p) in points.iter().enumerate() {
                let bits = match p.value {
                    PointValue::Float(v) => v.to_bits(),
                    _ => {
                        return Err(ShardError::Internal(
                            "float block contains non-float point".into(),
                        ));
                    }
                };
                if i == 0 {
                    p.ts.encode_to(&mut buf)?;
                    bits.encode_to(&mut buf)?;
                } else {
                    let delta = p.ts - prev_ts;
                    let dod = delta - prev_delta;
                    dod.encode_to(&mut buf)?;
                    (bits ^ prev_bits).encode_to(&mut buf)?;
                    prev_delta = delta;
                }
                prev_ts = p.ts;
                prev_bits = bits;
            }
        }
    }

    Ok(buf)
}

/// Decodes a block written by [`encode_block`] back into points.
pub(crate) fn decode_block(buf: &[u8], point_type: PointType) -> Result<Vec<Point>, ShardError> {
    let (count, mut offset) = u32::decode_from(buf)?;
    let count = count as usize;
    let mut points = Vec::with_capacity(count);

    match point_type {
        PointType::String => {
            for _ in 0..count {
                let (ts, n) = i64::decode_from(&buf[offset..])?;
                offset += n;
                let (s, n) = String::decode_from(&buf[offset..])?;
                offset += n;
                points.push(Point {
                    ts,
                    value: PointValue::String(s),
                });
            }
        }
        PointType::Integer => {
            let mut prev_ts: i64 = 0;
            let mut prev_delta: i64 = 0;
            let mut prev_value: u64 = 0;
            for i in 0..count {
                if i == 0 {
                    let (ts, n) = i64::decode_from(&buf[offset..])?;
                    offset += n;
                    let (v, n) = u64::decode_from(&buf[offset..])?;
                    offset += n;
                    prev_ts = ts;
                    prev_value = v;
                    points.push(Point {
                        ts,
                        value: PointValue::Integer(v as i64),
                    });
                } else {
                    let (dod, n) = i64::decode_from(&buf[offset..])?;
                    offset += n;
                    let (xor, n) = u64::decode_from(&buf[offset..])?;
                    offset += n;
                    let delta = prev_delta + dod;
                    let ts = prev_ts + delta;
                    let value = prev_value ^ xor;
                    prev_ts = ts;
                    prev_delta = delta;
                    prev_value = value;
                    points.push(Point {
                        ts,
                        value: PointValue::Integer(value as i64),
                    });
                }
            }
        }
        PointType::Float => {
            let mut prev_ts: i64 = 0;
            let mut prev_delta: i64 = 0;
            let mut prev_bits: u64 = 0;
            for i in 0..count {
                if i == 0 {
                    let (ts, n) = i64::decode_from(&buf[offset..])?;
                    offset += n;
                    let (bits, n) = u64::decode_from(&buf[offset..])?;
                    offset += n;
                    prev_ts = ts;
                    prev_bits = bits;
                    points.push(Point {
                        ts,
                        value: PointValue::Float(f64::from_bits(bits)),
                    });
                } else {
                    let (dod, n) = i64::decode_from(&buf[offset..])?;
                    offset += n;
                    let (xor, n) = u64::decode_from(&buf[offset..])?;
                    offset += n;
                    let delta = prev_delta + dod;
                    let ts = prev_ts + delta;
                    let bits = prev_bits ^ xor;
                    prev_ts = ts;
                    prev_delta = delta;
                    prev_bits = bits;
                    points.push(Point {
                        ts,
                        value: PointValue::Float(f64::from_bits(bits)),
                    });
                }
            }
        }
    }

    Ok(points)
}
