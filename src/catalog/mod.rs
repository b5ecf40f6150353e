//! Series catalog.
//!
//! The catalog is the server's metadata authority for every series it
//! knows about: name, point type, point count, time bounds, and the set
//! of shards holding its data (spec.md §4.5). It is persisted as an
//! append-only WAL of mutation events, periodically checkpointed to a
//! snapshot, the way the teacher's manifest persists SSTable metadata —
//! except the catalog's events are `{create, drop, retype}` series
//! lifecycle records (plus the shard-residency and stats updates
//! buffersync and the optimizer need to keep the index current) rather
//! than SSTable bookkeeping.
//!
//! # Regex scans
//!
//! `siridb_build_index` is declared but never defined in the original
//! source; spec.md §9 flags this as an open question. We resolve it (see
//! `SPEC_FULL.md` §4) as a lock-free snapshot vector of `(name, id)` pairs
//! that [`Catalog::scan`] filters against a caller-supplied predicate —
//! the same atomically-swapped-pointer pattern [`crate::lookup::Lookup`]
//! uses for the pool table, so a scan never blocks a concurrent mutation
//! and vice versa.

#[cfg(test)]
mod tests;

use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::shard::PointType;
use crate::wal::{Wal, WalError};

const WAL_FILENAME: &str = "wal-000000.log";
const SNAPSHOT_FILENAME: &str = "CATALOG-SNAPSHOT";

/// Errors returned by catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Underlying WAL I/O failure.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding/decoding error.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// A series name is already registered.
    #[error("series {0:?} already exists")]
    AlreadyExists(String),

    /// No series with that name or id is known to this catalog.
    #[error("unknown series {0:?}")]
    NotFound(String),

    /// Internal invariant violation or poisoned lock.
    #[error("internal error: {0}")]
    Internal(String),
}

/// A series' point type, mirroring [`crate::shard::PointType`] but owned by
/// the catalog so the two modules don't need to agree on representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesType {
    /// 64-bit signed integers.
    Integer,
    /// 64-bit floats.
    Float,
    /// UTF-8 strings.
    String,
}

impl From<SeriesType> for PointType {
    fn from(t: SeriesType) -> Self {
        match t {
            SeriesType::Integer => PointType::Integer,
            SeriesType::Float => PointType::Float,
            SeriesType::String => PointType::String,
        }
    }
}

impl From<PointType> for SeriesType {
    fn from(t: PointType) -> Self {
        match t {
            PointType::Integer => SeriesType::Integer,
            PointType::Float => SeriesType::Float,
            PointType::String => SeriesType::String,
        }
    }
}

impl SeriesType {
    fn to_tag(self) -> u8 {
        match self {
            SeriesType::Integer => 0,
            SeriesType::Float => 1,
            SeriesType::String => 2,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, EncodingError> {
        match tag {
            0 => Ok(SeriesType::Integer),
            1 => Ok(SeriesType::Float),
            2 => Ok(SeriesType::String),
            other => Err(EncodingError::InvalidTag {
                tag: other as u32,
                type_name: "SeriesType",
            }),
        }
    }
}

impl Encode for SeriesType {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.to_tag().encode_to(buf)
    }
}

impl Decode for SeriesType {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, n) = u8::decode_from(buf)?;
        Ok((Self::from_tag(tag)?, n))
    }
}

/// One series known to this server (spec.md §3's `Series` entity).
#[derive(Debug, Clone)]
pub struct Series {
    /// Unique, server-local series id.
    pub id: u64,
    /// Unique series name.
    pub name: String,
    /// Point type.
    pub series_type: SeriesType,
    /// Duration class every shard holding this series' data uses.
    pub duration_class: u8,
    /// Pool this series is owned by (usually this server's own pool,
    /// except transiently during a reindex).
    pub pool_id: u16,
    /// Total committed point count (buffer contents not included).
    pub point_count: u64,
    /// Earliest committed timestamp, if any data has landed yet.
    pub first_ts: Option<i64>,
    /// Latest committed timestamp, if any data has landed yet.
    pub last_ts: Option<i64>,
    /// Shard ids known to hold at least one live block for this series,
    /// in the order blocks were recorded.
    pub shard_ids: Vec<u64>,
}

impl Series {
    fn apply_stats(&mut self, point_count_delta: u64, first_ts: i64, last_ts: i64) {
        self.point_count += point_count_delta;
        self.first_ts = Some(self.first_ts.map_or(first_ts, |t| t.min(first_ts)));
        self.last_ts = Some(self.last_ts.map_or(last_ts, |t| t.max(last_ts)));
    }
}

/// One durable mutation to the catalog's append-only event log.
#[derive(Debug, Clone)]
pub(crate) enum CatalogEvent {
    Create {
        id: u64,
        name: String,
        series_type: SeriesType,
        duration_class: u8,
        pool_id: u16,
    },
    Drop {
        id: u64,
    },
    Retype {
        id: u64,
        series_type: SeriesType,
    },
    RecordShard {
        id: u64,
        shard_id: u64,
    },
    UpdateStats {
        id: u64,
        point_count_delta: u64,
        first_ts: i64,
        last_ts: i64,
    },
}

impl Encode for CatalogEvent {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            CatalogEvent::Create {
                id,
                name,
                series_type,
                duration_class,
                pool_id,
            } => {
                0u32.encode_to(buf)?;
                id.encode_to(buf)?;
                name.encode_to(buf)?;
                series_type.encode_to(buf)?;
                duration_class.encode_to(buf)?;
                pool_id.encode_to(buf)?;
            }
            CatalogEvent::Drop { id } => {
                1u32.encode_to(buf)?;
                id.encode_to(buf)?;
            }
            CatalogEvent::Retype { id, series_type } => {
                2u32.encode_to(buf)?;
                id.encode_to(buf)?;
                series_type.encode_to(buf)?;
            }
            CatalogEvent::RecordShard { id, shard_id } => {
                3u32.encode_to(buf)?;
                id.encode_to(buf)?;
                shard_id.encode_to(buf)?;
            }
            CatalogEvent::UpdateStats {
                id,
                point_count_delta,
                first_ts,
                last_ts,
            } => {
                4u32.encode_to(buf)?;
                id.encode_to(buf)?;
                point_count_delta.encode_to(buf)?;
                first_ts.encode_to(buf)?;
                last_ts.encode_to(buf)?;
            }
        }
        Ok(())
    }
}

impl Decode for CatalogEvent {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (tag, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        match tag {
            0 => {
                let (id, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                let (name, n) = String::decode_from(&buf[offset..])?;
                offset += n;
                let (series_type, n) = SeriesType::decode_from(&buf[offset..])?;
                offset += n;
                let (duration_class, n) = u8::decode_from(&buf[offset..])?;
                offset += n;
                let (pool_id, n) = u16::decode_from(&buf[offset..])?;
                offset += n;
                Ok((
                    CatalogEvent::Create {
                        id,
                        name,
                        series_type,
                        duration_class,
                        pool_id,
                    },
                    offset,
                ))
            }
            1 => {
                let (id, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((CatalogEvent::Drop { id }, offset))
            }
            2 => {
                let (id, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                let (series_type, n) = SeriesType::decode_from(&buf[offset..])?;
                offset += n;
                Ok((CatalogEvent::Retype { id, series_type }, offset))
            }
            3 => {
                let (id, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                let (shard_id, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((CatalogEvent::RecordShard { id, shard_id }, offset))
            }
            4 => {
                let (id, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                let (point_count_delta, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                let (first_ts, n) = i64::decode_from(&buf[offset..])?;
                offset += n;
                let (last_ts, n) = i64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((
                    CatalogEvent::UpdateStats {
                        id,
                        point_count_delta,
                        first_ts,
                        last_ts,
                    },
                    offset,
                ))
            }
            other => Err(EncodingError::InvalidTag {
                tag: other,
                type_name: "CatalogEvent",
            }),
        }
    }
}

/// In-memory state rebuilt from the event log (and, when present, a
/// snapshot) at startup.
#[derive(Debug, Default, Clone)]
struct CatalogState {
    by_id: HashMap<u64, Series>,
    by_name: HashMap<String, u64>,
    next_id: u64,
}

impl CatalogState {
    fn apply(&mut self, event: &CatalogEvent) {
        match event.clone() {
            CatalogEvent::Create {
                id,
                name,
                series_type,
                duration_class,
                pool_id,
            } => {
                self.by_name.insert(name.clone(), id);
                self.by_id.insert(
                    id,
                    Series {
                        id,
                        name,
                        series_type,
                        duration_class,
                        pool_id,
                        point_count: 0,
                        first_ts: None,
                        last_ts: None,
                        shard_ids: Vec::new(),
                    },
                );
                self.next_id = self.next_id.max(id + 1);
            }
            CatalogEvent::Drop { id } => {
                if let Some(series) = self.by_id.remove(&id) {
                    self.by_name.remove(&series.name);
                }
            }
            CatalogEvent::Retype { id, series_type } => {
                if let Some(series) = self.by_id.get_mut(&id) {
                    series.series_type = series_type;
                }
            }
            CatalogEvent::RecordShard { id, shard_id } => {
                if let Some(series) = self.by_id.get_mut(&id)
                    && !series.shard_ids.contains(&shard_id)
                {
                    series.shard_ids.push(shard_id);
                }
            }
            CatalogEvent::UpdateStats {
                id,
                point_count_delta,
                first_ts,
                last_ts,
            } => {
                if let Some(series) = self.by_id.get_mut(&id) {
                    series.apply_stats(point_count_delta, first_ts, last_ts);
                }
            }
        }
    }
}

impl Encode for CatalogState {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        let mut series: Vec<&Series> = self.by_id.values().collect();
        series.sort_by_key(|s| s.id);
        (series.len() as u32).encode_to(buf)?;
        for s in series {
            s.id.encode_to(buf)?;
            s.name.encode_to(buf)?;
            s.series_type.encode_to(buf)?;
            s.duration_class.encode_to(buf)?;
            s.pool_id.encode_to(buf)?;
            s.point_count.encode_to(buf)?;
            s.first_ts.unwrap_or(i64::MIN).encode_to(buf)?;
            s.last_ts.unwrap_or(i64::MIN).encode_to(buf)?;
            encoding::encode_vec(&s.shard_ids, buf)?;
        }
        self.next_id.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for CatalogState {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (count, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let mut by_id = HashMap::with_capacity(count as usize);
        let mut by_name = HashMap::with_capacity(count as usize);
        for _ in 0..count {
            let (id, n) = u64::decode_from(&buf[offset..])?;
            offset += n;
            let (name, n) = String::decode_from(&buf[offset..])?;
            offset += n;
            let (series_type, n) = SeriesType::decode_from(&buf[offset..])?;
            offset += n;
            let (duration_class, n) = u8::decode_from(&buf[offset..])?;
            offset += n;
            let (pool_id, n) = u16::decode_from(&buf[offset..])?;
            offset += n;
            let (point_count, n) = u64::decode_from(&buf[offset..])?;
            offset += n;
            let (first_ts_raw, n) = i64::decode_from(&buf[offset..])?;
            offset += n;
            let (last_ts_raw, n) = i64::decode_from(&buf[offset..])?;
            offset += n;
            let (shard_ids, n) = encoding::decode_vec::<u64>(&buf[offset..])?;
            offset += n;

            by_name.insert(name.clone(), id);
            by_id.insert(
                id,
                Series {
                    id,
                    name,
                    series_type,
                    duration_class,
                    pool_id,
                    point_count,
                    first_ts: (first_ts_raw != i64::MIN).then_some(first_ts_raw),
                    last_ts: (last_ts_raw != i64::MIN).then_some(last_ts_raw),
                    shard_ids,
                },
            );
        }
        let (next_id, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                by_id,
                by_name,
                next_id,
            },
            offset,
        ))
    }
}

/// The series catalog: all series known to this server, persisted as an
/// append-only event log with periodic snapshot compaction.
pub struct Catalog {
    dir: PathBuf,
    wal: Mutex<Wal<CatalogEvent>>,
    state: RwLock<CatalogState>,
    /// Lock-free `(name, id)` snapshot for regex/predicate scans — the
    /// inferred `siridb_build_index` contract (spec.md §9).
    index: Mutex<Arc<Vec<(String, u64)>>>,
    next_id: AtomicU64,
    events_since_snapshot: AtomicU64,
}

/// Snapshot-compaction is triggered once this many events have been
/// appended since the last one.
const SNAPSHOT_EVENT_THRESHOLD: u64 = 4096;

impl Catalog {
    /// Opens (or creates) the catalog rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let snapshot_path = dir.join(SNAPSHOT_FILENAME);
        let mut state = match std::fs::read(&snapshot_path) {
            Ok(bytes) => match encoding::decode_from_slice::<CatalogState>(&bytes) {
                Ok((state, _)) => state,
                Err(e) => {
                    warn!(error = %e, "catalog snapshot corrupt, rebuilding from event log");
                    CatalogState::default()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => CatalogState::default(),
            Err(e) => return Err(CatalogError::Io(e)),
        };

        let wal_path = dir.join(WAL_FILENAME);
        let wal = Wal::<CatalogEvent>::open(&wal_path, None)?;
        let mut replayed = 0u64;
        for event in wal.replay_iter()? {
            state.apply(&event?);
            replayed += 1;
        }
        info!(dir = %dir.display(), replayed, "catalog opened");

        let next_id = state.next_id;
        let index = build_index(&state);

        Ok(Self {
            dir,
            wal: Mutex::new(wal),
            state: RwLock::new(state),
            index: Mutex::new(Arc::new(index)),
            next_id: AtomicU64::new(next_id),
            events_since_snapshot: AtomicU64::new(replayed),
        })
    }

    fn append(&self, event: CatalogEvent) -> Result<(), CatalogError> {
        self.wal
            .lock()
            .map_err(|_| CatalogError::Internal("WAL lock poisoned".into()))?
            .append(&event)?;
        self.state
            .write()
            .map_err(|_| CatalogError::Internal("state lock poisoned".into()))?
            .apply(&event);
        self.refresh_index()?;
        if self.events_since_snapshot.fetch_add(1, Ordering::SeqCst) + 1 >= SNAPSHOT_EVENT_THRESHOLD {
            self.checkpoint()?;
        }
        Ok(())
    }

    fn refresh_index(&self) -> Result<(), CatalogError> {
        let state = self
            .state
            .read()
            .map_err(|_| CatalogError::Internal("state lock poisoned".into()))?;
        let new_index = Arc::new(build_index(&state));
        *self
            .index
            .lock()
            .map_err(|_| CatalogError::Internal("index lock poisoned".into()))? = new_index;
        Ok(())
    }

    /// Registers a new series, failing if the name is already taken.
    pub fn create(
        &self,
        name: &str,
        series_type: SeriesType,
        duration_class: u8,
        pool_id: u16,
    ) -> Result<u64, CatalogError> {
        {
            let state = self
                .state
                .read()
                .map_err(|_| CatalogError::Internal("state lock poisoned".into()))?;
            if state.by_name.contains_key(name) {
                return Err(CatalogError::AlreadyExists(name.to_string()));
            }
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.append(CatalogEvent::Create {
            id,
            name: name.to_string(),
            series_type,
            duration_class,
            pool_id,
        })?;
        debug!(series = name, id, "series created");
        Ok(id)
    }

    /// Looks up a series' id and creates it on first write if absent,
    /// matching spec.md §4.10's write-path "create series if absent".
    pub fn get_or_create(
        &self,
        name: &str,
        series_type: SeriesType,
        duration_class: u8,
        pool_id: u16,
    ) -> Result<u64, CatalogError> {
        if let Some(id) = self.id_for_name(name) {
            return Ok(id);
        }
        match self.create(name, series_type, duration_class, pool_id) {
            Ok(id) => Ok(id),
            Err(CatalogError::AlreadyExists(_)) => self
                .id_for_name(name)
                .ok_or_else(|| CatalogError::NotFound(name.to_string())),
            Err(e) => Err(e),
        }
    }

    /// Drops a series (its buffer and shard residency must be cleared by
    /// the caller; the catalog only records that the series is gone).
    pub fn drop_series(&self, id: u64) -> Result<(), CatalogError> {
        self.append(CatalogEvent::Drop { id })
    }

    /// Changes a series' point type.
    pub fn retype(&self, id: u64, series_type: SeriesType) -> Result<(), CatalogError> {
        self.append(CatalogEvent::Retype { id, series_type })
    }

    /// Records that `shard_id` now holds at least one live block for
    /// `id`, called by buffersync and the optimizer.
    pub fn record_shard(&self, id: u64, shard_id: u64) -> Result<(), CatalogError> {
        self.append(CatalogEvent::RecordShard { id, shard_id })
    }

    /// Updates a series' point count and time bounds after a successful
    /// flush or optimize.
    pub fn update_stats(
        &self,
        id: u64,
        point_count_delta: u64,
        first_ts: i64,
        last_ts: i64,
    ) -> Result<(), CatalogError> {
        self.append(CatalogEvent::UpdateStats {
            id,
            point_count_delta,
            first_ts,
            last_ts,
        })
    }

    /// Returns a snapshot clone of a series by id.
    pub fn get(&self, id: u64) -> Option<Series> {
        self.state.read().ok()?.by_id.get(&id).cloned()
    }

    /// Returns a snapshot clone of a series by name.
    pub fn get_by_name(&self, name: &str) -> Option<Series> {
        let state = self.state.read().ok()?;
        let id = *state.by_name.get(name)?;
        state.by_id.get(&id).cloned()
    }

    /// Resolves a series name to its id without blocking on the full
    /// catalog write lock (reads the lock-free index snapshot).
    pub fn id_for_name(&self, name: &str) -> Option<u64> {
        let index = self.index.lock().ok()?.clone();
        index
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, id)| *id)
    }

    /// Scans every known series whose name matches `predicate`, without
    /// blocking concurrent catalog mutations (spec.md §4.5's "regex
    /// scan iterator", generalized to any name predicate so the query
    /// layer can plug in whatever regex engine it uses).
    pub fn scan(&self, mut predicate: impl FnMut(&str) -> bool) -> Vec<Series> {
        let index = match self.index.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let state = match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        index
            .iter()
            .filter(|(name, _)| predicate(name))
            .filter_map(|(_, id)| state.by_id.get(id).cloned())
            .collect()
    }

    /// Returns every known series sorted by id, oldest first. Used by
    /// initsync and reindex, which must walk series in a stable order
    /// that survives adding new series mid-walk (spec.md §4.8).
    pub fn all_sorted_by_id(&self) -> Vec<Series> {
        let state = match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut series: Vec<Series> = state.by_id.values().cloned().collect();
        series.sort_by_key(|s| s.id);
        series
    }

    /// Total number of series currently registered.
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.by_id.len()).unwrap_or(0)
    }

    /// Whether the catalog has no series registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes a fresh snapshot of the current state and truncates the
    /// event log, the same WAL-plus-snapshot compaction the teacher's
    /// manifest uses for SSTable metadata.
    pub fn checkpoint(&self) -> Result<(), CatalogError> {
        let state = self
            .state
            .read()
            .map_err(|_| CatalogError::Internal("state lock poisoned".into()))?
            .clone();
        let bytes = encoding::encode_to_vec(&state)?;
        let tmp_path = self.dir.join(format!("{SNAPSHOT_FILENAME}.tmp"));
        std::fs::write(&tmp_path, &bytes)?;
        std::fs::rename(&tmp_path, self.dir.join(SNAPSHOT_FILENAME))?;

        self.wal
            .lock()
            .map_err(|_| CatalogError::Internal("WAL lock poisoned".into()))?
            .truncate()?;
        self.events_since_snapshot.store(0, Ordering::SeqCst);
        info!(series = state.by_id.len(), "catalog checkpointed");
        Ok(())
    }
}

fn build_index(state: &CatalogState) -> Vec<(String, u64)> {
    let mut index: Vec<(String, u64)> = state
        .by_name
        .iter()
        .map(|(name, id)| (name.clone(), *id))
        .collect();
    index.sort_by(|a, b| a.0.cmp(&b.0));
    index
}
