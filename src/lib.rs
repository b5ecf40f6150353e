//! # siridb-core
//!
//! Per-server storage and replication core for a clustered time-series
//! database: the pieces one pool member needs to own a slice of the
//! series namespace, store its points, replicate them to its pool peer,
//! migrate them during a reindex, and answer a query against its own
//! shards.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                          Database                             │
//! │  ┌──────────┐ ┌────────┐ ┌───────┐ ┌────────┐ ┌─────────────┐ │
//! │  │ Catalog  │ │ Buffer │ │ Shard │ │ Lookup │ │  Fifo (×N)  │ │
//! │  │ (series) │ │ (WAL)  │ │ files │ │(pools) │ │  per peer   │ │
//! │  └────┬─────┘ └───┬────┘ └───┬───┘ └───┬────┘ └──────┬──────┘ │
//! │       │ buffersync │         │         │             │        │
//! │       └───────────►└────────►│         │             │        │
//! │                         optimizer       │             │        │
//! │                                         │     initsync/reindex │
//! │  ┌──────────────────────────────────────┴─────────────┴─────┐ │
//! │  │                   query::LocalExecutor                    │ │
//! │  └─────────────────────────────────────────────────────────┘ │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | `DbConfig`: server-wide tunables, loaded from TOML |
//! | [`lookup`] | 8192-slot hash table mapping series names to pools |
//! | [`encoding`] | Shared binary `Encode`/`Decode` primitives |
//! | [`wal`] | Generic, CRC-protected write-ahead log for crash recovery |
//! | [`wire`] | Self-framing `Package` used by FIFO and replication |
//! | [`catalog`] | Series registry: names, types, stats, shard residency |
//! | [`buffer`] | Write-ahead buffer and the buffersync flush task |
//! | [`shard`] | Immutable per-window point storage and merged scans |
//! | [`optimizer`] | Background shard rewrite for fragmentation/tombstones |
//! | [`fifo`] | Per-peer replication backlog (segments of `wire::Package`) |
//! | [`replication`] | Initsync and reindex catalog-walking drivers |
//! | [`query`] | Cluster query executor: resolve, merge, aggregate |
//! | [`server`] | `Database`: the facade wiring every module together |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use siridb_core::config::DbConfig;
//! use siridb_core::server::Database;
//! use siridb_core::shard::{Point, PointValue};
//! use siridb_core::query::{Query, SeriesSelector};
//!
//! let db = Database::open("/tmp/my_pool", DbConfig::default()).unwrap();
//!
//! db.insert("cpu", Point { ts: 1, value: PointValue::Integer(42) }).unwrap();
//! db.run_buffersync().unwrap();
//!
//! let query = Query {
//!     selector: SeriesSelector::Names(vec!["cpu".into()]),
//!     from: 0,
//!     to: i64::MAX,
//!     aggregate: None,
//! };
//! let results = db.query_local(&query).unwrap();
//! assert_eq!(results["cpu"].len(), 1);
//! ```

#![allow(dead_code)]

pub mod buffer;
pub mod catalog;
pub mod config;
pub mod encoding;
pub mod fifo;
pub mod lookup;
pub mod optimizer;
pub mod query;
pub mod replication;
pub mod server;
pub mod shard;
pub mod wal;
pub mod wire;
