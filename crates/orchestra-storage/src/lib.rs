//! # orchestra-storage
//!
//! Persistence for Orchestra threads and access to the analytic warehouse.
//!
//! Both sides use embedded Turso databases:
//!   - Checkpoints: `.orchestra/checkpoints.db`, one row per thread plus an
//!     append-only history of every save
//!   - Warehouse: the configured analytic database, queried with generated SQL

mod checkpoint;
mod db;
mod turso_store;
mod warehouse;

pub use checkpoint::{CheckpointStore, MemoryCheckpointStore};
pub use db::open_local;
pub use turso_store::TursoCheckpointStore;
pub use warehouse::{
    strip_sql_fences, QueryTool, StaticWarehouse, TursoQueryTool, TursoWarehouse, Warehouse,
    WireWarehouse, SUMMARY_ROWS,
};
