//! SQLite-backed [`AggregationStore`](storagepulse_core::AggregationStore).
//!
//! One connection guarded by a mutex; multi-row writes run inside a
//! transaction so readers never observe a half-applied scan.

mod sqlite;

pub use sqlite::SqliteStore;
