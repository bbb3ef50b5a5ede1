//! Feed ingestion: periodic sweeps of every active source and rate-limited,
//! asynchronous per-user refreshes, persisted with per-source deduplication.

pub mod config;
pub mod feed;
pub mod ingest;
pub mod refresh;
pub mod scheduler;
pub mod storage;
