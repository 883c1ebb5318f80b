//! sheetql - tabular file ingestion, schema inference, and a persistent
//! multi-table SQL store.
//!
//! Uploaded spreadsheets and CSVs become named relational tables with known
//! column types; a durable registry tracks what has been ingested,
//! deduplicates by content hash, and can rebuild the entire backing store
//! from persisted metadata after a restart.

pub mod config;
pub mod error;
pub mod hashing;
pub mod identifier;
pub mod inference;
pub mod reader;
pub mod registry;
pub mod schema;
pub mod store;
