//! Database layer for sessionscope
//!
//! Local SQLite store with:
//! - Schema migrations
//! - Snapshots of parsed sessions (instructions stripped)
//! - Misalignment records and their status history
//! - Chat assistant history

pub mod repo;
pub mod schema;

pub use repo::{Database, SnapshotSummary};
