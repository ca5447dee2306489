//! Durable per-keyword scan results.
//!
//! A checkpoint is a persisted set of processed keywords plus the ordered log
//! of their results. Appends are buffered and become durable on `flush`, so a
//! crash loses at most the unflushed batch.

use async_trait::async_trait;
use std::collections::HashSet;
use trendscout_core::{CheckpointError, KeywordResult};

pub mod jsonl;
pub mod sqlite;


pub use jsonl::JsonlCheckpoint;
pub use sqlite::SqliteCheckpoint;

#[async_trait]
pub trait CheckpointStore: Send {
    /// Reads the persisted log and returns the keys of every keyword in it.
    ///
    /// Any unreadable record fails the whole load.
    async fn load_existing(&mut self) -> Result<HashSet<String>, CheckpointError>;

    /// True if the keyword was loaded or appended during this run.
    fn has(&self, keyword: &str) -> bool;

    /// Buffers a result; it is durable only after the next `flush`.
    async fn append(&mut self, result: KeywordResult) -> Result<(), CheckpointError>;

    async fn flush(&mut self) -> Result<(), CheckpointError>;

    /// Flushes, then returns the full log in write order.
    async fn read_all(&mut self) -> Result<Vec<KeywordResult>, CheckpointError>;

    /// Moves the current log aside under a timestamped name so the next scan
    /// starts empty. Returns the new name, or `None` if there was nothing to
    /// archive.
    async fn archive(&mut self) -> Result<Option<String>, CheckpointError>;

    /// Number of appended results not yet flushed.
    fn pending(&self) -> usize;

    fn backend_type(&self) -> &'static str;
}

/// Suffix used when archiving a finished log.
pub(crate) fn archive_stamp() -> String {
    chrono::Utc::now().format("%Y%m%dT%H%M%S%3fZ").to_string()
}
