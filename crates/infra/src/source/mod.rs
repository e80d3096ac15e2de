//! Activation row sources.
//!
//! A source yields one JSON object per warehouse record. Row shape validation
//! happens downstream, per row, so a malformed record never stops the run.

pub mod jsonl;
pub mod postgres;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use thiserror::Error;

pub use jsonl::JsonlRowSource;
pub use postgres::PostgresRowSource;

/// Stream of raw rows.
pub type RowStream<'a> = BoxStream<'a, Result<Value, SourceError>>;

/// Row source error.
#[derive(Debug, Error)]
pub enum SourceError {
    /// One record could not be decoded; the stream continues.
    #[error("malformed record at {location}: {message}")]
    Malformed { location: String, message: String },

    /// The source reference itself is unusable.
    #[error("invalid source reference: {0}")]
    InvalidReference(String),

    /// Reading failed; the stream cannot continue.
    #[error("source read failed: {0}")]
    Read(String),
}

impl SourceError {
    /// Whether the stream can keep going after this error.
    pub fn is_record_level(&self) -> bool {
        matches!(self, SourceError::Malformed { .. })
    }
}

/// Producer of activation rows.
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Human-readable reference for logs.
    fn describe(&self) -> String;

    /// Open a stream over all rows.
    async fn open(&self) -> Result<RowStream<'_>, SourceError>;
}

/// Fixed set of rows, for tests/dev.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRowSource {
    rows: Vec<Value>,
}

impl InMemoryRowSource {
    pub fn new(rows: Vec<Value>) -> Self {
        Self { rows }
    }
}

#[async_trait]
impl RowSource for InMemoryRowSource {
    fn describe(&self) -> String {
        format!("in-memory ({} rows)", self.rows.len())
    }

    async fn open(&self) -> Result<RowStream<'_>, SourceError> {
        Ok(Box::pin(futures::stream::iter(
            self.rows.iter().cloned().map(Ok),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn in_memory_source_replays_rows() {
        let source = InMemoryRowSource::new(vec![json!({"a": 1}), json!({"a": 2})]);

        let rows: Vec<Value> = source
            .open()
            .await
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
            .await;

        assert_eq!(rows, vec![json!({"a": 1}), json!({"a": 2})]);
    }

    #[test]
    fn only_malformed_records_are_record_level() {
        let malformed = SourceError::Malformed {
            location: "line 3".into(),
            message: "eof".into(),
        };
        assert!(malformed.is_record_level());
        assert!(!SourceError::Read("reset".into()).is_record_level());
    }
}
