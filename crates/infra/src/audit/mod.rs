//! Append-only audit store boundary.
//!
//! Every dispatch attempt produces one [`LogRecord`] that is appended to the
//! activation log table. The table is created on first write, partitioned by
//! day on the run timestamp and clustered by `(state, client_id)`. Nothing in
//! this crate reads it back.

pub mod in_memory;
pub mod jsonl;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use beacon_core::LogRecord;

pub use in_memory::InMemoryAuditSink;
pub use jsonl::JsonlAuditSink;
pub use postgres::PostgresAuditSink;

/// Default name of the activation log table.
pub const DEFAULT_LOG_TABLE: &str = "activation_ga4mp_log";

/// Column types of the audit table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    Timestamp,
    String,
}

/// One audit table column; every column is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

const fn column(name: &'static str, column_type: ColumnType) -> Column {
    Column { name, column_type }
}

/// Fixed nine-column layout of the activation log.
pub const LOG_COLUMNS: [Column; 9] = [
    column("prediction_run_ts", ColumnType::Timestamp),
    column("prediction_run_id", ColumnType::String),
    column("id", ColumnType::String),
    column("client_id", ColumnType::String),
    column("event_name", ColumnType::String),
    column("payload_md5", ColumnType::String),
    column("payload", ColumnType::String),
    column("response", ColumnType::String),
    column("state", ColumnType::String),
];

pub const PARTITION_FIELD: &str = "prediction_run_ts";
pub const CLUSTERING_FIELDS: [&str; 2] = ["state", "client_id"];

/// Location and layout of the activation log table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSpec {
    pub project: String,
    pub dataset: String,
    pub table: String,
    pub columns: &'static [Column],
    /// Day partitioning column.
    pub partition_field: &'static str,
    pub clustering: &'static [&'static str],
}

impl TableSpec {
    pub fn activation_log(project: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: DEFAULT_LOG_TABLE.to_string(),
            columns: &LOG_COLUMNS,
            partition_field: PARTITION_FIELD,
            clustering: &CLUSTERING_FIELDS,
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// `project.dataset.table`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}.{}", self.project, self.dataset, self.table)
    }
}

/// Classes of audit store failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditErrorKind {
    BadRequest,
    TooManyRequests,
    Internal,
    BadGateway,
    ServiceUnavailable,
    NotFound,
    PermissionDenied,
    InvalidSchema,
    Io,
}

impl AuditErrorKind {
    /// Failure classes the audit write is retried on.
    pub const RETRYABLE: [AuditErrorKind; 5] = [
        AuditErrorKind::BadRequest,
        AuditErrorKind::TooManyRequests,
        AuditErrorKind::Internal,
        AuditErrorKind::BadGateway,
        AuditErrorKind::ServiceUnavailable,
    ];

    pub fn is_retryable(self) -> bool {
        Self::RETRYABLE.contains(&self)
    }
}

/// Audit store operation error.
#[derive(Debug, Clone, Error)]
#[error("audit store {kind:?}: {message}")]
pub struct AuditStoreError {
    pub kind: AuditErrorKind,
    pub message: String,
}

impl AuditStoreError {
    pub fn new(kind: AuditErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Append-only sink for audit records.
///
/// Implementations create the table on the first append and must never
/// update or delete existing rows.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append a batch of records.
    async fn append(&self, records: &[LogRecord]) -> Result<(), AuditStoreError>;
}

#[async_trait]
impl<T> AuditSink for Arc<T>
where
    T: AuditSink + ?Sized,
{
    async fn append(&self, records: &[LogRecord]) -> Result<(), AuditStoreError> {
        (**self).append(records).await
    }
}
