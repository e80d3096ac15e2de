//! File-backed audit sink.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<project>/<dataset>/<table>/_table.json          table metadata
//! <root>/<project>/<dataset>/<table>/<YYYYMMDD>.jsonl     one file per day partition
//! ```
//!
//! Records are appended as one JSON object per line. Clustering is recorded in
//! the metadata only.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use beacon_core::LogRecord;

use super::{AuditErrorKind, AuditSink, AuditStoreError, TableSpec};

const METADATA_FILE: &str = "_table.json";

/// Audit sink writing newline-delimited JSON, partitioned by day.
#[derive(Debug)]
pub struct JsonlAuditSink {
    spec: TableSpec,
    table_dir: PathBuf,
    // Serializes appends so concurrent workers never interleave lines.
    write_lock: Mutex<bool>,
}

impl JsonlAuditSink {
    pub fn new(root: impl AsRef<Path>, spec: TableSpec) -> Self {
        let table_dir = root
            .as_ref()
            .join(&spec.project)
            .join(&spec.dataset)
            .join(&spec.table);
        Self {
            spec,
            table_dir,
            write_lock: Mutex::new(false),
        }
    }

    pub fn table_dir(&self) -> &Path {
        &self.table_dir
    }

    /// Partition file holding records of the given day (`YYYYMMDD`).
    pub fn partition_path(&self, day: &str) -> PathBuf {
        self.table_dir.join(format!("{day}.jsonl"))
    }

    async fn create_table_if_absent(&self) -> Result<(), AuditStoreError> {
        tokio::fs::create_dir_all(&self.table_dir)
            .await
            .map_err(|e| map_io_error("create table directory", e))?;

        let metadata_path = self.table_dir.join(METADATA_FILE);
        if tokio::fs::try_exists(&metadata_path)
            .await
            .map_err(|e| map_io_error("check table metadata", e))?
        {
            return Ok(());
        }

        let metadata = serde_json::to_vec_pretty(&self.spec).map_err(|e| {
            AuditStoreError::new(AuditErrorKind::InvalidSchema, e.to_string())
        })?;
        tokio::fs::write(&metadata_path, metadata)
            .await
            .map_err(|e| map_io_error("write table metadata", e))?;

        debug!(table = %self.spec.qualified_name(), "created audit table");
        Ok(())
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    #[instrument(skip(self, records), fields(table = %self.spec.table, count = records.len()), err)]
    async fn append(&self, records: &[LogRecord]) -> Result<(), AuditStoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut partitions: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        for record in records {
            let day = record.run_ts.format("%Y%m%d").to_string();
            let buf = partitions.entry(day).or_default();
            serde_json::to_writer(&mut *buf, record).map_err(|e| {
                AuditStoreError::new(AuditErrorKind::BadRequest, e.to_string())
            })?;
            buf.push(b'\n');
        }

        let mut created = self.write_lock.lock().await;
        if !*created {
            self.create_table_if_absent().await?;
            *created = true;
        }

        for (day, lines) in partitions {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.partition_path(&day))
                .await
                .map_err(|e| map_io_error("open partition", e))?;
            file.write_all(&lines)
                .await
                .map_err(|e| map_io_error("append records", e))?;
            file.flush()
                .await
                .map_err(|e| map_io_error("flush partition", e))?;
        }

        Ok(())
    }
}

fn map_io_error(operation: &str, err: std::io::Error) -> AuditStoreError {
    let kind = match err.kind() {
        ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock => {
            AuditErrorKind::ServiceUnavailable
        }
        ErrorKind::PermissionDenied => AuditErrorKind::PermissionDenied,
        ErrorKind::NotFound => AuditErrorKind::NotFound,
        _ => AuditErrorKind::Io,
    };
    AuditStoreError::new(kind, format!("{operation}: {err}"))
}
