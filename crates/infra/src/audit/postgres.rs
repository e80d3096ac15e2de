//! Postgres-backed audit sink.
//!
//! The dataset maps to a schema and the log table to a range-partitioned
//! table with one partition per day of `prediction_run_ts`. A
//! `(state, client_id)` index stands in for clustering.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | AuditErrorKind |
//! |------------|----------------------|----------------|
//! | Database | `53300` (too many connections) | `TooManyRequests` |
//! | Database | `53xxx`, `57P0x` (resources, shutdown) | `ServiceUnavailable` |
//! | Database | `40001`, `40P01` (serialization, deadlock) | `Internal` |
//! | Database | `22xxx`, `23xxx` (data, integrity) | `BadRequest` |
//! | Database | `42501` | `PermissionDenied` |
//! | Database | `42P01` | `NotFound` |
//! | Database | other `42xxx` | `InvalidSchema` |
//! | PoolTimedOut, Io | N/A | `ServiceUnavailable` |
//! | Tls, Protocol | N/A | `BadGateway` |
//! | PoolClosed | N/A | `Io` |
//! | Other | N/A | `Internal` |

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use sqlx::PgPool;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use beacon_core::LogRecord;

use super::{AuditErrorKind, AuditSink, AuditStoreError, TableSpec};

/// Postgres-backed append-only audit sink.
///
/// ## Thread Safety
///
/// Uses the SQLx connection pool (Arc + Send + Sync). Partition creation is
/// serialized through an internal lock; inserts run in one transaction per
/// batch.
#[derive(Debug, Clone)]
pub struct PostgresAuditSink {
    pool: Arc<PgPool>,
    spec: TableSpec,
    known_partitions: Arc<Mutex<Option<HashSet<NaiveDate>>>>,
}

impl PostgresAuditSink {
    /// Create a sink; the table spec names must be plain SQL identifiers.
    pub fn new(pool: PgPool, spec: TableSpec) -> Result<Self, AuditStoreError> {
        for name in [&spec.dataset, &spec.table] {
            if !is_identifier(name) {
                return Err(AuditStoreError::new(
                    AuditErrorKind::InvalidSchema,
                    format!("invalid identifier {name:?}"),
                ));
            }
        }

        Ok(Self {
            pool: Arc::new(pool),
            spec,
            known_partitions: Arc::new(Mutex::new(None)),
        })
    }

    fn table(&self) -> String {
        format!("\"{}\".\"{}\"", self.spec.dataset, self.spec.table)
    }

    fn create_table_sql(&self) -> String {
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                prediction_run_ts TIMESTAMPTZ NOT NULL,
                prediction_run_id TEXT NOT NULL,
                id TEXT NOT NULL,
                client_id TEXT NOT NULL,
                event_name TEXT NOT NULL,
                payload_md5 TEXT NOT NULL,
                payload TEXT NOT NULL,
                response TEXT NOT NULL,
                state TEXT NOT NULL
            ) PARTITION BY RANGE ({partition})
            "#,
            table = self.table(),
            partition = self.spec.partition_field,
        )
    }

    fn create_cluster_index_sql(&self) -> String {
        format!(
            r#"CREATE INDEX IF NOT EXISTS "{name}_cluster_idx" ON {table} ({columns})"#,
            name = self.spec.table,
            table = self.table(),
            columns = self.spec.clustering.join(", "),
        )
    }

    fn create_partition_sql(&self, day: NaiveDate) -> String {
        let next = day.checked_add_days(Days::new(1)).unwrap_or(day);
        format!(
            r#"CREATE TABLE IF NOT EXISTS "{schema}"."{name}_{suffix}" PARTITION OF {table} FOR VALUES FROM ('{from}') TO ('{to}')"#,
            schema = self.spec.dataset,
            name = self.spec.table,
            suffix = day.format("%Y%m%d"),
            table = self.table(),
            from = day.format("%Y-%m-%d"),
            to = next.format("%Y-%m-%d"),
        )
    }

    /// Create the schema, table, clustering index and any missing day
    /// partitions for `days`.
    async fn ensure_partitions(&self, days: &HashSet<NaiveDate>) -> Result<(), AuditStoreError> {
        let mut known = self.known_partitions.lock().await;

        if known.is_none() {
            let statements = [
                format!(r#"CREATE SCHEMA IF NOT EXISTS "{}""#, self.spec.dataset),
                self.create_table_sql(),
                self.create_cluster_index_sql(),
            ];
            for sql in statements {
                sqlx::query(&sql)
                    .execute(&*self.pool)
                    .await
                    .map_err(|e| map_sqlx_error("create_table", e))?;
            }
            debug!(table = %self.spec.qualified_name(), "ensured audit table");
            *known = Some(HashSet::new());
        }

        let Some(known) = known.as_mut() else {
            return Ok(());
        };

        for day in days {
            if known.contains(day) {
                continue;
            }
            sqlx::query(&self.create_partition_sql(*day))
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("create_partition", e))?;
            known.insert(*day);
        }

        Ok(())
    }
}

#[async_trait]
impl AuditSink for PostgresAuditSink {
    #[instrument(skip(self, records), fields(table = %self.spec.table, count = records.len()), err)]
    async fn append(&self, records: &[LogRecord]) -> Result<(), AuditStoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let days: HashSet<NaiveDate> = records.iter().map(|r| r.run_ts.date_naive()).collect();
        self.ensure_partitions(&days).await?;

        let insert = format!(
            r#"
            INSERT INTO {table} (
                prediction_run_ts,
                prediction_run_id,
                id,
                client_id,
                event_name,
                payload_md5,
                payload,
                response,
                state
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
            table = self.table(),
        );

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        for record in records {
            sqlx::query(&insert)
                .bind(record.run_ts)
                .bind(&record.run_id)
                .bind(record.id.to_string())
                .bind(&record.client_id)
                .bind(&record.event_name)
                .bind(&record.payload_md5)
                .bind(&record.payload_json)
                .bind(&record.response)
                .bind(&record.state)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("insert", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;

        Ok(())
    }
}

/// Plain lower/upper-case identifier: letters, digits, underscores.
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> AuditStoreError {
    let kind = match &err {
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            Some("53300") => AuditErrorKind::TooManyRequests,
            Some("40001") | Some("40P01") => AuditErrorKind::Internal,
            Some("42501") => AuditErrorKind::PermissionDenied,
            Some("42P01") => AuditErrorKind::NotFound,
            Some(code) if code.starts_with("53") || code.starts_with("57P0") => {
                AuditErrorKind::ServiceUnavailable
            }
            Some(code) if code.starts_with("22") || code.starts_with("23") => {
                AuditErrorKind::BadRequest
            }
            Some(code) if code.starts_with("42") => AuditErrorKind::InvalidSchema,
            _ => AuditErrorKind::Internal,
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => AuditErrorKind::ServiceUnavailable,
        sqlx::Error::Tls(_) | sqlx::Error::Protocol(_) => AuditErrorKind::BadGateway,
        sqlx::Error::PoolClosed => AuditErrorKind::Io,
        _ => AuditErrorKind::Internal,
    };
    AuditStoreError::new(kind, format!("{operation}: {err}"))
}
