//! Postgres-backed row source.
//!
//! Reads every row of a table (or view) as a JSON object, so arbitrary
//! `up_*` / `ep_*` columns come through without a fixed schema. Numeric
//! columns arrive as JSON numbers.
//!
//! `event_timestamp` must reach the transform as text in one of the accepted
//! layouts. `row_to_json` renders native temporal columns in ISO form
//! (`2023-02-25T10:00:00+00:00`), which matches none of them, so the column
//! type is looked up first and `timestamp`, `timestamptz` and `date` columns
//! are re-rendered with `to_char` as `YYYY-MM-DD HH24:MI:SS.US UTC` (dates as
//! `YYYY-MM-DD`). Text columns pass through untouched.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use serde_json::Value;
use sqlx::{PgPool, Row};
use tokio::sync::OnceCell;
use tracing::debug;

use super::{RowSource, RowStream, SourceError};
use crate::audit::postgres::is_identifier;

const TIMESTAMP_COLUMN: &str = "event_timestamp";

const COLUMN_TYPE_SQL: &str = "SELECT data_type::text FROM information_schema.columns \
     WHERE table_schema::text = COALESCE($1::text, current_schema()::text) \
     AND table_name::text = $2 AND column_name::text = $3";

/// Storage type of the source's `event_timestamp` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampColumn {
    /// Text (or absent): passed through as stored.
    Text,
    Timestamp,
    TimestampTz,
    Date,
}

impl TimestampColumn {
    /// Map an `information_schema.columns.data_type` value.
    pub fn from_data_type(data_type: &str) -> Self {
        match data_type {
            "timestamp without time zone" => TimestampColumn::Timestamp,
            "timestamp with time zone" => TimestampColumn::TimestampTz,
            "date" => TimestampColumn::Date,
            _ => TimestampColumn::Text,
        }
    }

    /// SQL expression rendering the column as accepted timestamp text.
    fn render(self) -> Option<String> {
        let column = format!(r#"t."{TIMESTAMP_COLUMN}""#);
        match self {
            TimestampColumn::Text => None,
            TimestampColumn::Timestamp => Some(format!(
                r#"to_char({column}, 'YYYY-MM-DD HH24:MI:SS.US "UTC"')"#
            )),
            TimestampColumn::TimestampTz => Some(format!(
                r#"to_char({column} AT TIME ZONE 'UTC', 'YYYY-MM-DD HH24:MI:SS.US "UTC"')"#
            )),
            TimestampColumn::Date => Some(format!("to_char({column}, 'YYYY-MM-DD')")),
        }
    }
}

/// Streams the rows of `schema.table` (or `table`).
#[derive(Debug, Clone)]
pub struct PostgresRowSource {
    pool: Arc<PgPool>,
    table: String,
    schema: Option<String>,
    name: String,
    sql: OnceCell<String>,
}

impl PostgresRowSource {
    /// `table` is a dotted reference of plain identifiers, e.g. `ds.activation_rows`.
    pub fn new(pool: PgPool, table: &str) -> Result<Self, SourceError> {
        let (schema, name) = parse_reference(table)?;
        Ok(Self {
            pool: Arc::new(pool),
            table: table.to_string(),
            schema,
            name,
            sql: OnceCell::new(),
        })
    }

    async fn timestamp_column(&self) -> Result<TimestampColumn, SourceError> {
        let data_type: Option<String> = sqlx::query_scalar(COLUMN_TYPE_SQL)
            .bind(self.schema.as_deref())
            .bind(&self.name)
            .bind(TIMESTAMP_COLUMN)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| SourceError::Read(e.to_string()))?;

        let column = data_type
            .as_deref()
            .map_or(TimestampColumn::Text, TimestampColumn::from_data_type);
        debug!(table = %self.table, ?data_type, ?column, "resolved event_timestamp column");
        Ok(column)
    }
}

fn parse_reference(table: &str) -> Result<(Option<String>, String), SourceError> {
    let invalid = || SourceError::InvalidReference(table.to_string());
    let parts: Vec<&str> = table.split('.').collect();
    if !parts.iter().all(|p| is_identifier(p)) {
        return Err(invalid());
    }
    match parts.as_slice() {
        [name] => Ok((None, name.to_string())),
        [schema, name] => Ok((Some(schema.to_string()), name.to_string())),
        _ => Err(invalid()),
    }
}

fn select_sql(schema: Option<&str>, name: &str, column: TimestampColumn) -> String {
    let quoted = match schema {
        Some(schema) => format!(r#""{schema}"."{name}""#),
        None => format!(r#""{name}""#),
    };
    match column.render() {
        None => format!("SELECT row_to_json(t)::text AS doc FROM {quoted} t"),
        Some(expr) => format!(
            "SELECT (to_jsonb(t) || jsonb_build_object('{TIMESTAMP_COLUMN}', {expr}))::text AS doc \
             FROM {quoted} t"
        ),
    }
}

#[async_trait]
impl RowSource for PostgresRowSource {
    fn describe(&self) -> String {
        format!("postgres:{}", self.table)
    }

    async fn open(&self) -> Result<RowStream<'_>, SourceError> {
        let sql = self
            .sql
            .get_or_try_init(|| async {
                let column = self.timestamp_column().await?;
                Ok::<_, SourceError>(select_sql(self.schema.as_deref(), &self.name, column))
            })
            .await?;

        let stream = sqlx::query(sql)
            .fetch(&*self.pool)
            .map_err(|e| SourceError::Read(e.to_string()))
            .map(|row| -> Result<Value, SourceError> {
                let row = row?;
                let text: String = row.try_get("doc").map_err(|e| SourceError::Malformed {
                    location: "row".into(),
                    message: e.to_string(),
                })?;
                serde_json::from_str(&text).map_err(|e| SourceError::Malformed {
                    location: "row".into(),
                    message: e.to_string(),
                })
            });

        Ok(stream.boxed())
    }
}
