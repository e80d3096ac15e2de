//! `beacon`: warehouse-row activation runs.
//!
//! Rows come from a Postgres table (`--database-url`) or a JSONL file
//! (`--source-file`). Audit records go to a partitioned Postgres table or to
//! JSONL files under `--log-dir`. Exit status is non-zero only for fatal
//! errors; rows the collector rejected are recorded, not fatal.

mod args;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use beacon_infra::audit::{JsonlAuditSink, PostgresAuditSink};
use beacon_infra::source::{JsonlRowSource, PostgresRowSource};
use beacon_infra::{
    AuditSink, FileSecretStore, InMemorySecretStore, RowSource, RunSummary, SecretStore,
    run_activation,
};

use args::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    beacon_observability::init_with(cli.log_format);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping run");
                cancel.cancel();
            }
        }
    });

    match run(cli, cancel).await {
        Ok(summary) => {
            if let Ok(json) = serde_json::to_string(&summary) {
                println!("{json}");
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %format!("{err:#}"), "activation run failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, cancel: CancellationToken) -> Result<RunSummary> {
    let config = cli.activation_config();
    let plan = config.validate()?;

    let pool = match &cli.database_url {
        Some(url) => Some(
            PgPoolOptions::new()
                .max_connections(config.workers as u32 + 2)
                .connect(url)
                .await
                .context("failed to connect to postgres")?,
        ),
        None => None,
    };

    let source: Box<dyn RowSource> = match (&cli.source_file, &pool) {
        (Some(path), _) => Box::new(JsonlRowSource::new(path)),
        (None, Some(pool)) => Box::new(PostgresRowSource::new(pool.clone(), &cli.source_table)?),
        (None, None) => bail!("no row source: pass --source-file or --database-url"),
    };

    let sink: Arc<dyn AuditSink> = match (&cli.log_dir, &pool) {
        (Some(dir), _) => Arc::new(JsonlAuditSink::new(dir, plan.table.clone())),
        (None, Some(pool)) => Arc::new(postgres_sink(pool, &plan.table)?),
        (None, None) => bail!("no audit sink: pass --log-dir or --database-url"),
    };

    let secrets: Arc<dyn SecretStore> = match &cli.secrets_dir {
        Some(dir) => Arc::new(FileSecretStore::new(dir)),
        None => {
            if plan.destination.is_multi_tenant() {
                bail!("--secrets-dir is required when the measurement id is the secret-store sentinel");
            }
            Arc::new(InMemorySecretStore::new())
        }
    };

    info!(run_id = %plan.run, source = %source.describe(), "activation configured");
    let summary = run_activation(&config, source.as_ref(), secrets, sink, cancel).await?;
    Ok(summary)
}

fn postgres_sink(pool: &PgPool, table: &beacon_infra::TableSpec) -> Result<PostgresAuditSink> {
    PostgresAuditSink::new(pool.clone(), table.clone()).context("invalid audit table")
}
