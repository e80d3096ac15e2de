//! One activation run, end to end.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::audit::AuditSink;
use crate::config::{ActivationConfig, ConfigError};
use crate::dispatcher::HttpDispatcher;
use crate::logger::OutcomeLogger;
use crate::resolver::CredentialResolver;
use crate::secret_store::SecretStore;
use crate::source::RowSource;
use crate::workers::{ActivationWorker, PoolError, RunSummary, WorkerPool};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to build http client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Validate `config`, then stream `source` through a pool of workers.
///
/// Each worker gets its own credential resolver; the secret store and audit
/// sink are shared.
#[instrument(skip_all, fields(run_id = %config.run_id, source = %source.describe()), err)]
pub async fn run_activation(
    config: &ActivationConfig,
    source: &dyn RowSource,
    secrets: Arc<dyn SecretStore>,
    sink: Arc<dyn AuditSink>,
    cancel: CancellationToken,
) -> Result<RunSummary, RunError> {
    let plan = config.validate()?;
    let dispatcher = HttpDispatcher::with_timeout(config.dispatch_timeout)?;

    info!(
        workers = config.workers,
        multi_tenant = plan.destination.is_multi_tenant(),
        validate_only = plan.endpoint.validate_only(),
        log_table = %plan.table.qualified_name(),
        "starting activation run"
    );

    let workers = (0..config.workers)
        .map(|id| {
            ActivationWorker::new(
                id,
                CredentialResolver::new(plan.destination.clone(), secrets.clone()),
                dispatcher.clone(),
                plan.endpoint.clone(),
                OutcomeLogger::new(sink.clone(), plan.run.clone(), config.audit_retry.clone()),
            )
        })
        .collect();

    let summary = WorkerPool::new(plan.run.as_str(), config.queue_depth, cancel)
        .run(source, workers)
        .await?;

    info!(
        rows = summary.totals.rows,
        sent_ok = summary.totals.sent_ok,
        send_failed = summary.totals.send_failed,
        rejected = summary.totals.rejected,
        malformed = summary.malformed,
        unparseable_timestamps = summary.totals.unparseable_timestamps,
        "activation run finished"
    );
    if summary.timestamps_all_unparseable() {
        warn!(
            rows = summary.totals.unparseable_timestamps,
            "no event_timestamp parsed; every payload was sent without timestamp_micros"
        );
    }
    Ok(summary)
}
