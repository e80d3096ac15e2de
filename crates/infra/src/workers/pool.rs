use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::audit::AuditSink;
use crate::secret_store::SecretStore;
use crate::source::{RowSource, SourceError};

use super::{ActivationWorker, RunSummary, WorkerError, WorkerStats};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no workers to run")]
    NoWorkers,

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("worker task failed: {0}")]
    Join(String),

    #[error("run cancelled after {} logged rows", .0.logged())]
    Cancelled(RunSummary),
}

/// Fans rows from one source out to a fixed set of workers.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    run_id: String,
    queue_depth: usize,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Cancelling `cancel` stops feeding and lets workers drain their
    /// current row.
    pub fn new(run_id: impl Into<String>, queue_depth: usize, cancel: CancellationToken) -> Self {
        Self {
            run_id: run_id.into(),
            queue_depth: queue_depth.max(1),
            cancel,
        }
    }

    /// Stream every row of `source` through `workers` and wait for them.
    ///
    /// A fatal worker error or a source read error cancels the remaining
    /// work; already-logged rows stay logged.
    pub async fn run<S, A>(
        &self,
        source: &dyn RowSource,
        workers: Vec<ActivationWorker<S, A>>,
    ) -> Result<RunSummary, PoolError>
    where
        S: SecretStore + 'static,
        A: AuditSink + 'static,
    {
        if workers.is_empty() {
            return Err(PoolError::NoWorkers);
        }

        let cancel = self.cancel.child_token();
        let (tx, rx) = mpsc::channel::<Value>(self.queue_depth);
        let rx = Arc::new(Mutex::new(rx));

        let mut summary = RunSummary {
            run_id: self.run_id.clone(),
            workers: workers.len(),
            ..Default::default()
        };

        let mut tasks = JoinSet::new();
        for worker in workers {
            tasks.spawn(worker_loop(worker, rx.clone(), cancel.clone()));
        }
        drop(rx);

        info!(source = %source.describe(), workers = summary.workers, "feeding rows");
        let fed = feed(source, tx, &cancel).await;
        if let Err(err) = &fed {
            error!(error = %err, "source failed, cancelling run");
            cancel.cancel();
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(stats)) => summary.totals += stats,
                Ok(Err(err)) => {
                    first_error.get_or_insert(PoolError::Worker(err));
                }
                Err(err) => {
                    cancel.cancel();
                    first_error.get_or_insert(PoolError::Join(err.to_string()));
                }
            }
        }

        summary.malformed = fed?;
        if let Some(err) = first_error {
            return Err(err);
        }
        if self.cancel.is_cancelled() {
            return Err(PoolError::Cancelled(summary));
        }
        Ok(summary)
    }
}

/// Push rows into the channel; returns the number of malformed records.
async fn feed(
    source: &dyn RowSource,
    tx: mpsc::Sender<Value>,
    cancel: &CancellationToken,
) -> Result<u64, SourceError> {
    let mut stream = source.open().await?;
    let mut malformed = 0;

    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            item = stream.next() => item,
        };

        match item {
            None => break,
            Some(Ok(row)) => {
                let sent = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    sent = tx.send(row) => sent,
                };
                // All workers are gone.
                if sent.is_err() {
                    break;
                }
            }
            Some(Err(err)) if err.is_record_level() => {
                warn!(error = %err, "skipping malformed record");
                malformed += 1;
            }
            Some(Err(err)) => return Err(err),
        }
    }

    Ok(malformed)
}

async fn worker_loop<S, A>(
    mut worker: ActivationWorker<S, A>,
    rx: Arc<Mutex<mpsc::Receiver<Value>>>,
    cancel: CancellationToken,
) -> Result<WorkerStats, WorkerError>
where
    S: SecretStore,
    A: AuditSink,
{
    if let Err(err) = worker.setup().await {
        error!(worker = worker.id(), error = %err, "worker setup failed");
        cancel.cancel();
        return Err(err);
    }

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            row = async { rx.lock().await.recv().await } => row,
        };
        let Some(row) = next else {
            break;
        };

        if let Err(err) = worker.process(row).await {
            error!(worker = worker.id(), error = %err, "worker stopped");
            cancel.cancel();
            return Err(err);
        }
    }

    Ok(worker.into_stats())
}
