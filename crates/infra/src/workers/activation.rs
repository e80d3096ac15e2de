use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use beacon_core::{LogRecord, RawRow, transform};

use crate::audit::AuditSink;
use crate::dispatcher::HttpDispatcher;
use crate::logger::{LogError, OutcomeLogger};
use crate::resolver::{CollectorEndpoint, CredentialResolver, ResolveError};
use crate::secret_store::SecretStore;

use super::WorkerStats;

/// Errors that stop a worker (and with it the run).
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker {worker} setup failed: {source}")]
    Setup {
        worker: usize,
        #[source]
        source: ResolveError,
    },

    #[error("worker {worker} could not write audit record: {source}")]
    Audit {
        worker: usize,
        #[source]
        source: LogError,
    },
}

/// What happened to one input row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowResult {
    /// Dispatched (successfully or not) and logged.
    Logged(LogRecord),
    /// Failed row validation; nothing was sent and nothing was logged.
    ///
    /// The audit table's nine fixed columns cannot hold a row without
    /// `client_id` or `event_name`, so a rejected row leaves no audit record.
    /// It shows up only as a `warn` event and in the run summary's
    /// `rejected` count.
    Rejected,
}

/// Sequential row processor owning one credential cache.
#[derive(Debug)]
pub struct ActivationWorker<S, A> {
    id: usize,
    resolver: CredentialResolver<S>,
    dispatcher: HttpDispatcher,
    endpoint: CollectorEndpoint,
    logger: OutcomeLogger<A>,
    stats: WorkerStats,
}

impl<S: SecretStore, A: AuditSink> ActivationWorker<S, A> {
    pub fn new(
        id: usize,
        resolver: CredentialResolver<S>,
        dispatcher: HttpDispatcher,
        endpoint: CollectorEndpoint,
        logger: OutcomeLogger<A>,
    ) -> Self {
        Self {
            id,
            resolver,
            dispatcher,
            endpoint,
            logger,
            stats: WorkerStats::default(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Must run once before the first row.
    pub async fn setup(&self) -> Result<(), WorkerError> {
        self.resolver.setup().await.map_err(|source| WorkerError::Setup {
            worker: self.id,
            source,
        })
    }

    /// Validate, transform, dispatch and log one row.
    #[instrument(skip_all, fields(worker = self.id))]
    pub async fn process(&mut self, row: Value) -> Result<RowResult, WorkerError> {
        self.stats.rows += 1;

        let row = match RawRow::from_value(row) {
            Ok(row) => row,
            Err(err) => {
                warn!(error = %err, "rejected row");
                self.stats.rejected += 1;
                return Ok(RowResult::Rejected);
            }
        };

        let payload = transform(&row);
        if payload.timestamp_micros.is_none() {
            debug!(
                client_id = %payload.client_id,
                raw = ?row.event_timestamp(),
                "unparseable event_timestamp, sending without one"
            );
            self.stats.unparseable_timestamps += 1;
        }

        let outcome = self
            .dispatcher
            .dispatch(&self.resolver, &self.endpoint, payload)
            .await;
        if outcome.is_success() {
            self.stats.sent_ok += 1;
        } else {
            self.stats.send_failed += 1;
        }

        let record = self
            .logger
            .log(&outcome)
            .await
            .map_err(|source| WorkerError::Audit {
                worker: self.id,
                source,
            })?;
        Ok(RowResult::Logged(record))
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    pub fn into_stats(self) -> WorkerStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditErrorKind, InMemoryAuditSink, TableSpec};
    use crate::retry::RetryPolicy;
    use crate::secret_store::InMemorySecretStore;
    use beacon_core::{CredentialSet, Destination, RunId};
    use serde_json::json;
    use std::sync::Arc;

    type TestWorker = ActivationWorker<Arc<InMemorySecretStore>, Arc<InMemoryAuditSink>>;

    // Nothing listens on port 9 locally; dispatches fail fast with a 500.
    fn worker(destination: Destination, store: InMemorySecretStore) -> (TestWorker, Arc<InMemoryAuditSink>) {
        let sink = Arc::new(InMemoryAuditSink::new(TableSpec::activation_log("p", "d")));
        let worker = ActivationWorker::new(
            0,
            CredentialResolver::new(destination, Arc::new(store)),
            HttpDispatcher::with_timeout(std::time::Duration::from_secs(2)).unwrap(),
            CollectorEndpoint::new("http://127.0.0.1:9", false).unwrap(),
            OutcomeLogger::new(
                sink.clone(),
                RunId::parse("202302251200").unwrap(),
                RetryPolicy::no_retry(),
            ),
        );
        (worker, sink)
    }

    fn direct() -> Destination {
        Destination::Direct(CredentialSet::new("G-1", "s"))
    }

    #[tokio::test]
    async fn invalid_rows_are_rejected_without_dispatch() {
        let (mut worker, sink) = worker(direct(), InMemorySecretStore::new());
        worker.setup().await.unwrap();

        let result = worker
            .process(json!({"event_name": "e", "event_timestamp": "2023-02-25"}))
            .await
            .unwrap();

        assert_eq!(result, RowResult::Rejected);
        assert_eq!(worker.stats().rejected, 1);
        assert_eq!(worker.stats().rows, 1);
        assert!(sink.records().is_empty());
    }

    #[tokio::test]
    async fn failed_dispatch_is_still_logged() {
        let (mut worker, sink) = worker(direct(), InMemorySecretStore::new());
        worker.setup().await.unwrap();

        let result = worker
            .process(json!({
                "client_id": "c1",
                "event_name": "purchase",
                "event_timestamp": "not a time",
            }))
            .await
            .unwrap();

        let RowResult::Logged(record) = result else {
            panic!("expected a logged row");
        };
        assert!(record.state.starts_with("SEND_FAIL"));
        assert_eq!(worker.stats().send_failed, 1);
        assert_eq!(worker.stats().unparseable_timestamps, 1);
        assert_eq!(sink.records().len(), 1);
    }

    #[tokio::test]
    async fn setup_failure_names_the_worker() {
        let (worker, _) = worker(
            Destination::MultiTenant {
                secret_name: "missing".into(),
            },
            InMemorySecretStore::new(),
        );

        let err = worker.setup().await.unwrap_err();
        assert!(matches!(err, WorkerError::Setup { worker: 0, .. }));
    }

    #[tokio::test]
    async fn audit_failure_stops_the_worker() {
        let (mut worker, sink) = worker(direct(), InMemorySecretStore::new());
        sink.fail_next([AuditErrorKind::PermissionDenied]);

        let err = worker
            .process(json!({"client_id": "c", "event_name": "e", "event_timestamp": "2023-02-25"}))
            .await
            .unwrap_err();

        assert!(matches!(err, WorkerError::Audit { worker: 0, .. }));
    }
}
