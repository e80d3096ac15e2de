//! Audit logging of dispatch outcomes.

use thiserror::Error;
use tracing::{debug, instrument};

use beacon_core::{DispatchOutcome, DomainError, LogRecord, RunId};

use crate::audit::{AuditSink, AuditStoreError};
use crate::retry::{RetryError, RetryPolicy, retry_with_backoff};

#[derive(Debug, Error)]
pub enum LogError {
    #[error("failed to build log record: {0}")]
    Record(#[from] DomainError),

    #[error("failed to write log record: {0}")]
    Store(#[from] RetryError<AuditStoreError>),
}

/// Writes one audit record per dispatch outcome.
///
/// Transient audit-store errors are retried with backoff per `retry`; the
/// record itself is built once so retries never change its id.
#[derive(Debug, Clone)]
pub struct OutcomeLogger<A> {
    sink: A,
    run: RunId,
    retry: RetryPolicy,
}

impl<A: AuditSink> OutcomeLogger<A> {
    pub fn new(sink: A, run: RunId, retry: RetryPolicy) -> Self {
        Self { sink, run, retry }
    }

    pub fn run(&self) -> &RunId {
        &self.run
    }

    #[instrument(skip_all, fields(client_id = %outcome.payload.client_id, status = outcome.status_code), err)]
    pub async fn log(&self, outcome: &DispatchOutcome) -> Result<LogRecord, LogError> {
        let record = LogRecord::from_outcome(outcome, &self.run)?;

        let batch = std::slice::from_ref(&record);
        let sink = &self.sink;
        retry_with_backoff(&self.retry, "audit_append", AuditStoreError::is_retryable, || {
            sink.append(batch)
        })
        .await?;

        debug!(id = %record.id, state = %record.state, "logged outcome");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditErrorKind, InMemoryAuditSink, TableSpec};
    use beacon_core::{Payload, SendState};
    use std::sync::Arc;
    use std::time::Duration;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::exponential(4, Duration::from_millis(1), Duration::from_millis(5))
    }

    fn logger(sink: Arc<InMemoryAuditSink>) -> OutcomeLogger<Arc<InMemoryAuditSink>> {
        OutcomeLogger::new(sink, RunId::parse("202302251200").unwrap(), fast_retry())
    }

    fn sink() -> Arc<InMemoryAuditSink> {
        Arc::new(InMemoryAuditSink::new(TableSpec::activation_log("p", "d")))
    }

    #[tokio::test]
    async fn success_and_failure_states() {
        let sink = sink();
        let logger = logger(sink.clone());

        let ok = logger
            .log(&DispatchOutcome::new(Payload::new("a", "e"), 204, ""))
            .await
            .unwrap();
        let fail = logger
            .log(&DispatchOutcome::new(Payload::new("b", "e"), 400, "bad"))
            .await
            .unwrap();

        assert_eq!(ok.state, SendState::Ok.as_str());
        assert_eq!(fail.state, "SEND_FAIL 400");
        assert_eq!(fail.response, "bad");
        assert_eq!(sink.records(), vec![ok, fail]);
    }

    #[tokio::test]
    async fn transient_errors_are_retried_with_the_same_record() {
        let sink = sink();
        sink.fail_next([AuditErrorKind::TooManyRequests, AuditErrorKind::ServiceUnavailable]);

        let record = logger(sink.clone())
            .log(&DispatchOutcome::new(Payload::new("a", "e"), 204, ""))
            .await
            .unwrap();

        assert_eq!(sink.append_attempts(), 3);
        assert_eq!(sink.records(), vec![record]);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let sink = sink();
        sink.fail_next([AuditErrorKind::PermissionDenied]);

        let err = logger(sink.clone())
            .log(&DispatchOutcome::new(Payload::new("a", "e"), 204, ""))
            .await
            .unwrap_err();

        assert!(matches!(err, LogError::Store(RetryError::Permanent(_))));
        assert_eq!(sink.append_attempts(), 1);
        assert!(sink.records().is_empty());
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let sink = sink();
        sink.fail_next([AuditErrorKind::BadGateway; 10]);

        let err = logger(sink.clone())
            .log(&DispatchOutcome::new(Payload::new("a", "e"), 204, ""))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            LogError::Store(RetryError::Exhausted { attempts: 4, .. })
        ));
        assert_eq!(sink.append_attempts(), 4);
    }
}
