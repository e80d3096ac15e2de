use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use beacon_core::LogRecord;

use super::{AuditErrorKind, AuditSink, AuditStoreError, TableSpec};

/// In-memory audit sink for tests/dev.
///
/// Failures can be scripted with [`InMemoryAuditSink::fail_next`]; each
/// scripted failure is consumed by one append attempt.
#[derive(Debug)]
pub struct InMemoryAuditSink {
    spec: TableSpec,
    created: Mutex<bool>,
    records: Mutex<Vec<LogRecord>>,
    scripted_failures: Mutex<VecDeque<AuditErrorKind>>,
    attempts: AtomicUsize,
}

impl InMemoryAuditSink {
    pub fn new(spec: TableSpec) -> Self {
        Self {
            spec,
            created: Mutex::new(false),
            records: Mutex::new(Vec::new()),
            scripted_failures: Mutex::new(VecDeque::new()),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Make the next appends fail with the given kinds, in order.
    pub fn fail_next(&self, kinds: impl IntoIterator<Item = AuditErrorKind>) {
        self.scripted_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(kinds);
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn table_exists(&self) -> bool {
        *self.created.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of append calls, failed ones included.
    pub fn append_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn spec(&self) -> &TableSpec {
        &self.spec
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn append(&self, records: &[LogRecord]) -> Result<(), AuditStoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let scripted = self
            .scripted_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        if let Some(kind) = scripted {
            return Err(AuditStoreError::new(kind, "scripted failure"));
        }

        *self.created.lock().unwrap_or_else(|e| e.into_inner()) = true;
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(records);
        Ok(())
    }
}
