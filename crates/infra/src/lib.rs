//! Infrastructure layer: row sources, secret stores, audit sinks, HTTP
//! delivery and the worker runtime.

pub mod audit;
pub mod config;
pub mod dispatcher;
pub mod logger;
pub mod pipeline;
pub mod resolver;
pub mod retry;
pub mod secret_store;
pub mod source;
pub mod workers;

pub use audit::{AuditErrorKind, AuditSink, AuditStoreError, TableSpec};
pub use config::{ActivationConfig, ConfigError, RunPlan};
pub use dispatcher::HttpDispatcher;
pub use logger::{LogError, OutcomeLogger};
pub use pipeline::{RunError, run_activation};
pub use resolver::{CollectorEndpoint, CredentialResolver, ResolveError};
pub use retry::{RetryError, RetryPolicy};
pub use secret_store::{FileSecretStore, InMemorySecretStore, SecretStore, SecretStoreError};
pub use source::{RowSource, SourceError};
pub use workers::{RunSummary, WorkerStats};
