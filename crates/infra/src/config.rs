//! Run configuration and pre-flight validation.

use std::time::Duration;

use thiserror::Error;

use beacon_core::{Destination, DomainError, RunId};

use crate::audit::{DEFAULT_LOG_TABLE, TableSpec};
use crate::dispatcher::DISPATCH_TIMEOUT;
use crate::resolver::{CollectorEndpoint, DEFAULT_COLLECTOR_BASE};
use crate::retry::RetryPolicy;

/// Rows buffered between the source and the workers, per worker.
pub const QUEUE_DEPTH_PER_WORKER: usize = 16;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must not be empty")]
    Missing(&'static str),

    #[error("invalid run id: {0}")]
    RunId(#[source] DomainError),

    #[error("invalid destination: {0}")]
    Destination(#[source] DomainError),

    #[error("invalid collector url {url:?}: {source}")]
    CollectorUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("worker count must be at least 1")]
    NoWorkers,
}

/// Parameters of one activation run.
#[derive(Debug, Clone)]
pub struct ActivationConfig {
    pub project: String,
    pub source_table: String,
    /// `YYYYMMDDHHmm`
    pub run_id: String,
    /// Literal measurement id, or the secret-store sentinel.
    pub measurement_id: String,
    /// Literal api secret, or the secret name in multi-tenant mode.
    pub api_secret: String,
    pub log_dataset: String,
    pub log_table: String,
    pub validate_only: bool,
    pub workers: usize,
    pub queue_depth: usize,
    pub collector_base_url: String,
    pub dispatch_timeout: Duration,
    pub audit_retry: RetryPolicy,
}

impl ActivationConfig {
    pub fn new(
        project: impl Into<String>,
        source_table: impl Into<String>,
        run_id: impl Into<String>,
        measurement_id: impl Into<String>,
        api_secret: impl Into<String>,
        log_dataset: impl Into<String>,
    ) -> Self {
        let workers = default_workers();
        Self {
            project: project.into(),
            source_table: source_table.into(),
            run_id: run_id.into(),
            measurement_id: measurement_id.into(),
            api_secret: api_secret.into(),
            log_dataset: log_dataset.into(),
            log_table: DEFAULT_LOG_TABLE.to_string(),
            validate_only: false,
            workers,
            queue_depth: workers * QUEUE_DEPTH_PER_WORKER,
            collector_base_url: DEFAULT_COLLECTOR_BASE.to_string(),
            dispatch_timeout: DISPATCH_TIMEOUT,
            audit_retry: RetryPolicy::default(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self.queue_depth = workers.max(1) * QUEUE_DEPTH_PER_WORKER;
        self
    }

    pub fn with_validate_only(mut self, validate_only: bool) -> Self {
        self.validate_only = validate_only;
        self
    }

    pub fn with_collector_base_url(mut self, url: impl Into<String>) -> Self {
        self.collector_base_url = url.into();
        self
    }

    pub fn with_log_table(mut self, table: impl Into<String>) -> Self {
        self.log_table = table.into();
        self
    }

    pub fn with_audit_retry(mut self, policy: RetryPolicy) -> Self {
        self.audit_retry = policy;
        self
    }

    /// Check every parameter before any row is read.
    pub fn validate(&self) -> Result<RunPlan, ConfigError> {
        for (name, value) in [
            ("project", &self.project),
            ("source table", &self.source_table),
            ("log dataset", &self.log_dataset),
            ("log table", &self.log_table),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing(name));
            }
        }
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }

        let run = RunId::parse(&self.run_id).map_err(ConfigError::RunId)?;
        let destination = Destination::from_params(&self.measurement_id, &self.api_secret)
            .map_err(ConfigError::Destination)?;
        let endpoint = CollectorEndpoint::new(&self.collector_base_url, self.validate_only)
            .map_err(|source| ConfigError::CollectorUrl {
                url: self.collector_base_url.clone(),
                source,
            })?;
        let table = TableSpec::activation_log(&self.project, &self.log_dataset)
            .with_table(&self.log_table);

        Ok(RunPlan {
            run,
            destination,
            endpoint,
            table,
        })
    }
}

/// Validated, typed form of an [`ActivationConfig`].
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub run: RunId,
    pub destination: Destination,
    pub endpoint: CollectorEndpoint,
    pub table: TableSpec,
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::CredentialSet;

    fn config() -> ActivationConfig {
        ActivationConfig::new("proj", "ds.rows", "202302251200", "G-ABC", "s3cret", "ds")
    }

    #[test]
    fn valid_direct_config() {
        let plan = config().validate().unwrap();

        assert_eq!(plan.run.as_str(), "202302251200");
        assert_eq!(
            plan.destination,
            Destination::Direct(CredentialSet::new("G-ABC", "s3cret"))
        );
        assert!(!plan.endpoint.validate_only());
        assert_eq!(plan.table.qualified_name(), "proj.ds.activation_ga4mp_log");
    }

    #[test]
    fn sentinel_selects_multi_tenant() {
        let mut config = config().with_validate_only(true).with_log_table("custom_log");
        config.measurement_id = "secret-manager".into();
        config.api_secret = "stream-secrets".into();

        let plan = config.validate().unwrap();
        assert_eq!(
            plan.destination,
            Destination::MultiTenant {
                secret_name: "stream-secrets".into()
            }
        );
        assert!(plan.endpoint.validate_only());
        assert_eq!(plan.table.table, "custom_log");
    }

    #[test]
    fn rejects_bad_parameters() {
        let mut bad_run = config();
        bad_run.run_id = "2023-02-25".into();
        assert!(matches!(bad_run.validate(), Err(ConfigError::RunId(_))));

        let mut no_secret = config();
        no_secret.api_secret = " ".into();
        assert!(matches!(no_secret.validate(), Err(ConfigError::Destination(_))));

        let mut no_project = config();
        no_project.project = String::new();
        assert!(matches!(no_project.validate(), Err(ConfigError::Missing("project"))));

        assert!(matches!(
            config().with_workers(0).validate(),
            Err(ConfigError::NoWorkers)
        ));

        assert!(matches!(
            config().with_collector_base_url("not a url").validate(),
            Err(ConfigError::CollectorUrl { .. })
        ));
    }

    #[test]
    fn queue_depth_follows_worker_count() {
        let config = config().with_workers(3);
        assert_eq!(config.queue_depth, 3 * QUEUE_DEPTH_PER_WORKER);
    }
}
