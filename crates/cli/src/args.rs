use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use beacon_infra::audit::DEFAULT_LOG_TABLE;
use beacon_infra::resolver::DEFAULT_COLLECTOR_BASE;
use beacon_infra::{ActivationConfig, RetryPolicy};
use beacon_observability::LogFormat;

/// Send warehouse rows to an analytics collector and log every outcome.
#[derive(Debug, Parser)]
#[command(name = "beacon", version, about, long_about = None)]
pub struct Cli {
    /// Project that owns the log dataset
    #[arg(long, env = "BEACON_PROJECT")]
    pub project: String,

    /// Source table (`schema.table`) holding the activation rows
    #[arg(long, env = "BEACON_SOURCE_TABLE")]
    pub source_table: String,

    /// Run identifier, `YYYYMMDDHHmm`
    #[arg(long, env = "BEACON_RUN_ID")]
    pub run_id: String,

    /// Measurement id, or `secret-manager` for per-row stream lookup
    #[arg(long, env = "BEACON_MEASUREMENT_ID")]
    pub measurement_id: String,

    /// Api secret, or the secret name holding the stream document
    #[arg(long, env = "BEACON_API_SECRET", hide_env_values = true)]
    pub api_secret: String,

    /// Dataset (schema) of the audit log table
    #[arg(long, env = "BEACON_LOG_DATASET")]
    pub log_dataset: String,

    #[arg(long, env = "BEACON_LOG_TABLE", default_value = DEFAULT_LOG_TABLE)]
    pub log_table: String,

    /// Send to the validation endpoint instead of the live one
    #[arg(long, env = "BEACON_VALIDATE_ONLY")]
    pub validate_only: bool,

    /// Worker tasks (default: available parallelism)
    #[arg(long, env = "BEACON_WORKERS")]
    pub workers: Option<usize>,

    #[arg(long, env = "BEACON_COLLECTOR_URL", default_value = DEFAULT_COLLECTOR_BASE)]
    pub collector_url: String,

    /// Directory with one file per secret name
    #[arg(long, env = "BEACON_SECRETS_DIR")]
    pub secrets_dir: Option<PathBuf>,

    /// Postgres connection string for the row source and/or audit table
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Read rows from a JSONL file instead of the database
    #[arg(long, env = "BEACON_SOURCE_FILE")]
    pub source_file: Option<PathBuf>,

    /// Write audit records as JSONL under this directory instead of the database
    #[arg(long, env = "BEACON_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Attempts per audit write, the first one included
    #[arg(long, env = "BEACON_AUDIT_ATTEMPTS", default_value_t = 6)]
    pub audit_attempts: u32,

    /// Per-request collector timeout in seconds
    #[arg(long, env = "BEACON_DISPATCH_TIMEOUT_SECS", default_value_t = 20)]
    pub dispatch_timeout_secs: u64,

    #[arg(long, env = "BEACON_LOG_FORMAT", default_value = "json")]
    pub log_format: LogFormat,
}

impl Cli {
    pub fn activation_config(&self) -> ActivationConfig {
        let mut config = ActivationConfig::new(
            &self.project,
            &self.source_table,
            &self.run_id,
            &self.measurement_id,
            &self.api_secret,
            &self.log_dataset,
        )
        .with_log_table(&self.log_table)
        .with_validate_only(self.validate_only)
        .with_collector_base_url(&self.collector_url)
        .with_audit_retry(RetryPolicy {
            max_attempts: self.audit_attempts,
            ..RetryPolicy::default()
        });

        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        config.dispatch_timeout = Duration::from_secs(self.dispatch_timeout_secs);
        config
    }
}
