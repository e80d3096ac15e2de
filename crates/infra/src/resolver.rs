//! Destination credential resolution.
//!
//! Direct runs carry one credential pair. Multi-tenant runs fetch the secret
//! document once per worker in [`CredentialResolver::setup`] and look each
//! row's `stream_id` up in that cached copy.

use reqwest::Url;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

use beacon_core::credentials::stream_key;
use beacon_core::{CredentialSet, Destination, DomainError, StreamSecrets};

use crate::secret_store::{SecretStore, SecretStoreError};

/// Default collector host.
pub const DEFAULT_COLLECTOR_BASE: &str = "https://www.google-analytics.com";

/// Credential resolution error.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("failed to fetch secret document: {0}")]
    SecretFetch(#[from] SecretStoreError),

    #[error(transparent)]
    SecretParse(#[from] DomainError),

    #[error("secret document not loaded; setup() must run before resolve()")]
    NotInitialized,

    #[error("row has no usable stream_id")]
    MissingStreamId,

    #[error("stream_id {0} not found in secret document")]
    UnknownStream(String),
}

/// Per-worker credential resolver.
///
/// The secret document cache is owned by the resolver and lives as long as
/// the worker that owns it.
#[derive(Debug)]
pub struct CredentialResolver<S> {
    destination: Destination,
    store: S,
    secrets: OnceCell<StreamSecrets>,
}

impl<S: SecretStore> CredentialResolver<S> {
    pub fn new(destination: Destination, store: S) -> Self {
        Self {
            destination,
            store,
            secrets: OnceCell::new(),
        }
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Load the secret document (multi-tenant mode only).
    ///
    /// Fetches at most once; later calls return the cached result.
    #[instrument(skip(self), err)]
    pub async fn setup(&self) -> Result<(), ResolveError> {
        let Destination::MultiTenant { secret_name } = &self.destination else {
            return Ok(());
        };

        let secrets = self
            .secrets
            .get_or_try_init(|| async {
                let bytes = self.store.fetch(secret_name).await?;
                let secrets = StreamSecrets::from_json_bytes(&bytes)?;
                Ok::<_, ResolveError>(secrets)
            })
            .await?;

        debug!(streams = secrets.len(), "loaded stream secrets");
        Ok(())
    }

    /// Credentials for a payload with the given `stream_id`.
    pub fn resolve(&self, stream_id: Option<&Value>) -> Result<&CredentialSet, ResolveError> {
        match &self.destination {
            Destination::Direct(credentials) => Ok(credentials),
            Destination::MultiTenant { .. } => {
                let secrets = self.secrets.get().ok_or(ResolveError::NotInitialized)?;
                let key = stream_id
                    .and_then(stream_key)
                    .ok_or(ResolveError::MissingStreamId)?;
                secrets.get(&key).ok_or(ResolveError::UnknownStream(key))
            }
        }
    }
}

/// Collector endpoint builder.
#[derive(Debug, Clone)]
pub struct CollectorEndpoint {
    base: Url,
    validate_only: bool,
}

impl CollectorEndpoint {
    /// `validate_only` switches to the non-mutating validation path.
    pub fn new(base: &str, validate_only: bool) -> Result<Self, url::ParseError> {
        Ok(Self {
            base: Url::parse(base)?,
            validate_only,
        })
    }

    pub fn validate_only(&self) -> bool {
        self.validate_only
    }

    /// `<base>/mp/collect?measurement_id=..&api_secret=..`, or the
    /// `/debug/mp/collect` variant in validation mode.
    pub fn url(&self, credentials: &CredentialSet) -> Url {
        let mut url = self.base.clone();
        let prefix = url.path().trim_end_matches('/').to_string();
        let path = if self.validate_only {
            format!("{prefix}/debug/mp/collect")
        } else {
            format!("{prefix}/mp/collect")
        };
        url.set_path(&path);
        url.query_pairs_mut()
            .clear()
            .append_pair("measurement_id", &credentials.measurement_id)
            .append_pair("api_secret", &credentials.api_secret);
        url
    }
}
