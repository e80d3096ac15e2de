//! HTTP delivery of payloads to the collector.
//!
//! One POST per payload, no retry. Transport failures are folded into a
//! [`DispatchOutcome`] so every payload produces exactly one audit record.

use std::time::Duration;

use reqwest::Url;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, instrument, warn};

use beacon_core::outcome::STATUS_INTERNAL_ERROR;
use beacon_core::{DispatchOutcome, Payload};

use crate::resolver::{CollectorEndpoint, CredentialResolver};
use crate::secret_store::SecretStore;

/// Per-request timeout.
pub const DISPATCH_TIMEOUT: Duration = Duration::from_secs(20);

/// Thin wrapper around a pooled HTTP client.
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: reqwest::Client,
}

impl HttpDispatcher {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_timeout(DISPATCH_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Resolve credentials for `payload` and send it.
    ///
    /// `stream_id` is removed from the payload before anything else, so
    /// neither the request body nor the audit record carries it.
    #[instrument(skip_all, fields(client_id = %payload.client_id, event = %payload.event_name()))]
    pub async fn dispatch<S: SecretStore>(
        &self,
        resolver: &CredentialResolver<S>,
        endpoint: &CollectorEndpoint,
        mut payload: Payload,
    ) -> DispatchOutcome {
        let stream_id = payload.take_stream_id();
        let credentials = match resolver.resolve(stream_id.as_ref()) {
            Ok(credentials) => credentials,
            Err(err) => {
                warn!(error = %err, "credential resolution failed");
                return DispatchOutcome::failed(payload, err);
            }
        };

        self.send(endpoint.url(credentials), payload).await
    }

    /// POST `payload` as JSON to `url`.
    pub async fn send(&self, url: Url, payload: Payload) -> DispatchOutcome {
        let result = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .json(&payload)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(err) => return transport_failure(payload, err),
        };

        let status = response.status().as_u16();
        match response.text().await {
            Ok(body) => {
                debug!(status, "collector responded");
                DispatchOutcome::new(payload, status, body)
            }
            Err(err) => transport_failure(payload, err),
        }
    }
}

fn transport_failure(payload: Payload, err: reqwest::Error) -> DispatchOutcome {
    // Redact the query string; it carries the api secret.
    let err = err.without_url();
    let status = err
        .status()
        .map(|s| s.as_u16())
        .unwrap_or(STATUS_INTERNAL_ERROR);
    warn!(status, error = %err, "collector request failed");
    DispatchOutcome::new(payload, status, err.to_string())
}
