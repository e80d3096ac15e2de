//! Destination credentials and the multi-tenant secret document.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DomainError, DomainResult};

/// Measurement id value that switches a run to multi-tenant resolution.
pub const SECRET_STORE_SENTINEL: &str = "secret-manager";

/// Endpoint credentials of one destination stream.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSet {
    pub measurement_id: String,
    pub api_secret: String,
}

impl CredentialSet {
    pub fn new(measurement_id: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            measurement_id: measurement_id.into(),
            api_secret: api_secret.into(),
        }
    }
}

// Keep the secret out of logs.
impl core::fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CredentialSet")
            .field("measurement_id", &self.measurement_id)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// One entry of the secret document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSecret {
    #[serde(default)]
    pub property_id: Option<String>,
    #[serde(flatten)]
    pub credentials: CredentialSet,
}

/// How a run finds its destination credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// One literal credential pair for every payload.
    Direct(CredentialSet),
    /// Per-row lookup in a secret document fetched by name.
    MultiTenant { secret_name: String },
}

impl Destination {
    /// Interpret the measurement id / secret run parameters.
    pub fn from_params(measurement_id: &str, api_secret: &str) -> DomainResult<Self> {
        if measurement_id.trim().is_empty() {
            return Err(DomainError::validation("measurement id must not be empty"));
        }
        if api_secret.trim().is_empty() {
            return Err(DomainError::validation("api secret must not be empty"));
        }

        if measurement_id == SECRET_STORE_SENTINEL {
            Ok(Self::MultiTenant {
                secret_name: api_secret.to_string(),
            })
        } else {
            Ok(Self::Direct(CredentialSet::new(measurement_id, api_secret)))
        }
    }

    pub fn is_multi_tenant(&self) -> bool {
        matches!(self, Destination::MultiTenant { .. })
    }
}

/// Parsed secret document: stream id to credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSecrets {
    streams: HashMap<String, StreamSecret>,
}

impl StreamSecrets {
    /// Parse the UTF-8 JSON secret payload.
    pub fn from_json_bytes(bytes: &[u8]) -> DomainResult<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| DomainError::invalid_secret(format!("not UTF-8: {e}")))?;
        let streams: HashMap<String, StreamSecret> = serde_json::from_str(text)
            .map_err(|e| DomainError::invalid_secret(e.to_string()))?;
        Ok(Self { streams })
    }

    pub fn get(&self, stream_id: &str) -> Option<&CredentialSet> {
        self.streams.get(stream_id).map(|s| &s.credentials)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

impl FromIterator<(String, CredentialSet)> for StreamSecrets {
    fn from_iter<T: IntoIterator<Item = (String, CredentialSet)>>(iter: T) -> Self {
        Self {
            streams: iter
                .into_iter()
                .map(|(id, credentials)| {
                    (
                        id,
                        StreamSecret {
                            property_id: None,
                            credentials,
                        },
                    )
                })
                .collect(),
        }
    }
}

/// Render a row's `stream_id` value as a lookup key.
///
/// Warehouse ids arrive as strings or integers; anything else has no key.
pub fn stream_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
