//! Strongly-typed identifiers used across the activation run.

use core::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Format of the run identifier: `YYYYMMDDHHmm`.
pub const RUN_ID_FORMAT: &str = "%Y%m%d%H%M";

/// Identifier of one audit record.
///
/// Freshly generated for every record, never derived from the payload, so
/// logging the same payload twice yields two distinct rows.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Create a new random identifier (UUIDv4).
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for RecordId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for RecordId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid =
            Uuid::from_str(s).map_err(|e| DomainError::invalid_id(format!("RecordId: {}", e)))?;
        Ok(Self(uuid))
    }
}

/// Logical timestamp of one activation run (`YYYYMMDDHHmm`).
///
/// Kept verbatim for the `prediction_run_id` column and parsed once into the
/// UTC partition timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunId {
    raw: String,
    ts: DateTime<Utc>,
}

impl RunId {
    /// Parse and validate a run identifier.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        // chrono accepts unpadded fields; the run id is strictly 12 digits.
        if raw.len() != 12 || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::invalid_id(format!(
                "RunId: expected YYYYMMDDHHmm, got {raw:?}"
            )));
        }

        let naive = NaiveDateTime::parse_from_str(raw, RUN_ID_FORMAT)
            .map_err(|e| DomainError::invalid_id(format!("RunId: {raw:?}: {e}")))?;

        Ok(Self {
            raw: raw.to_string(),
            ts: naive.and_utc(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Partition timestamp of the run.
    pub fn run_ts(&self) -> DateTime<Utc> {
        self.ts
    }
}

impl FromStr for RunId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl core::fmt::Display for RunId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.raw)
    }
}
