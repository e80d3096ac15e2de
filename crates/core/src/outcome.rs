//! Result of one dispatch attempt.

use serde::{Deserialize, Serialize};

use crate::payload::Payload;

/// Status the collector answers with when it accepted a hit.
pub const STATUS_NO_CONTENT: u16 = 204;

/// Status recorded for failures that never produced an HTTP response.
pub const STATUS_INTERNAL_ERROR: u16 = 500;

/// What happened to one payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub payload: Payload,
    pub status_code: u16,
    pub response_body: String,
}

impl DispatchOutcome {
    pub fn new(payload: Payload, status_code: u16, response_body: impl Into<String>) -> Self {
        Self {
            payload,
            status_code,
            response_body: response_body.into(),
        }
    }

    /// Outcome for a failure captured before or instead of a collector reply.
    pub fn failed(payload: Payload, error: impl core::fmt::Display) -> Self {
        Self::new(payload, STATUS_INTERNAL_ERROR, error.to_string())
    }

    pub fn is_success(&self) -> bool {
        self.status_code == STATUS_NO_CONTENT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_no_content_counts_as_success() {
        let payload = Payload::new("c1", "e");
        assert!(DispatchOutcome::new(payload.clone(), 204, "").is_success());
        assert!(!DispatchOutcome::new(payload.clone(), 200, "").is_success());
        assert!(!DispatchOutcome::failed(payload, "boom").is_success());
    }

    #[test]
    fn failed_outcome_carries_error_text() {
        let outcome = DispatchOutcome::failed(Payload::new("c1", "e"), "unknown stream 7");
        assert_eq!(outcome.status_code, 500);
        assert_eq!(outcome.response_body, "unknown stream 7");
    }
}
