//! Warehouse records as read from the activation source.

use serde_json::{Map, Value};

use crate::error::{DomainError, DomainResult};

pub const CLIENT_ID: &str = "client_id";
pub const USER_ID: &str = "user_id";
pub const EVENT_TIMESTAMP: &str = "event_timestamp";
pub const EVENT_NAME: &str = "event_name";
pub const USER_DATA: &str = "user_data";
pub const STREAM_ID: &str = "stream_id";

/// Prefix marking a dynamic user property column.
pub const USER_PROPERTY_PREFIX: &str = "up_";
/// Prefix marking a dynamic event parameter column.
pub const EVENT_PARAM_PREFIX: &str = "ep_";

/// One warehouse record: column name to value.
///
/// Construction checks the required columns so the transformer can treat
/// `client_id` and `event_name` as always present.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    columns: Map<String, Value>,
}

impl RawRow {
    /// Validate a raw JSON object as an activation row.
    pub fn new(columns: Map<String, Value>) -> DomainResult<Self> {
        for key in [CLIENT_ID, EVENT_NAME] {
            match columns.get(key) {
                Some(Value::String(_)) => {}
                Some(other) => {
                    return Err(DomainError::invalid_row(format!(
                        "column `{key}` must be a string, got {other}"
                    )));
                }
                None => {
                    return Err(DomainError::invalid_row(format!(
                        "missing required column `{key}`"
                    )));
                }
            }
        }

        if !columns.contains_key(EVENT_TIMESTAMP) {
            return Err(DomainError::invalid_row(format!(
                "missing required column `{EVENT_TIMESTAMP}`"
            )));
        }

        Ok(Self { columns })
    }

    /// Parse a JSON value that must be an object.
    pub fn from_value(value: Value) -> DomainResult<Self> {
        match value {
            Value::Object(columns) => Self::new(columns),
            other => Err(DomainError::invalid_row(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }

    pub fn client_id(&self) -> &str {
        self.str_column(CLIENT_ID)
    }

    pub fn event_name(&self) -> &str {
        self.str_column(EVENT_NAME)
    }

    /// Raw timestamp text; `None` when the column is not a string.
    pub fn event_timestamp(&self) -> Option<&str> {
        self.columns.get(EVENT_TIMESTAMP).and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.columns.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.columns.iter()
    }

    fn str_column(&self, key: &str) -> &str {
        // Presence and type checked in `new`.
        self.columns.get(key).and_then(Value::as_str).unwrap_or_default()
    }
}

impl TryFrom<Value> for RawRow {
    type Error = DomainError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_minimal_row() {
        let row = RawRow::from_value(json!({
            "client_id": "c1",
            "event_name": "purchase",
            "event_timestamp": "2023-02-25",
        }))
        .unwrap();

        assert_eq!(row.client_id(), "c1");
        assert_eq!(row.event_name(), "purchase");
        assert_eq!(row.event_timestamp(), Some("2023-02-25"));
    }

    #[test]
    fn rejects_missing_client_id() {
        let err = RawRow::from_value(json!({
            "event_name": "purchase",
            "event_timestamp": "2023-02-25",
        }))
        .unwrap_err();
        assert!(matches!(err, DomainError::InvalidRow(msg) if msg.contains("client_id")));
    }

    #[test]
    fn rejects_non_string_event_name() {
        let err = RawRow::from_value(json!({
            "client_id": "c1",
            "event_name": 7,
            "event_timestamp": "2023-02-25",
        }))
        .unwrap_err();
        assert!(matches!(err, DomainError::InvalidRow(msg) if msg.contains("event_name")));
    }

    #[test]
    fn non_string_timestamp_is_kept_but_unreadable() {
        let row = RawRow::from_value(json!({
            "client_id": "c1",
            "event_name": "purchase",
            "event_timestamp": null,
        }))
        .unwrap();
        assert_eq!(row.event_timestamp(), None);
    }

    #[test]
    fn rejects_non_object() {
        assert!(RawRow::from_value(json!([1, 2, 3])).is_err());
    }
}
