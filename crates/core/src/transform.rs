//! Row-to-payload transformation.
//!
//! Pure and infallible: every validated [`RawRow`] maps to exactly one
//! [`Payload`]. The only lossy step is timestamp parsing, which degrades to a
//! `null` timestamp instead of rejecting the row.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};

use crate::payload::{Payload, UserProperty};
use crate::row::{EVENT_PARAM_PREFIX, RawRow, STREAM_ID, USER_DATA, USER_ID, USER_PROPERTY_PREFIX};

/// Accepted timestamp layouts, most specific first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampFormat {
    /// `2023-02-25 10:15:00.123456 UTC`
    FractionalWithZone,
    /// `2023-02-25 10:15:00 UTC`
    SecondsWithZone,
    /// `2023-02-25 10:15:00`
    Seconds,
    /// `2023-02-25`
    DateOnly,
}

impl TimestampFormat {
    pub const PRECEDENCE: [TimestampFormat; 4] = [
        TimestampFormat::FractionalWithZone,
        TimestampFormat::SecondsWithZone,
        TimestampFormat::Seconds,
        TimestampFormat::DateOnly,
    ];

    pub fn pattern(self) -> &'static str {
        match self {
            TimestampFormat::FractionalWithZone => "%Y-%m-%d %H:%M:%S%.f UTC",
            TimestampFormat::SecondsWithZone => "%Y-%m-%d %H:%M:%S UTC",
            TimestampFormat::Seconds => "%Y-%m-%d %H:%M:%S",
            TimestampFormat::DateOnly => "%Y-%m-%d",
        }
    }

    /// Parse `input` as UTC microseconds since the epoch.
    pub fn parse_micros(self, input: &str) -> Option<i64> {
        let naive = match self {
            TimestampFormat::DateOnly => NaiveDate::parse_from_str(input, self.pattern())
                .ok()?
                .and_hms_opt(0, 0, 0)?,
            _ => NaiveDateTime::parse_from_str(input, self.pattern()).ok()?,
        };
        Some(naive.and_utc().timestamp_micros())
    }
}

/// Parse a warehouse timestamp; the first format in precedence order wins.
pub fn parse_timestamp_micros(input: &str) -> Option<i64> {
    TimestampFormat::PRECEDENCE
        .iter()
        .find_map(|format| format.parse_micros(input))
}

/// Dynamic columns split by prefix.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertySplit {
    pub user_properties: BTreeMap<String, UserProperty>,
    pub event_params: Map<String, Value>,
}

/// Strip a 3-character property prefix and at most one trailing underscore.
///
/// The trailing underscore lets a column like `ep_client_id_` carry a name
/// that would otherwise collide with a reserved column.
pub fn property_name(key: &str) -> Option<&str> {
    let rest = key
        .strip_prefix(USER_PROPERTY_PREFIX)
        .or_else(|| key.strip_prefix(EVENT_PARAM_PREFIX))?;
    Some(rest.strip_suffix('_').unwrap_or(rest))
}

/// Single pass over the row producing disjoint user-property and
/// event-parameter maps. Null values are dropped.
pub fn classify_properties(row: &RawRow) -> PropertySplit {
    let mut split = PropertySplit::default();

    for (key, value) in row.iter() {
        if value.is_null() {
            continue;
        }
        let Some(name) = property_name(key) else {
            continue;
        };

        if key.starts_with(USER_PROPERTY_PREFIX) {
            split
                .user_properties
                .insert(name.to_string(), UserProperty::new(value.clone()));
        } else {
            split.event_params.insert(name.to_string(), value.clone());
        }
    }

    split
}

/// Convert one warehouse row into its collector payload.
pub fn transform(row: &RawRow) -> Payload {
    let mut payload = Payload::new(row.client_id(), row.event_name());

    payload.user_id = row.get(USER_ID).cloned();
    payload.timestamp_micros = row.event_timestamp().and_then(parse_timestamp_micros);

    let PropertySplit {
        user_properties,
        event_params,
    } = classify_properties(row);

    if !user_properties.is_empty() {
        payload.user_properties = Some(user_properties);
    }
    payload.events[0].params = event_params;

    payload.user_data = row.get(USER_DATA).cloned();
    payload.stream_id = row.get(STREAM_ID).cloned();

    payload
}
