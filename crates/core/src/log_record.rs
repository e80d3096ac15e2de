//! Audit records for dispatch outcomes.
//!
//! A record is built once per dispatch attempt and never changes afterwards.
//! Field names on the wire follow the audit table columns.

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DomainError, DomainResult};
use crate::id::{RecordId, RunId};
use crate::outcome::DispatchOutcome;
use crate::payload::Payload;

/// Delivery classification stored in the `state` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Ok,
    Fail,
}

impl SendState {
    pub fn as_str(self) -> &'static str {
        match self {
            SendState::Ok => "SEND_OK",
            SendState::Fail => "SEND_FAIL",
        }
    }

    /// `"SEND_OK 204"`, `"SEND_FAIL 500"`, ...
    pub fn label(self, status_code: u16) -> String {
        format!("{} {}", self.as_str(), status_code)
    }
}

/// One row of the activation audit table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(rename = "prediction_run_ts")]
    pub run_ts: DateTime<Utc>,
    #[serde(rename = "prediction_run_id")]
    pub run_id: String,
    pub id: RecordId,
    pub client_id: String,
    pub event_name: String,
    pub payload_md5: String,
    #[serde(rename = "payload")]
    pub payload_json: String,
    pub response: String,
    pub state: String,
}

impl LogRecord {
    /// Build the audit record for `outcome` in run `run`.
    pub fn from_outcome(outcome: &DispatchOutcome, run: &RunId) -> DomainResult<Self> {
        let payload_json = sorted_payload_json(&outcome.payload)?;
        let state = if outcome.is_success() {
            SendState::Ok
        } else {
            SendState::Fail
        };

        Ok(Self {
            run_ts: run.run_ts(),
            run_id: run.as_str().to_string(),
            id: RecordId::new(),
            client_id: outcome.payload.client_id.clone(),
            event_name: outcome.payload.event_name().to_string(),
            payload_md5: md5_hex(&payload_json),
            payload_json,
            response: outcome.response_body.clone(),
            state: state.label(outcome.status_code),
        })
    }

    pub fn is_success(&self) -> bool {
        self.state.starts_with(SendState::Ok.as_str())
    }
}

/// Serialize a payload with object keys in lexicographic order at every depth.
pub fn sorted_payload_json(payload: &Payload) -> DomainResult<String> {
    let value = serde_json::to_value(payload)
        .map_err(|e| DomainError::validation(format!("payload not serializable: {e}")))?;
    Ok(sorted_json(&value))
}

/// JSON with object keys sorted at every depth, `", "` / `": "` separators and
/// ASCII-only output.
///
/// Non-ASCII characters become `\uXXXX` escapes (surrogate pairs outside the
/// BMP) and floats use the shortest round-trip form with a `.0` or `e+NN`
/// suffix, so digests stay comparable with audit rows already in the table.
pub fn sorted_json(value: &Value) -> String {
    let mut out = String::new();
    write_sorted(value, &mut out);
    out
}

fn write_sorted(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            // Byte order of UTF-8 keys equals code point order.
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_ascii_string(key, out);
                out.push_str(": ");
                write_sorted(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_sorted(item, out);
            }
            out.push(']');
        }
        Value::String(text) => write_ascii_string(text, out),
        Value::Number(number) => match number.as_f64() {
            Some(float) if number.is_f64() => write_float(float, out),
            _ => out.push_str(&number.to_string()),
        },
        Value::Bool(flag) => out.push_str(if *flag { "true" } else { "false" }),
        Value::Null => out.push_str("null"),
    }
}

fn write_ascii_string(text: &str, out: &mut String) {
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            ' '..='~' => out.push(c),
            _ => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    out.push_str(&format!("\\u{unit:04x}"));
                }
            }
        }
    }
    out.push('"');
}

/// Shortest round-trip digits; scientific notation below `1e-4` and from
/// `1e16` up.
fn write_float(value: f64, out: &mut String) {
    let scientific = format!("{value:e}");
    let (mantissa, exponent) = scientific
        .split_once('e')
        .unwrap_or((scientific.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let mantissa = match mantissa.strip_prefix('-') {
        Some(rest) => {
            out.push('-');
            rest
        }
        None => mantissa,
    };
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();

    if !(-4..16).contains(&exponent) {
        out.push_str(&digits[..1]);
        if digits.len() > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        let sign = if exponent < 0 { '-' } else { '+' };
        out.push_str(&format!("e{sign}{:02}", exponent.abs()));
    } else if exponent < 0 {
        out.push_str("0.");
        for _ in 0..(-exponent - 1) {
            out.push('0');
        }
        out.push_str(&digits);
    } else {
        let point = exponent as usize + 1;
        if digits.len() <= point {
            out.push_str(&digits);
            for _ in digits.len()..point {
                out.push('0');
            }
            out.push_str(".0");
        } else {
            out.push_str(&digits[..point]);
            out.push('.');
            out.push_str(&digits[point..]);
        }
    }
}

/// Lowercase hex MD5 digest.
pub fn md5_hex(text: &str) -> String {
    hex::encode(Md5::digest(text.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn run() -> RunId {
        RunId::parse("202302251200").unwrap()
    }

    fn payload() -> Payload {
        let mut payload = Payload::new("c1", "purchase");
        payload.timestamp_micros = Some(1_677_283_200_000_000);
        payload.events[0].params.insert("value".into(), json!(9.99));
        payload
    }

    #[test]
    fn state_labels_match_status() {
        let ok = LogRecord::from_outcome(&DispatchOutcome::new(payload(), 204, ""), &run()).unwrap();
        let fail =
            LogRecord::from_outcome(&DispatchOutcome::new(payload(), 500, "boom"), &run()).unwrap();

        assert_eq!(ok.state, "SEND_OK 204");
        assert!(ok.is_success());
        assert_eq!(fail.state, "SEND_FAIL 500");
        assert!(!fail.is_success());
        assert_eq!(fail.response, "boom");
    }

    #[test]
    fn non_204_success_codes_are_failures() {
        let record =
            LogRecord::from_outcome(&DispatchOutcome::new(payload(), 200, "{}"), &run()).unwrap();
        assert_eq!(record.state, "SEND_FAIL 200");
    }

    #[test]
    fn record_fields_come_from_payload_and_run() {
        let record =
            LogRecord::from_outcome(&DispatchOutcome::new(payload(), 204, ""), &run()).unwrap();

        assert_eq!(record.run_id, "202302251200");
        assert_eq!(
            record.run_ts,
            Utc.with_ymd_and_hms(2023, 2, 25, 12, 0, 0).unwrap()
        );
        assert_eq!(record.client_id, "c1");
        assert_eq!(record.event_name, "purchase");
    }

    #[test]
    fn payload_json_is_sorted_and_hashed() {
        let record =
            LogRecord::from_outcome(&DispatchOutcome::new(payload(), 204, ""), &run()).unwrap();

        assert_eq!(
            record.payload_json,
            r#"{"client_id": "c1", "events": [{"name": "purchase", "params": {"value": 9.99}}], "nonPersonalizedAds": false, "timestamp_micros": 1677283200000000}"#
        );
        assert_eq!(record.payload_md5, md5_hex(&record.payload_json));
        assert_eq!(record.payload_md5.len(), 32);
    }

    #[test]
    fn same_payload_same_digest_fresh_id() {
        let outcome = DispatchOutcome::new(payload(), 204, "");
        let a = LogRecord::from_outcome(&outcome, &run()).unwrap();
        let b = LogRecord::from_outcome(&outcome, &run()).unwrap();

        assert_eq!(a.payload_md5, b.payload_md5);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn md5_matches_known_digest() {
        assert_eq!(md5_hex(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex("abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn nested_keys_are_sorted() {
        let value = json!({"b": {"z": 1, "a": [ {"y": 2, "x": 1} ]}, "a": null});
        assert_eq!(
            sorted_json(&value),
            r#"{"a": null, "b": {"a": [{"x": 1, "y": 2}], "z": 1}}"#
        );
    }

    #[test]
    fn digest_is_stable_across_writers_for_non_ascii_payloads() {
        let mut payload = payload();
        payload.events[0].params.insert("city".into(), json!("Zürich"));
        let mut properties = std::collections::BTreeMap::new();
        properties.insert("tier".to_string(), crate::payload::UserProperty::new(json!("gold")));
        payload.user_properties = Some(properties);

        let record =
            LogRecord::from_outcome(&DispatchOutcome::new(payload, 204, ""), &run()).unwrap();

        assert_eq!(
            record.payload_json,
            r#"{"client_id": "c1", "events": [{"name": "purchase", "params": {"city": "Z\u00fcrich", "value": 9.99}}], "nonPersonalizedAds": false, "timestamp_micros": 1677283200000000, "user_properties": {"tier": {"value": "gold"}}}"#
        );
        assert_eq!(record.payload_md5, "b1c1e0e0a05247851fff1daa1de492f3");
    }

    #[test]
    fn floats_and_escapes_use_the_audit_layout() {
        let value = json!({
            "s": "q\"\\\n\t\u{1}\u{7f}😀é",
            "a": [1, 2.0, 1e16, 1.5e-5, 0.0001, 123456789012345678.0, -0.5, null, true],
        });

        let text = sorted_json(&value);
        assert_eq!(
            text,
            r#"{"a": [1, 2.0, 1e+16, 1.5e-05, 0.0001, 1.2345678901234568e+17, -0.5, null, true], "s": "q\"\\\n\t\u0001\u007f\ud83d\ude00\u00e9"}"#
        );
        assert_eq!(md5_hex(&text), "fb989356e586c551bd4bb30e0f5dc0b5");
    }

    #[test]
    fn zero_and_integral_floats_keep_a_fraction() {
        assert_eq!(sorted_json(&json!([0.0, -0.0, 10.0, 1e15])), "[0.0, -0.0, 10.0, 1000000000000000.0]");
    }

    #[test]
    fn serializes_with_audit_column_names() {
        let record =
            LogRecord::from_outcome(&DispatchOutcome::new(payload(), 204, ""), &run()).unwrap();
        let value = serde_json::to_value(&record).unwrap();

        for column in [
            "prediction_run_ts",
            "prediction_run_id",
            "id",
            "client_id",
            "event_name",
            "payload_md5",
            "payload",
            "response",
            "state",
        ] {
            assert!(value.get(column).is_some(), "missing column {column}");
        }
    }
}
