//! `beacon-core`: activation domain building blocks.
//!
//! This crate contains **pure domain** logic (no I/O): warehouse rows, the
//! collector payload, the row-to-payload transformer, destination credentials
//! and audit records.

pub mod credentials;
pub mod error;
pub mod id;
pub mod log_record;
pub mod outcome;
pub mod payload;
pub mod row;
pub mod transform;

pub use credentials::{CredentialSet, Destination, SECRET_STORE_SENTINEL, StreamSecrets};
pub use error::{DomainError, DomainResult};
pub use id::{RecordId, RunId};
pub use log_record::{LogRecord, SendState};
pub use outcome::DispatchOutcome;
pub use payload::{Event, Payload, UserProperty};
pub use row::RawRow;
pub use transform::{parse_timestamp_micros, transform};
