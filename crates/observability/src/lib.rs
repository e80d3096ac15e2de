//! Process-wide tracing setup shared by the binaries.

/// Tracing subscriber configuration (format, filter).
pub mod tracing;

pub use self::tracing::LogFormat;

/// Initialize JSON logging filtered by `RUST_LOG` (default `info`).
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    self::tracing::init(LogFormat::Json);
}

/// Same as [`init`] with an explicit output format.
pub fn init_with(format: LogFormat) {
    self::tracing::init(format);
}
