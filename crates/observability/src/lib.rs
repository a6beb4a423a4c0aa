//! Tracing/logging setup shared by stockbook processes.

/// Initialize process-wide tracing with the default `info` filter.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(tracing::DEFAULT_FILTER);
}

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use tracing::LogFormat;
