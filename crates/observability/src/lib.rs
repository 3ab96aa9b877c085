//! Tracing/logging setup shared by every fleetstream process.

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use crate::tracing::{LogConfig, LogFormat};

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init(config: &LogConfig) {
    crate::tracing::init(config);
}
