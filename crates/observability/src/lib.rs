//! Tracing and logging (shared setup).

/// Initialize process-wide tracing with the default filter (`info`) and JSON
/// output.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, output format).
pub mod tracing;
