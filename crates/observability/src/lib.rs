//! Process-wide tracing setup shared by the gateway binary and tools.

/// Initialize structured logging.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    tracing::init("info");
}

/// Tracing subscriber configuration.
pub mod tracing;
