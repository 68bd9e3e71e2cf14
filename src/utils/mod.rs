// ============================================================================
// Utilities Module
// Helpers outside the matching path
// ============================================================================

#[cfg(feature = "logging")]
mod logging;

#[cfg(feature = "logging")]
pub use logging::{init_tracing, DEFAULT_FILTER};
