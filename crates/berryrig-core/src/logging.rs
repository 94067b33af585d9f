/*!
 * Logging functionality for berryrig.
 *
 * This module provides tracing setup and utilities for consistent logging
 * across the berryrig crates.
 */
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{Error, Result};

/// Initialize the logging system with default configuration
pub fn init() -> Result<()> {
    init_with_filter("info")
}

/// Initialize the logging system with a specific filter
///
/// # Arguments
///
/// * `filter` - The log filter string (e.g. "info", "debug", "berryrig=trace")
pub fn init_with_filter(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .map_err(|e| Error::runtime(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}

/// A type alias for a tracing span
pub type Span = tracing::Span;

/// Create a new span for a hardware element
///
/// # Arguments
///
/// * `kind` - The element kind (e.g. "LED")
/// * `id` - The element id
pub fn element_span(kind: &str, id: &str) -> Span {
    tracing::info_span!("element", kind = %kind, id = %id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init() {
        // Double initialization must not panic
        let _ = init();
        let _ = init();
    }

    #[test]
    fn test_element_span() {
        // must be constructible with or without an active subscriber
        let span = element_span("LED", "alarm");
        let _guard = span.enter();
    }
}
