/*!
 * Prelude module for berryrig Core.
 *
 * This module re-exports commonly used types and functions from the core
 * crate to make them easier to import.
 */

// Re-export error types
pub use crate::error::{Error, Result};

// Re-export core types
pub use crate::types::{Id, Value};

// Re-export event types
pub use crate::event::{ChangeBus, ChangeEvent};

// Re-export config types
pub use crate::config::Config;

// Re-export utility functions
pub use crate::utils::{duration_to_millis, millis_to_duration, spawn_and_log, with_timeout};

// Re-export logging macros
pub use tracing::{debug, error, info, trace, warn};

// Re-export core initialization
pub use crate::init;
