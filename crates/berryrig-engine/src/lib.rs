/*!
 * berryrig Engine
 *
 * This crate provides the element registry and the action-dispatch engine
 * for the berryrig system: parsing hardware descriptions into live device
 * graphs and routing chained, conditional and timed actions between them.
 */

#![warn(missing_docs)]

// Re-export core types
pub use berryrig_core::prelude;
pub use berryrig_core::types::{Id, Value};

pub mod action;
pub mod app;
pub mod dispatcher;
pub mod error;
pub mod hardware;
pub mod runtime;

// Re-export main types for convenience
pub use action::{Action, ActionArg, ActionSet, Target, APP_TARGET};
pub use app::AppHandler;
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use hardware::{Element, ElementState, Hardware, SetupSnapshot};
pub use runtime::Berry;

/// berryrig engine crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the engine
pub fn init() -> Result<()> {
    tracing::info!("berryrig engine {} initialized", VERSION);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
