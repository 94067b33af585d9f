/*!
 * Application collaborator interface.
 *
 * Actions targeting the reserved element id `"app"` call the same-named
 * method on a registered [`AppHandler`]. The handler also receives the
 * hardware lifecycle hooks.
 */
use std::fmt::Debug;

use async_trait::async_trait;

use berryrig_core::types::{Id, Value};

use crate::action::Action;
use crate::error::Result;

/// The application-level collaborator invocable via `elm: "app"` actions
#[async_trait]
pub trait AppHandler: Send + Sync + Debug {
    /// Called after the hardware has been built
    async fn on_start(&self) -> Result<()> {
        Ok(())
    }

    /// Called before the hardware is released
    async fn on_stop(&self) -> Result<()> {
        Ok(())
    }

    /// Invoke a named method. `source` is the element that triggered the
    /// action, `value` the triggering value, `action` the full descriptor.
    async fn call(&self, method: &str, source: &Id, value: &Value, action: &Action)
        -> Result<Value>;
}
