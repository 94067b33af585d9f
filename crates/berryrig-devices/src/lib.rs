/*!
 * berryrig Devices
 *
 * This crate provides the device abstraction, the peripheral drivers and
 * the bus protocol layer (with emulation fallbacks) for the berryrig
 * system.
 */

#![warn(missing_docs)]

// Re-export core types
pub use berryrig_core::prelude;

pub mod bus;
pub mod device;
pub mod devices;
pub mod pins;
pub mod registry;

// Re-export device trait and basic types
pub use device::{
    ArgSpec, CommandSpec, Device, DeviceError, Direction, ElementKind, Protocol,
};
pub use registry::{DeviceRegistry, SharedDeviceRegistry};

/// berryrig devices crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the device system
pub fn init() -> Result<(), berryrig_core::error::Error> {
    tracing::info!("berryrig devices {} initialized", VERSION);
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
