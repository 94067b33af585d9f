/*!
 * Device registry.
 *
 * Maps element ids to their live device objects. The element registry in the
 * engine crate owns one of these per built hardware instance.
 */
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use berryrig_core::types::Id;

use crate::device::{Device, DeviceError, Direction};

/// Registry of live devices, keyed by element id
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<Id, Arc<dyn Device>>>,
}

impl DeviceRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
        }
    }

    /// Register a device; the id must not be in use
    pub fn register(&self, device: Arc<dyn Device>) -> Result<(), DeviceError> {
        let id = device.id().clone();
        let mut devices = self.devices.write().unwrap();
        if devices.contains_key(&id) {
            return Err(DeviceError::Busy(format!(
                "device with id {} already registered",
                id
            )));
        }
        debug!("registered {} device {}", device.kind(), id);
        devices.insert(id, device);
        Ok(())
    }

    /// Remove a device from the registry
    pub fn unregister(&self, id: &Id) -> Option<Arc<dyn Device>> {
        let removed = self.devices.write().unwrap().remove(id);
        if removed.is_some() {
            debug!("unregistered device {}", id);
        }
        removed
    }

    /// Get a device by id
    pub fn get(&self, id: &Id) -> Option<Arc<dyn Device>> {
        self.devices.read().unwrap().get(id).cloned()
    }

    /// Whether a device with the given id exists
    pub fn contains(&self, id: &Id) -> bool {
        self.devices.read().unwrap().contains_key(id)
    }

    /// All registered ids
    pub fn ids(&self) -> Vec<Id> {
        self.devices.read().unwrap().keys().cloned().collect()
    }

    /// All devices with the given direction
    pub fn by_direction(&self, direction: Direction) -> Vec<Arc<dyn Device>> {
        self.devices
            .read()
            .unwrap()
            .values()
            .filter(|d| d.direction() == direction)
            .cloned()
            .collect()
    }

    /// Number of registered devices
    pub fn len(&self) -> usize {
        self.devices.read().unwrap().len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.devices.read().unwrap().is_empty()
    }

    /// Remove and return all devices (release pass)
    pub fn drain(&self) -> Vec<Arc<dyn Device>> {
        let mut devices = self.devices.write().unwrap();
        devices.drain().map(|(_, d)| d).collect()
    }
}

/// A shared device registry that can be cloned
#[derive(Debug, Clone, Default)]
pub struct SharedDeviceRegistry(Arc<DeviceRegistry>);

impl SharedDeviceRegistry {
    /// Create a new shared device registry
    pub fn new() -> Self {
        Self(Arc::new(DeviceRegistry::new()))
    }

    /// Get a reference to the device registry
    pub fn registry(&self) -> &DeviceRegistry {
        &self.0
    }
}

impl AsRef<DeviceRegistry> for SharedDeviceRegistry {
    fn as_ref(&self) -> &DeviceRegistry {
        self.registry()
    }
}

impl std::ops::Deref for SharedDeviceRegistry {
    type Target = DeviceRegistry;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
