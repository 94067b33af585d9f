/*!
 * Dallas 1-Wire bus access.
 *
 * On a Raspberry Pi the kernel exposes 1-Wire sensors under
 * `/sys/bus/w1/devices/<address>/w1_slave`; the emulation driver serves a
 * configurable fixed temperature instead.
 */
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::device::{DeviceError, Result};

/// 1-Wire temperature reads
pub trait OneWireBus: Send + Sync + Debug {
    /// Read the temperature in °C from the sensor at `address`
    fn read_temperature(&self, address: &str) -> Result<f64>;
}

/// In-process 1-Wire emulation
#[derive(Debug)]
pub struct SimOneWire {
    temperature: Mutex<f64>,
}

impl SimOneWire {
    /// Create a new emulated bus with a plausible room temperature
    pub fn new() -> Self {
        Self {
            temperature: Mutex::new(21.5),
        }
    }

    /// Override the served temperature (for tests)
    pub fn set_temperature(&self, celsius: f64) {
        *self.temperature.lock().unwrap() = celsius;
    }
}

impl Default for SimOneWire {
    fn default() -> Self {
        Self::new()
    }
}

impl OneWireBus for SimOneWire {
    fn read_temperature(&self, _address: &str) -> Result<f64> {
        Ok(*self.temperature.lock().unwrap())
    }
}

/// 1-Wire via the kernel's sysfs interface
#[derive(Debug)]
pub struct SysfsOneWire;

impl OneWireBus for SysfsOneWire {
    fn read_temperature(&self, address: &str) -> Result<f64> {
        let path = format!("/sys/bus/w1/devices/{}/w1_slave", address);
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| DeviceError::Bus(format!("1-wire read {}: {}", path, e)))?;
        // second line ends in "t=<millidegrees>"
        let milli = raw
            .rsplit("t=")
            .next()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .ok_or_else(|| DeviceError::Bus(format!("1-wire: malformed reading from {}", path)))?;
        Ok((milli as f64 / 1000.0 * 100.0).round() / 100.0)
    }
}

/// Open the 1-Wire bus, verifying the sensor is visible.
///
/// Fails on hosts without the sysfs interface; the registry falls back to
/// [`SimOneWire`].
pub fn open_onewire(address: &str) -> Result<Arc<dyn OneWireBus>> {
    let path = format!("/sys/bus/w1/devices/{}", address);
    if std::path::Path::new(&path).exists() {
        debug!("OneWire      found sensor at {}", path);
        Ok(Arc::new(SysfsOneWire))
    } else {
        Err(DeviceError::Bus(format!(
            "1-wire sensor {} not present",
            address
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_temperature() {
        let bus = SimOneWire::new();
        assert_eq!(bus.read_temperature("28-0000075268f1").unwrap(), 21.5);
        bus.set_temperature(35.2);
        assert_eq!(bus.read_temperature("28-0000075268f1").unwrap(), 35.2);
    }
}
