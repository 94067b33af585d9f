/*!
 * I²C bus access.
 *
 * The emulation driver answers every word read with a fixed pattern so
 * scaled sensor readings stay stable across runs.
 */
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use crate::device::{DeviceError, Result};

/// Fixed word returned by the emulated bus (byte-swapped by the ADC driver)
const SIM_WORD: u16 = 0x642A;

/// Byte-level I²C bus operations
pub trait I2cBus: Send + Sync + Debug {
    /// Write a buffer to the device at `addr`
    fn write(&self, addr: u16, bytes: &[u8]) -> Result<()>;

    /// Write a single byte (typically a register pointer)
    fn write_byte(&self, addr: u16, byte: u8) -> Result<()>;

    /// Read a 16-bit word from the current register
    fn read_word(&self, addr: u16) -> Result<u16>;
}

/// In-process I²C emulation
#[derive(Debug, Default)]
pub struct SimI2c {
    writes: Mutex<Vec<(u16, Vec<u8>)>>,
}

impl SimI2c {
    /// Create a new emulated bus
    pub fn new() -> Self {
        Self::default()
    }

    /// All writes so far as `(addr, bytes)` pairs (for tests)
    pub fn writes(&self) -> Vec<(u16, Vec<u8>)> {
        self.writes.lock().unwrap().clone()
    }
}

impl I2cBus for SimI2c {
    fn write(&self, addr: u16, bytes: &[u8]) -> Result<()> {
        trace!("I2cSim       write @0x{:02x}: {:?}", addr, bytes);
        self.writes.lock().unwrap().push((addr, bytes.to_vec()));
        Ok(())
    }

    fn write_byte(&self, addr: u16, byte: u8) -> Result<()> {
        self.write(addr, &[byte])
    }

    fn read_word(&self, _addr: u16) -> Result<u16> {
        Ok(SIM_WORD)
    }
}

/// Hardware I²C bus via rppal
#[cfg(feature = "gpio")]
#[derive(Debug)]
pub struct HwI2c {
    bus: Mutex<rppal::i2c::I2c>,
}

#[cfg(feature = "gpio")]
impl I2cBus for HwI2c {
    fn write(&self, addr: u16, bytes: &[u8]) -> Result<()> {
        let mut bus = self.bus.lock().unwrap();
        bus.set_slave_address(addr)
            .and_then(|_| bus.write(bytes).map(|_| ()))
            .map_err(|e| DeviceError::Bus(format!("i2c write: {}", e)))
    }

    fn write_byte(&self, addr: u16, byte: u8) -> Result<()> {
        self.write(addr, &[byte])
    }

    fn read_word(&self, addr: u16) -> Result<u16> {
        let mut bus = self.bus.lock().unwrap();
        let mut buf = [0u8; 2];
        bus.set_slave_address(addr)
            .and_then(|_| bus.read(&mut buf).map(|_| ()))
            .map_err(|e| DeviceError::Bus(format!("i2c read: {}", e)))?;
        Ok(((buf[0] as u16) << 8) | buf[1] as u16)
    }
}

/// Open the hardware I²C bus.
///
/// Fails on hosts without the bus; the registry falls back to [`SimI2c`].
pub fn open_i2c() -> Result<Arc<dyn I2cBus>> {
    #[cfg(feature = "gpio")]
    {
        let bus = rppal::i2c::I2c::new()
            .map_err(|e| DeviceError::Bus(format!("i2c open: {}", e)))?;
        debug!("I2c          opened hardware bus");
        return Ok(Arc::new(HwI2c {
            bus: Mutex::new(bus),
        }));
    }
    #[cfg(not(feature = "gpio"))]
    {
        debug!("I2c          hardware bus unavailable in this build");
        Err(DeviceError::Bus("I²C support not compiled in".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_read_word_is_stable() {
        let bus = SimI2c::new();
        assert_eq!(bus.read_word(0x48).unwrap(), 0x642A);
        assert_eq!(bus.read_word(0x48).unwrap(), 0x642A);
    }

    #[test]
    fn test_sim_records_writes() {
        let bus = SimI2c::new();
        bus.write(0x48, &[1, 0xC3, 0x83]).unwrap();
        bus.write_byte(0x48, 0).unwrap();
        let writes = bus.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].1, vec![1, 0xC3, 0x83]);
        assert_eq!(writes[1].1, vec![0]);
    }
}
