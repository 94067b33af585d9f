/*!
 * SPI bus access.
 *
 * The emulation driver records every frame written so the LED-strip tests
 * can inspect the exact bytes that would have gone out on the wire.
 */
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use crate::device::{DeviceError, Result};

/// Frame-level SPI bus operations
pub trait SpiBus: Send + Sync + Debug {
    /// Write one frame
    fn write(&self, frame: &[u8]) -> Result<()>;

    /// The configured clock speed in Hz
    fn clock_speed(&self) -> u32;
}

/// In-process SPI emulation
#[derive(Debug)]
pub struct SimSpi {
    device_name: String,
    speed: u32,
    frames: Mutex<Vec<Vec<u8>>>,
}

impl SimSpi {
    /// Create a new emulated bus
    pub fn new(device_name: &str, speed: u32) -> Self {
        debug!("SpiSim       using {} (emulation)", device_name);
        Self {
            device_name: device_name.to_string(),
            speed,
            frames: Mutex::new(Vec::new()),
        }
    }

    /// The emulated device name
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// All frames written so far (for tests)
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().unwrap().clone()
    }

    /// The most recent frame, if any (for tests)
    pub fn last_frame(&self) -> Option<Vec<u8>> {
        self.frames.lock().unwrap().last().cloned()
    }
}

impl SpiBus for SimSpi {
    fn write(&self, frame: &[u8]) -> Result<()> {
        trace!("SpiSim       {} write {} bytes", self.device_name, frame.len());
        self.frames.lock().unwrap().push(frame.to_vec());
        Ok(())
    }

    fn clock_speed(&self) -> u32 {
        self.speed
    }
}

/// Hardware SPI bus via rppal
#[cfg(feature = "gpio")]
#[derive(Debug)]
pub struct HwSpi {
    spi: Mutex<rppal::spi::Spi>,
    speed: u32,
}

#[cfg(feature = "gpio")]
impl SpiBus for HwSpi {
    fn write(&self, frame: &[u8]) -> Result<()> {
        self.spi
            .lock()
            .unwrap()
            .write(frame)
            .map(|_| ())
            .map_err(|e| DeviceError::Bus(format!("spi write: {}", e)))
    }

    fn clock_speed(&self) -> u32 {
        self.speed
    }
}

/// Open a hardware SPI bus at `bus.slave_select` (e.g. bus 0, CE0).
///
/// Fails on hosts without the bus; the registry falls back to [`SimSpi`].
/// Keep the clock below ~2 MHz for WS2801 strips; faster clocks corrupt the
/// shifted data.
pub fn open_spi(bus: u8, slave_select: u8, speed: u32) -> Result<Arc<dyn SpiBus>> {
    #[cfg(feature = "gpio")]
    {
        use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
        let bus = match bus {
            0 => Bus::Spi0,
            1 => Bus::Spi1,
            n => return Err(DeviceError::Bus(format!("spi bus {} not available", n))),
        };
        let ss = match slave_select {
            0 => SlaveSelect::Ss0,
            1 => SlaveSelect::Ss1,
            n => return Err(DeviceError::Bus(format!("spi slave select {} invalid", n))),
        };
        let spi = Spi::new(bus, ss, speed, Mode::Mode0)
            .map_err(|e| DeviceError::Bus(format!("spi open: {}", e)))?;
        debug!("Spi          opened hardware bus at {} Hz", speed);
        return Ok(Arc::new(HwSpi {
            spi: Mutex::new(spi),
            speed,
        }));
    }
    #[cfg(not(feature = "gpio"))]
    {
        let _ = (bus, slave_select, speed);
        Err(DeviceError::Bus("SPI support not compiled in".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_records_frames() {
        let bus = SimSpi::new("/dev/spidev0.0", 2_000_000);
        assert!(bus.last_frame().is_none());
        bus.write(&[1, 2, 3]).unwrap();
        bus.write(&[4, 5, 6]).unwrap();
        assert_eq!(bus.frames().len(), 2);
        assert_eq!(bus.last_frame().unwrap(), vec![4, 5, 6]);
        assert_eq!(bus.clock_speed(), 2_000_000);
    }
}
