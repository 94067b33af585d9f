/*!
 * GPIO line access.
 *
 * Real lines go through `rppal` (behind the `gpio` cargo feature); the
 * [`SimLine`] emulation stores the current level and a write timeline so
 * timing-sensitive devices (LED blinking, PWM ramps) can be tested without
 * hardware.
 */
use std::sync::{Arc, Mutex};

use tokio::time::Instant;
use tracing::debug;

use crate::device::{DeviceError, Result};

/// Interrupt edge selection for input lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// Only rising edges are reported
    Rising,
    /// Both edges are reported
    Both,
}

/// Emulated GPIO line.
///
/// Keeps the last written level and the full write history with timestamps
/// (taken from the tokio clock, so paused-time tests see deterministic
/// timings).
#[derive(Debug, Clone)]
pub struct SimLine {
    gpio: u8,
    state: Arc<Mutex<SimLineState>>,
}

#[derive(Debug)]
struct SimLineState {
    level: u8,
    writes: Vec<(Instant, u8)>,
}

impl SimLine {
    /// Create a new emulated line at the given BCM gpio number
    pub fn new(gpio: u8) -> Self {
        debug!("GpioSim      using gpio {} (emulation)", gpio);
        Self {
            gpio,
            state: Arc::new(Mutex::new(SimLineState {
                level: 0,
                writes: Vec::new(),
            })),
        }
    }

    /// The BCM gpio number
    pub fn gpio(&self) -> u8 {
        self.gpio
    }

    /// Read the current level
    pub fn read(&self) -> u8 {
        self.state.lock().unwrap().level
    }

    /// Write a level, recording it in the timeline
    pub fn write(&self, level: u8) {
        let mut state = self.state.lock().unwrap();
        state.level = level;
        state.writes.push((Instant::now(), level));
    }

    /// The recorded write timeline (for tests)
    pub fn writes(&self) -> Vec<(Instant, u8)> {
        self.state.lock().unwrap().writes.clone()
    }

    /// Number of writes so far (for tests)
    pub fn write_count(&self) -> usize {
        self.state.lock().unwrap().writes.len()
    }
}

/// An output GPIO line, hardware-backed or emulated
#[derive(Debug)]
pub enum OutputLine {
    /// Real line on the SoC
    #[cfg(feature = "gpio")]
    Hw(std::sync::Mutex<rppal::gpio::OutputPin>),
    /// In-process emulation
    Sim(SimLine),
}

impl OutputLine {
    /// Open an output line.
    ///
    /// With `emulate` set (or without the `gpio` feature compiled in) this
    /// returns an error for the hardware path so the caller can decide on
    /// the emulation fallback; use [`OutputLine::sim`] for the fallback.
    pub fn open(gpio: u8) -> Result<Self> {
        #[cfg(feature = "gpio")]
        {
            let pin = rppal::gpio::Gpio::new()
                .and_then(|g| g.get(gpio))
                .map_err(|e| DeviceError::Bus(format!("gpio {}: {}", gpio, e)))?
                .into_output();
            return Ok(OutputLine::Hw(std::sync::Mutex::new(pin)));
        }
        #[cfg(not(feature = "gpio"))]
        {
            Err(DeviceError::Bus(format!(
                "gpio {}: GPIO support not compiled in",
                gpio
            )))
        }
    }

    /// Open an emulated output line
    pub fn sim(gpio: u8) -> Self {
        OutputLine::Sim(SimLine::new(gpio))
    }

    /// Write a level (0 or 1)
    pub fn write(&self, level: u8) {
        match self {
            #[cfg(feature = "gpio")]
            OutputLine::Hw(pin) => {
                let mut pin = pin.lock().unwrap();
                if level == 0 {
                    pin.set_low();
                } else {
                    pin.set_high();
                }
            }
            OutputLine::Sim(line) => line.write(level),
        }
    }

    /// Read back the current level
    pub fn read(&self) -> u8 {
        match self {
            #[cfg(feature = "gpio")]
            OutputLine::Hw(pin) => {
                if pin.lock().unwrap().is_set_high() {
                    1
                } else {
                    0
                }
            }
            OutputLine::Sim(line) => line.read(),
        }
    }

    /// The emulation line, if this is one (for tests)
    pub fn as_sim(&self) -> Option<&SimLine> {
        match self {
            OutputLine::Sim(line) => Some(line),
            #[cfg(feature = "gpio")]
            _ => None,
        }
    }
}

/// An input GPIO line, hardware-backed or emulated
#[derive(Debug)]
pub enum InputLine {
    /// Real line on the SoC, configured with an internal pull-up
    #[cfg(feature = "gpio")]
    Hw(rppal::gpio::InputPin),
    /// In-process emulation
    Sim(SimLine),
}

impl InputLine {
    /// Open an input line with an internal pull-up (buttons are active-low)
    pub fn open(gpio: u8) -> Result<Self> {
        #[cfg(feature = "gpio")]
        {
            let pin = rppal::gpio::Gpio::new()
                .and_then(|g| g.get(gpio))
                .map_err(|e| DeviceError::Bus(format!("gpio {}: {}", gpio, e)))?
                .into_input_pullup();
            return Ok(InputLine::Hw(pin));
        }
        #[cfg(not(feature = "gpio"))]
        {
            Err(DeviceError::Bus(format!(
                "gpio {}: GPIO support not compiled in",
                gpio
            )))
        }
    }

    /// Open an emulated input line
    pub fn sim(gpio: u8) -> Self {
        InputLine::Sim(SimLine::new(gpio))
    }

    /// Read the current level
    pub fn read(&self) -> u8 {
        match self {
            #[cfg(feature = "gpio")]
            InputLine::Hw(pin) => {
                if pin.is_high() {
                    1
                } else {
                    0
                }
            }
            InputLine::Sim(line) => line.read(),
        }
    }

    /// Set the emulated level (no-op on hardware lines)
    pub fn set_sim_level(&self, level: u8) {
        if let InputLine::Sim(line) = self {
            line.write(level);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sim_line_records_writes() {
        let line = SimLine::new(17);
        assert_eq!(line.read(), 0);
        line.write(1);
        line.write(0);
        assert_eq!(line.read(), 0);
        assert_eq!(line.write_count(), 2);
        assert_eq!(line.writes()[0].1, 1);
    }

    #[test]
    fn test_open_fails_without_hardware() {
        // Default build has no GPIO backend; the registry is expected to
        // fall back to the emulation line.
        #[cfg(not(feature = "gpio"))]
        assert!(OutputLine::open(17).is_err());
    }

    #[tokio::test]
    async fn test_output_line_sim() {
        let line = OutputLine::sim(22);
        line.write(1);
        assert_eq!(line.read(), 1);
        assert!(line.as_sim().is_some());
    }
}
