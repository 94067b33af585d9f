/*!
 * Pulse-width modulation channels.
 *
 * Hardware PWM exists on two channels only (GPIO 18/12 and GPIO 13/19 on a
 * 40-pin header); every other line gets a software channel. The emulation
 * channel just stores the duty cycle.
 */
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::device::{DeviceError, Result};

/// A PWM output channel
pub trait PwmChannel: Send + Sync + Debug {
    /// Write a duty cycle in [0, 1]
    fn write(&self, duty: f64) -> Result<()>;

    /// The last written duty cycle
    fn duty(&self) -> f64;
}

/// Map a BCM gpio number to its hardware PWM channel, if it has one.
///
/// On a 40-pin header only GPIO 18 or 12 (channel 0) and GPIO 13 or 19
/// (channel 1) are wired to the PWM peripheral.
pub fn hardware_channel(gpio: u8) -> Option<u8> {
    match gpio {
        18 | 12 => Some(0),
        13 | 19 => Some(1),
        _ => None,
    }
}

/// In-process PWM emulation
#[derive(Debug)]
pub struct SimPwm {
    gpio: u8,
    frequency: f64,
    duty: Mutex<f64>,
    writes: Mutex<Vec<f64>>,
}

impl SimPwm {
    /// Create a new emulated channel
    pub fn new(gpio: u8, frequency: f64) -> Self {
        debug!("PwmSim       using gpio {} at {} Hz (emulation)", gpio, frequency);
        Self {
            gpio,
            frequency,
            duty: Mutex::new(0.0),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// The BCM gpio number
    pub fn gpio(&self) -> u8 {
        self.gpio
    }

    /// The configured frequency
    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    /// All duty cycles written so far (for tests)
    pub fn writes(&self) -> Vec<f64> {
        self.writes.lock().unwrap().clone()
    }
}

impl PwmChannel for SimPwm {
    fn write(&self, duty: f64) -> Result<()> {
        *self.duty.lock().unwrap() = duty;
        self.writes.lock().unwrap().push(duty);
        Ok(())
    }

    fn duty(&self) -> f64 {
        *self.duty.lock().unwrap()
    }
}

/// Hardware PWM channel via rppal
#[cfg(feature = "gpio")]
#[derive(Debug)]
pub struct HwPwm {
    pwm: Mutex<rppal::pwm::Pwm>,
    duty: Mutex<f64>,
}

#[cfg(feature = "gpio")]
impl PwmChannel for HwPwm {
    fn write(&self, duty: f64) -> Result<()> {
        self.pwm
            .lock()
            .unwrap()
            .set_duty_cycle(duty)
            .map_err(|e| DeviceError::Bus(format!("pwm write: {}", e)))?;
        *self.duty.lock().unwrap() = duty;
        Ok(())
    }

    fn duty(&self) -> f64 {
        *self.duty.lock().unwrap()
    }
}

/// Open a hardware PWM channel for the given gpio.
///
/// Fails for gpios without hardware PWM and on hosts without the peripheral;
/// the registry falls back to [`SimPwm`] (standing in for a software
/// bit-banged channel off the Pi).
pub fn open_pwm(gpio: u8, frequency: f64) -> Result<Arc<dyn PwmChannel>> {
    let channel = hardware_channel(gpio)
        .ok_or_else(|| DeviceError::Bus(format!("gpio {} has no hardware PWM", gpio)))?;
    #[cfg(feature = "gpio")]
    {
        use rppal::pwm::{Channel, Polarity, Pwm};
        let channel = if channel == 0 {
            Channel::Pwm0
        } else {
            Channel::Pwm1
        };
        let pwm = Pwm::with_frequency(channel, frequency, 0.0, Polarity::Normal, true)
            .map_err(|e| DeviceError::Bus(format!("pwm open: {}", e)))?;
        debug!("Pwm          opened hardware channel {:?}", channel);
        return Ok(Arc::new(HwPwm {
            pwm: Mutex::new(pwm),
            duty: Mutex::new(0.0),
        }));
    }
    #[cfg(not(feature = "gpio"))]
    {
        let _ = (channel, frequency);
        Err(DeviceError::Bus("PWM support not compiled in".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hardware_channel_pins() {
        assert_eq!(hardware_channel(18), Some(0));
        assert_eq!(hardware_channel(12), Some(0));
        assert_eq!(hardware_channel(13), Some(1));
        assert_eq!(hardware_channel(19), Some(1));
        assert_eq!(hardware_channel(17), None);
    }

    #[test]
    fn test_sim_pwm_stores_duty() {
        let pwm = SimPwm::new(18, 50.0);
        assert_eq!(pwm.duty(), 0.0);
        pwm.write(0.75).unwrap();
        assert_eq!(pwm.duty(), 0.75);
        assert_eq!(pwm.writes(), vec![0.75]);
    }
}
