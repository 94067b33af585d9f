/*!
 * Bus and protocol drivers.
 *
 * Each bus exposes a `Result`-returning open function; opening can fail on
 * hosts without the physical bus, and the element registry decides whether
 * to fall back to the in-process emulation driver. The emulation drivers are
 * deterministic so tests can assert against their recorded traffic.
 */

pub mod gpio;
pub mod i2c;
pub mod onewire;
pub mod pwm;
pub mod spi;

pub use gpio::{Edge, InputLine, OutputLine, SimLine};
pub use i2c::{open_i2c, I2cBus, SimI2c};
pub use onewire::{open_onewire, OneWireBus, SimOneWire};
pub use pwm::{hardware_channel, open_pwm, PwmChannel, SimPwm};
pub use spi::{open_spi, SimSpi, SpiBus};
