/*!
 * Device implementations, one module per element kind.
 */

pub mod ads1115;
pub mod audio;
pub mod button;
pub mod display;
pub mod ds1820;
pub mod led;
pub mod mpu6500;
pub mod pwdevice;
pub mod text_input;
pub mod ws2801;

pub use ads1115::Ads1115;
pub use audio::{Microphone, Speakers};
pub use button::Button;
pub use display::Display;
pub use ds1820::Ds1820;
pub use led::{BlinkArgs, Led};
pub use mpu6500::Mpu6500;
pub use pwdevice::PwDevice;
pub use text_input::TextInput;
pub use ws2801::Ws2801;
