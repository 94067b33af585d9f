/*!
 * Device trait and core device abstractions.
 *
 * Every hardware element that survives the build phase is backed by exactly
 * one object implementing [`Device`]. Commands are dispatched through
 * [`Device::invoke`] against a closed, per-kind command table; a command a
 * device kind does not know is a typed error, never a silent no-op.
 */
use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use berryrig_core::error::Error as CoreError;
use berryrig_core::types::{Id, Value};

/// Error type for device operations
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The command is not part of the device kind's command set
    #[error("Unknown command '{command}' for {kind}")]
    UnknownCommand {
        /// The device kind
        kind: ElementKind,
        /// The rejected command
        command: String,
    },

    /// A command argument is missing or has the wrong shape
    #[error("Invalid argument for {0}: {1}")]
    InvalidArgument(String, String),

    /// The device is busy with a conflicting operation
    #[error("Device busy: {0}")]
    Busy(String),

    /// Bus-level failure (open, read or write)
    #[error("Bus error: {0}")]
    Bus(String),

    /// The device has been released or never connected
    #[error("Device not connected")]
    NotConnected,

    /// A value is outside the device's accepted range
    #[error("Value out of range: {0}")]
    OutOfRange(String),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

/// Result type for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

/// The closed set of element kinds a hardware description may use.
///
/// Anything else is rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementKind {
    /// A selectable action set shown on the front panel
    Action,
    /// Analog-to-digital converter on the I²C bus
    #[serde(rename = "ADS1115")]
    Ads1115,
    /// Debounced push button on a GPIO
    Button,
    /// Virtual character display
    Display,
    /// 1-Wire temperature sensor
    #[serde(rename = "DS1820")]
    Ds1820,
    /// Front panel configuration with init/exit hooks
    FrontPanel,
    /// Static text label
    Label,
    /// Light emitting diode on a GPIO
    #[serde(rename = "LED")]
    Led,
    /// Audio capture endpoint
    Microphone,
    /// Motion sensor on the I²C bus
    #[serde(rename = "MPU6500")]
    Mpu6500,
    /// Pulse-width-modulated actuator
    #[serde(rename = "PWDevice")]
    PwDevice,
    /// Audio playback endpoint
    Speakers,
    /// Periodic monitoring task
    Task,
    /// Virtual text input area
    TextInput,
    /// RGB LED strip on the SPI bus
    #[serde(rename = "WS2801")]
    Ws2801,
}

impl ElementKind {
    /// The wire name used in hardware descriptions and snapshots
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Action => "Action",
            ElementKind::Ads1115 => "ADS1115",
            ElementKind::Button => "Button",
            ElementKind::Display => "Display",
            ElementKind::Ds1820 => "DS1820",
            ElementKind::FrontPanel => "FrontPanel",
            ElementKind::Label => "Label",
            ElementKind::Led => "LED",
            ElementKind::Microphone => "Microphone",
            ElementKind::Mpu6500 => "MPU6500",
            ElementKind::PwDevice => "PWDevice",
            ElementKind::Speakers => "Speakers",
            ElementKind::Task => "Task",
            ElementKind::TextInput => "TextInput",
            ElementKind::Ws2801 => "WS2801",
        }
    }

    /// Parse a wire name into a kind
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Action" => Some(ElementKind::Action),
            "ADS1115" => Some(ElementKind::Ads1115),
            "Button" => Some(ElementKind::Button),
            "Display" => Some(ElementKind::Display),
            "DS1820" => Some(ElementKind::Ds1820),
            "FrontPanel" => Some(ElementKind::FrontPanel),
            "Label" => Some(ElementKind::Label),
            "LED" => Some(ElementKind::Led),
            "Microphone" => Some(ElementKind::Microphone),
            "MPU6500" => Some(ElementKind::Mpu6500),
            "PWDevice" => Some(ElementKind::PwDevice),
            "Speakers" => Some(ElementKind::Speakers),
            "Task" => Some(ElementKind::Task),
            "TextInput" => Some(ElementKind::TextInput),
            "WS2801" => Some(ElementKind::Ws2801),
            _ => None,
        }
    }

    /// Whether elements of this kind are backed by a device after build.
    ///
    /// Actions, labels, front panels and tasks are configuration-only.
    pub fn has_device(&self) -> bool {
        !matches!(
            self,
            ElementKind::Action | ElementKind::FrontPanel | ElementKind::Label | ElementKind::Task
        )
    }

    /// Whether this kind inherently carries readable state (sensors)
    pub fn is_sensor(&self) -> bool {
        matches!(
            self,
            ElementKind::Ads1115 | ElementKind::Ds1820 | ElementKind::Mpu6500
        )
    }
}

impl std::fmt::Display for ElementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Signal direction of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Input device (buttons, sensors)
    In,
    /// Output device (LEDs, actuators)
    Out,
    /// No signal direction (virtual elements)
    None,
}

/// Wire protocol a device speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    /// Plain high/low GPIO switching
    OnOff,
    /// I²C bus
    I2c,
    /// SPI bus
    Spi,
    /// I2S audio bus
    I2s,
    /// Dallas 1-Wire bus
    OneWire,
    /// No wire protocol (virtual elements)
    None,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Protocol::OnOff => "on/off",
            Protocol::I2c => "I²C",
            Protocol::Spi => "SPI",
            Protocol::I2s => "I2S",
            Protocol::OneWire => "1-Wire",
            Protocol::None => "",
        };
        write!(f, "{}", s)
    }
}

/// Description of one command argument, for introspection output
#[derive(Debug, Clone, Serialize)]
pub struct ArgSpec {
    /// Argument name
    pub name: &'static str,
    /// Human-readable meaning
    pub meaning: &'static str,
}

/// Static description of one command a device kind accepts
#[derive(Debug, Clone, Serialize)]
pub struct CommandSpec {
    /// Command name
    pub cmd: &'static str,
    /// Command arguments
    pub args: &'static [ArgSpec],
    /// What the command does
    pub effect: &'static str,
}

/// The core device trait.
///
/// Implementations are cheap to share (`Arc<dyn Device>`); all mutable state
/// lives behind interior locks so commands can arrive from any task.
#[async_trait]
pub trait Device: Send + Sync + Debug {
    /// The element id this device is bound to
    fn id(&self) -> &Id;

    /// The element name (label for UIs)
    fn name(&self) -> &str;

    /// The element kind
    fn kind(&self) -> ElementKind;

    /// Signal direction
    fn direction(&self) -> Direction {
        Direction::None
    }

    /// Wire protocol
    fn protocol(&self) -> Protocol {
        Protocol::None
    }

    /// GPIO lines (BCM numbering) occupied by this device
    fn gpios(&self) -> Vec<u8> {
        Vec::new()
    }

    /// The current cached value
    fn value(&self) -> Value;

    /// Execute a named command against this device's command table.
    ///
    /// Returns the command result value (often the new state). Commands not
    /// in the kind's table yield [`DeviceError::UnknownCommand`].
    async fn invoke(&self, cmd: &str, arg: Option<&Value>) -> Result<Value>;

    /// Release the device and its bus resources. Idempotent; commands after
    /// release fail with [`DeviceError::NotConnected`].
    async fn release(&self);

    /// Static API description of this device kind
    fn api(&self) -> &'static [CommandSpec] {
        &[]
    }
}

/// Shorthand for the unknown-command error
pub fn unknown_command(kind: ElementKind, cmd: &str) -> DeviceError {
    DeviceError::UnknownCommand {
        kind,
        command: cmd.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for kind in [
            ElementKind::Action,
            ElementKind::Ads1115,
            ElementKind::Button,
            ElementKind::Display,
            ElementKind::Ds1820,
            ElementKind::FrontPanel,
            ElementKind::Label,
            ElementKind::Led,
            ElementKind::Microphone,
            ElementKind::Mpu6500,
            ElementKind::PwDevice,
            ElementKind::Speakers,
            ElementKind::Task,
            ElementKind::TextInput,
            ElementKind::Ws2801,
        ] {
            assert_eq!(ElementKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(ElementKind::from_str("Teapot"), None);
    }

    #[test]
    fn test_virtual_kinds_have_no_device() {
        assert!(!ElementKind::Action.has_device());
        assert!(!ElementKind::Label.has_device());
        assert!(!ElementKind::FrontPanel.has_device());
        assert!(!ElementKind::Task.has_device());
        assert!(ElementKind::Led.has_device());
        assert!(ElementKind::Button.has_device());
    }

    #[test]
    fn test_protocol_display() {
        assert_eq!(Protocol::I2c.to_string(), "I²C");
        assert_eq!(Protocol::OnOff.to_string(), "on/off");
        assert_eq!(Protocol::OneWire.to_string(), "1-Wire");
    }
}
