/*!
 * WS2801 RGB LED strip on the SPI bus.
 *
 * The strip holds a `3*N` byte frame buffer. `update` applies the gamma
 * table and pushes the frame over SPI; the chip needs the clock idle for a
 * minimum time between frames, so writes arriving too early are dropped and
 * logged rather than queued. Channel order, inversion and strip reversal are
 * applied when the buffer is filled, not when it is written.
 */
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use berryrig_core::event::{ChangeBus, ChangeEvent};
use berryrig_core::types::{Id, Value};

use crate::bus::SpiBus;
use crate::device::{
    unknown_command, ArgSpec, CommandSpec, Device, DeviceError, Direction, ElementKind, Protocol,
    Result,
};

/// Minimum idle time between two frames. The data sheet says 500 µs is
/// enough for the frame reset; real strips need at least this much.
const ROW_RESET: Duration = Duration::from_micros(1000);

/// Build the gamma correction table: non-linear so that equal value steps
/// read as equal perceived brightness steps. `table[0]` stays 0.
fn gamma_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        *entry = match i {
            0 => 0,
            1..=31 => 1,
            32..=63 => 2 + ((i - 32) / 16) as u8,
            64..=95 => 4 + ((i - 64) / 8) as u8,
            96..=127 => 8 + ((i - 96) / 4) as u8,
            128..=159 => 16 + ((i - 128) / 2) as u8,
            160..=191 => 32 + (i - 160) as u8,
            192..=223 => 64 + ((i - 192) * 2) as u8,
            _ => 128 + ((i - 224) * 4) as u8,
        };
    }
    table
}

#[derive(Debug)]
struct StripState {
    values: BytesMut,
    inverted: bool,
    reversed: bool,
    // buffer offset per color: [red, green, blue]
    order: [usize; 3],
    last_write: Option<Instant>,
}

#[derive(Debug)]
struct StripInner {
    id: Id,
    name: String,
    num_leds: usize,
    spi: Arc<dyn SpiBus>,
    gpios: Vec<u8>,
    gamma: [u8; 256],
    state: Mutex<StripState>,
    bus: ChangeBus,
    released: AtomicBool,
}

/// A WS2801 RGB LED strip
#[derive(Debug)]
pub struct Ws2801 {
    inner: Arc<StripInner>,
}

impl Ws2801 {
    /// Create a strip over an already-opened SPI bus.
    ///
    /// `spi_name` selects the chip-enable line and with it the occupied
    /// GPIOs ("0.x" is SPI0 on GPIO 10/11, anything else SPI1 on 20/21).
    pub fn new(
        id: Id,
        name: String,
        num_leds: usize,
        spi_name: &str,
        spi: Arc<dyn SpiBus>,
        bus: ChangeBus,
    ) -> Result<Self> {
        if num_leds == 0 {
            return Err(DeviceError::InvalidArgument(
                "numLeds".to_string(),
                "need at least one LED".to_string(),
            ));
        }
        info!(
            "WS2801       creating LED strip with {} LEDs on spidev{}",
            num_leds, spi_name
        );
        let gpios = if spi_name.trim_start_matches(|c: char| !c.is_ascii_digit()).starts_with('0') {
            vec![10, 11]
        } else {
            vec![20, 21]
        };
        Ok(Self {
            inner: Arc::new(StripInner {
                id,
                name,
                num_leds,
                spi,
                gpios,
                gamma: gamma_table(),
                state: Mutex::new(StripState {
                    values: BytesMut::zeroed(num_leds * 3),
                    inverted: false,
                    reversed: false,
                    order: [0, 1, 2],
                    last_write: None,
                }),
                bus,
                released: AtomicBool::new(false),
            }),
        })
    }

    /// Number of LEDs on the strip
    pub fn num_leds(&self) -> usize {
        self.inner.num_leds
    }

    /// The gamma table (for tests)
    pub fn gamma(&self) -> &[u8; 256] {
        &self.inner.gamma
    }

    /// Current raw frame buffer contents
    pub fn values(&self) -> Vec<u8> {
        self.inner.state.lock().unwrap().values.to_vec()
    }

    /// Map an RGB triple through channel order and inversion
    fn rgb_array(state: &StripState, r: u8, g: u8, b: u8) -> [u8; 3] {
        let mut colors = [0u8; 3];
        colors[state.order[0]] = r;
        colors[state.order[1]] = g;
        colors[state.order[2]] = b;
        if state.inverted {
            for c in colors.iter_mut() {
                *c = 255 - *c;
            }
        }
        colors
    }

    /// Fill the whole strip with one color
    pub fn fill(&self, r: u8, g: u8, b: u8) {
        let mut state = self.inner.state.lock().unwrap();
        let colors = Self::rgb_array(&state, r, g, b);
        for led in 0..self.inner.num_leds {
            let base = led * 3;
            state.values[base] = colors[0];
            state.values[base + 1] = colors[1];
            state.values[base + 2] = colors[2];
        }
    }

    /// Switch all LEDs off
    pub fn clear(&self) {
        self.fill(0, 0, 0);
    }

    /// Set the color of one LED; reversal decides which physical LED
    /// `index` addresses
    pub fn set_color(&self, index: usize, r: u8, g: u8, b: u8) -> Result<()> {
        let mut state = self.inner.state.lock().unwrap();
        if index >= self.inner.num_leds {
            return Err(DeviceError::OutOfRange(format!(
                "led index {} (strip has {})",
                index, self.inner.num_leds
            )));
        }
        let physical = if state.reversed {
            self.inner.num_leds - 1 - index
        } else {
            index
        };
        let colors = Self::rgb_array(&state, r, g, b);
        let base = physical * 3;
        state.values[base] = colors[0];
        state.values[base + 1] = colors[1];
        state.values[base + 2] = colors[2];
        Ok(())
    }

    /// Set the color of one LED from a `#rgb` or `#rrggbb` string
    pub fn set_rgb(&self, index: usize, hex: &str) -> Result<()> {
        let (r, g, b) = parse_hex_color(hex).ok_or_else(|| {
            DeviceError::InvalidArgument("setRgb".to_string(), format!("bad color '{}'", hex))
        })?;
        self.set_color(index, r, g, b)
    }

    /// Toggle value inversion (applied at fill time)
    pub fn invert(&self) {
        let mut state = self.inner.state.lock().unwrap();
        state.inverted = !state.inverted;
    }

    /// Toggle strip direction (applied at fill time); reversed means LED #0
    /// is the LED closest to the physical connection
    pub fn reverse(&self) {
        let mut state = self.inner.state.lock().unwrap();
        state.reversed = !state.reversed;
    }

    /// Set a new RGB channel order
    pub fn set_color_order(&self, red: usize, green: usize, blue: usize) -> Result<()> {
        if red > 2 || green > 2 || blue > 2 {
            return Err(DeviceError::InvalidArgument(
                "setColorOrder".to_string(),
                "indices must be 0..=2".to_string(),
            ));
        }
        let mut state = self.inner.state.lock().unwrap();
        state.order = [red, green, blue];
        Ok(())
    }

    /// Send the gamma-corrected frame buffer to the strip.
    ///
    /// Returns `false` when the frame was dropped because the previous
    /// write was less than the frame-reset time ago. The frame is not
    /// queued; the next update carries the current buffer anyway.
    pub fn update(&self) -> Result<bool> {
        if self.inner.released.load(Ordering::SeqCst) {
            return Err(DeviceError::NotConnected);
        }
        let mut state = self.inner.state.lock().unwrap();

        let now = Instant::now();
        if let Some(last) = state.last_write {
            if now < last + ROW_RESET {
                warn!("WS2801       {} writing too fast, data dropped", self.inner.id);
                return Ok(false);
            }
        }

        let frame: Vec<u8> = state
            .values
            .iter()
            .map(|&v| self.inner.gamma[v as usize])
            .collect();
        self.inner.spi.write(&frame)?;
        state.last_write = Some(now);
        debug!("WS2801       {} wrote {} bytes", self.inner.id, frame.len());

        let _ = self.inner.bus.publish(ChangeEvent::new(
            self.inner.id.clone(),
            "WS2801",
            Value::Binary(state.values.to_vec()),
        ));
        Ok(true)
    }
}

/// Parse `#rgb` or `#rrggbb`
fn parse_hex_color(color: &str) -> Option<(u8, u8, u8)> {
    let hex = color.strip_prefix('#')?;
    match hex.len() {
        3 => {
            let digit = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).ok();
            let (r, g, b) = (digit(0)?, digit(1)?, digit(2)?);
            Some((r * 17, g * 17, b * 17))
        }
        6 => {
            let pair = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
            Some((pair(0)?, pair(2)?, pair(4)?))
        }
        _ => None,
    }
}

fn u8_field(obj: &std::collections::HashMap<String, Value>, key: &str) -> u8 {
    obj.get(key)
        .and_then(|v| v.as_integer())
        .unwrap_or(0)
        .clamp(0, 255) as u8
}

#[async_trait]
impl Device for Ws2801 {
    fn id(&self) -> &Id {
        &self.inner.id
    }

    fn name(&self) -> &str {
        &self.inner.name
    }

    fn kind(&self) -> ElementKind {
        ElementKind::Ws2801
    }

    fn direction(&self) -> Direction {
        Direction::Out
    }

    fn protocol(&self) -> Protocol {
        Protocol::Spi
    }

    fn gpios(&self) -> Vec<u8> {
        self.inner.gpios.clone()
    }

    fn value(&self) -> Value {
        Value::Binary(self.values())
    }

    async fn invoke(&self, cmd: &str, arg: Option<&Value>) -> Result<Value> {
        if self.inner.released.load(Ordering::SeqCst) {
            return Err(DeviceError::NotConnected);
        }
        match cmd {
            "update" => Ok(Value::Bool(self.update()?)),
            "fill" => {
                let obj = arg.and_then(|v| v.as_object()).ok_or_else(|| {
                    DeviceError::InvalidArgument("fill".to_string(), "expected {r,g,b}".to_string())
                })?;
                self.fill(u8_field(obj, "r"), u8_field(obj, "g"), u8_field(obj, "b"));
                Ok(Value::Null)
            }
            "setColor" => {
                let obj = arg.and_then(|v| v.as_object()).ok_or_else(|| {
                    DeviceError::InvalidArgument(
                        "setColor".to_string(),
                        "expected {led, r, g, b}".to_string(),
                    )
                })?;
                let led = obj.get("led").and_then(|v| v.as_integer()).unwrap_or(0) as usize;
                self.set_color(led, u8_field(obj, "r"), u8_field(obj, "g"), u8_field(obj, "b"))?;
                Ok(Value::Null)
            }
            "setRgb" => {
                let obj = arg.and_then(|v| v.as_object()).ok_or_else(|| {
                    DeviceError::InvalidArgument(
                        "setRgb".to_string(),
                        "expected {led, color}".to_string(),
                    )
                })?;
                let led = obj.get("led").and_then(|v| v.as_integer()).unwrap_or(0) as usize;
                let color = obj.get("color").and_then(|v| v.as_str()).ok_or_else(|| {
                    DeviceError::InvalidArgument("setRgb".to_string(), "missing color".to_string())
                })?;
                self.set_rgb(led, color)?;
                Ok(Value::Null)
            }
            "clear" => {
                self.clear();
                Ok(Value::Null)
            }
            "invert" => {
                self.invert();
                Ok(Value::Null)
            }
            "reverse" => {
                self.reverse();
                Ok(Value::Null)
            }
            "getValue" => Ok(self.value()),
            _ => Err(unknown_command(ElementKind::Ws2801, cmd)),
        }
    }

    async fn release(&self) {
        if self.inner.released.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("WS2801       {} disconnected", self.inner.name);
    }

    fn api(&self) -> &'static [CommandSpec] {
        &[
            CommandSpec {
                cmd: "fill",
                args: &[
                    ArgSpec { name: "r", meaning: "red 0..255" },
                    ArgSpec { name: "g", meaning: "green 0..255" },
                    ArgSpec { name: "b", meaning: "blue 0..255" },
                ],
                effect: "fills the whole strip with one color",
            },
            CommandSpec {
                cmd: "setColor",
                args: &[
                    ArgSpec { name: "led", meaning: "LED index" },
                    ArgSpec { name: "r", meaning: "red 0..255" },
                    ArgSpec { name: "g", meaning: "green 0..255" },
                    ArgSpec { name: "b", meaning: "blue 0..255" },
                ],
                effect: "sets the color of one LED",
            },
            CommandSpec {
                cmd: "setRgb",
                args: &[
                    ArgSpec { name: "led", meaning: "LED index" },
                    ArgSpec { name: "color", meaning: "#rgb or #rrggbb" },
                ],
                effect: "sets the color of one LED from a hex string",
            },
            CommandSpec { cmd: "update", args: &[], effect: "sends the frame buffer to the strip" },
            CommandSpec { cmd: "clear", args: &[], effect: "switches all LEDs off" },
            CommandSpec { cmd: "invert", args: &[], effect: "toggles value inversion" },
            CommandSpec { cmd: "reverse", args: &[], effect: "toggles the strip direction" },
            CommandSpec { cmd: "getValue", args: &[], effect: "returns the raw frame buffer" },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SimSpi;

    fn strip(n: usize) -> (Ws2801, Arc<SimSpi>) {
        let spi = Arc::new(SimSpi::new("/dev/spidev0.0", 2_000_000));
        let dev = Ws2801::new("strip1".into(), "shelf".into(), n, "0.0", spi.clone(), ChangeBus::new())
            .unwrap();
        (dev, spi)
    }

    #[test]
    fn test_gamma_table_shape() {
        let table = gamma_table();
        assert_eq!(table[0], 0);
        assert_eq!(table[255], 252);
        for i in 1..256 {
            assert!(table[i] >= table[i - 1], "not monotonic at {}", i);
        }
        assert_eq!(table[1], 1);
        assert_eq!(table[32], 2);
        assert_eq!(table[128], 16);
        assert_eq!(table[224], 128);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_applies_gamma() {
        let (dev, spi) = strip(2);
        dev.fill(255, 128, 0);
        assert!(dev.update().unwrap());
        let frame = spi.last_frame().unwrap();
        assert_eq!(frame, vec![252, 16, 0, 252, 16, 0]);
        // the raw buffer keeps the uncorrected values
        assert_eq!(dev.values(), vec![255, 128, 0, 255, 128, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_second_write_is_dropped() {
        let (dev, spi) = strip(1);
        dev.fill(10, 10, 10);
        assert!(dev.update().unwrap());
        dev.fill(20, 20, 20);
        // still inside the frame-reset window
        assert!(!dev.update().unwrap());
        assert_eq!(spi.frames().len(), 1);

        tokio::time::sleep(Duration::from_micros(1500)).await;
        assert!(dev.update().unwrap());
        assert_eq!(spi.frames().len(), 2);
    }

    #[tokio::test]
    async fn test_reverse_maps_physical_index() {
        let (dev, _) = strip(3);
        dev.set_color(0, 9, 0, 0).unwrap();
        assert_eq!(&dev.values()[0..3], &[9, 0, 0]);
        dev.clear();
        dev.reverse();
        dev.set_color(0, 9, 0, 0).unwrap();
        assert_eq!(&dev.values()[6..9], &[9, 0, 0]);
    }

    #[tokio::test]
    async fn test_invert_and_order_applied_at_fill_time() {
        let (dev, _) = strip(1);
        dev.set_color_order(1, 0, 2).unwrap(); // GRB strip
        dev.fill(1, 2, 3);
        assert_eq!(dev.values(), vec![2, 1, 3]);
        dev.invert();
        dev.fill(0, 0, 0);
        assert_eq!(dev.values(), vec![255, 255, 255]);
    }

    #[tokio::test]
    async fn test_hex_colors() {
        let (dev, _) = strip(1);
        dev.set_rgb(0, "#ff8000").unwrap();
        assert_eq!(dev.values(), vec![255, 128, 0]);
        dev.set_rgb(0, "#f00").unwrap();
        assert_eq!(dev.values(), vec![255, 0, 0]);
        assert!(dev.set_rgb(0, "red").is_err());
        assert!(dev.set_rgb(5, "#fff").is_err());
    }

    #[tokio::test]
    async fn test_out_of_range_index() {
        let (dev, _) = strip(2);
        assert!(matches!(
            dev.set_color(2, 1, 1, 1),
            Err(DeviceError::OutOfRange(_))
        ));
    }
}
