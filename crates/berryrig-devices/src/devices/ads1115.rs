/*!
 * ADS1115 analog-to-digital converter on the I²C bus.
 *
 * Channel selection, gain and sample rate are encoded into the config
 * register from fixed lookup tables; a measurement writes the config, waits
 * the rate-dependent settle time, then reads and byte-swaps the 16-bit
 * conversion register and scales it to millivolts (or a caller-supplied
 * full-scale range).
 */
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use berryrig_core::event::{ChangeBus, ChangeEvent};
use berryrig_core::types::{Id, Value};

use crate::bus::I2cBus;
use crate::device::{
    unknown_command, CommandSpec, Device, DeviceError, Direction, ElementKind, Protocol, Result,
};

/// I²C address of the converter
pub const ADDRESS: u16 = 0x48;

/// Mux bits per channel index: 0..=3 single-ended vs GND, 4..=7 differential
const CHANNEL_BITS: [u8; 8] = [
    0b0100_0000, // 0 --> ch 0 vs. GND
    0b0101_0000, // 1 --> ch 1 vs. GND
    0b0110_0000, // 2 --> ch 2 vs. GND
    0b0111_0000, // 3 --> ch 3 vs. GND
    0b0000_0000, // 4 --> ch 0 vs. 1
    0b0001_0000, // 5 --> ch 0 vs. 3
    0b0010_0000, // 6 --> ch 1 vs. 3
    0b0011_0000, // 7 --> ch 2 vs. 3
];

/// Gain bits per gain index
const GAIN_BITS: [u8; 6] = [
    0b0000_0000, // 0 --> +/- 6.144V
    0b0000_0010, // 1 --> +/- 4.096V
    0b0000_0100, // 2 --> +/- 2.048V
    0b0000_0110, // 3 --> +/- 1.024V
    0b0000_1000, // 4 --> +/- 0.512V
    0b0000_1010, // 5 --> +/- 0.256V
];

/// Full-scale range in millivolts per gain index
const GAIN_RANGE_MV: [i64; 6] = [6144, 4096, 2048, 1024, 512, 256];

/// Sample-rate bits per sps index (8..860 samples per second)
const SPS_BITS: [u8; 8] = [
    0b0000_0000, //   8 samples per second
    0b0010_0000, //  16 samples per second
    0b0100_0000, //  32 samples per second
    0b0110_0000, //  64 samples per second
    0b1000_0000, // 128 samples per second
    0b1010_0000, // 250 samples per second
    0b1100_0000, // 475 samples per second
    0b1110_0000, // 860 samples per second
];

/// Settle time in milliseconds per sps index
const SPS_SETTLE_MS: [u64; 8] = [150, 80, 40, 20, 10, 6, 3, 2];

#[derive(Debug)]
struct AdsInner {
    id: Id,
    name: String,
    channel: usize,
    gain: usize,
    sps: usize,
    range_mv: i64,
    i2c: Arc<dyn I2cBus>,
    value: Mutex<i64>,
    bus: ChangeBus,
    released: AtomicBool,
}

/// An ADS1115 bound to one input channel
#[derive(Debug)]
pub struct Ads1115 {
    inner: Arc<AdsInner>,
}

impl Ads1115 {
    /// Create a converter over an already-opened I²C bus.
    ///
    /// `scale` overrides the gain-derived full-scale range when non-zero,
    /// so readings come out in a caller-chosen physical unit.
    pub fn new(
        id: Id,
        name: String,
        channel: usize,
        gain: usize,
        scale: i64,
        sps: usize,
        i2c: Arc<dyn I2cBus>,
        bus: ChangeBus,
    ) -> Result<Self> {
        if channel >= CHANNEL_BITS.len() {
            return Err(DeviceError::OutOfRange(format!("channel {}", channel)));
        }
        if gain >= GAIN_BITS.len() {
            return Err(DeviceError::OutOfRange(format!("gain {}", gain)));
        }
        if sps >= SPS_BITS.len() {
            return Err(DeviceError::OutOfRange(format!("sps {}", sps)));
        }
        let range_mv = if scale != 0 { scale } else { GAIN_RANGE_MV[gain] };
        Ok(Self {
            inner: Arc::new(AdsInner {
                id,
                name,
                channel,
                gain,
                sps,
                range_mv,
                i2c,
                value: Mutex::new(0),
                bus,
                released: AtomicBool::new(false),
            }),
        })
    }

    /// Swap the two result bytes and scale counts to the configured range
    fn word_to_value(&self, word: u16) -> i64 {
        let swapped = word.swap_bytes();
        (self.inner.range_mv as f64 / 32768.0 * swapped as f64).round() as i64
    }

    /// Trigger a single-shot conversion and read the result.
    ///
    /// Writes the config register, sleeps the gain/rate-dependent settle
    /// time, then points at the conversion register and reads it.
    pub async fn measure(&self) -> Result<i64> {
        if self.inner.released.load(Ordering::SeqCst) {
            return Err(DeviceError::NotConnected);
        }

        // single shot, comparator off; see the ADS1115 data sheet
        let config = [
            0x01,
            0x80 | CHANNEL_BITS[self.inner.channel] | GAIN_BITS[self.inner.gain] | 0x01,
            SPS_BITS[self.inner.sps] | 0x03,
        ];
        self.inner.i2c.write(ADDRESS, &config)?;

        tokio::time::sleep(Duration::from_millis(SPS_SETTLE_MS[self.inner.sps])).await;

        // point at the conversion register, then read
        self.inner.i2c.write_byte(ADDRESS, 0)?;
        let word = self.inner.i2c.read_word(ADDRESS)?;
        let value = self.word_to_value(word);

        *self.inner.value.lock().unwrap() = value;
        debug!(
            "ADS1115      {} [{}] received from i2c bus: {}",
            self.inner.id, self.inner.channel, value
        );
        let _ = self.inner.bus.publish(ChangeEvent::new(
            self.inner.id.clone(),
            "ADS1115",
            Value::Integer(value),
        ));
        Ok(value)
    }
}

#[async_trait]
impl Device for Ads1115 {
    fn id(&self) -> &Id {
        &self.inner.id
    }

    fn name(&self) -> &str {
        &self.inner.name
    }

    fn kind(&self) -> ElementKind {
        ElementKind::Ads1115
    }

    fn direction(&self) -> Direction {
        Direction::In
    }

    fn protocol(&self) -> Protocol {
        Protocol::I2c
    }

    fn gpios(&self) -> Vec<u8> {
        vec![2, 3] // I2C1 SDA/SCL
    }

    fn value(&self) -> Value {
        Value::Integer(*self.inner.value.lock().unwrap())
    }

    async fn invoke(&self, cmd: &str, _arg: Option<&Value>) -> Result<Value> {
        match cmd {
            "measure" => Ok(Value::Integer(self.measure().await?)),
            "getValue" => Ok(self.value()),
            _ => Err(unknown_command(ElementKind::Ads1115, cmd)),
        }
    }

    async fn release(&self) {
        if self.inner.released.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Device       releasing ADS1115 {}", self.inner.name);
    }

    fn api(&self) -> &'static [CommandSpec] {
        &[
            CommandSpec {
                cmd: "getValue",
                args: &[],
                effect: "returns the last analog reading, scaled to the configured range",
            },
            CommandSpec {
                cmd: "measure",
                args: &[],
                effect: "triggers a single-shot conversion and returns the reading",
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SimI2c;

    fn adc(gain: usize, scale: i64) -> (Ads1115, Arc<SimI2c>) {
        let i2c = Arc::new(SimI2c::new());
        let dev = Ads1115::new(
            "adc1".into(),
            "poti".into(),
            0,
            gain,
            scale,
            4,
            i2c.clone(),
            ChangeBus::new(),
        )
        .unwrap();
        (dev, i2c)
    }

    #[tokio::test(start_paused = true)]
    async fn test_measure_scales_emulated_word() {
        let (dev, _) = adc(1, 0);
        // emulated bus answers 0x642A; swapped 0x2A64 = 10852 counts,
        // 4096 mV full scale -> 10852/8 = 1356.5 -> 1357
        let value = dev.measure().await.unwrap();
        assert_eq!(value, 1357);
        assert_eq!(dev.value(), Value::Integer(1357));
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_register_encoding() {
        let (dev, i2c) = adc(1, 0);
        dev.measure().await.unwrap();
        let writes = i2c.writes();
        assert_eq!(writes.len(), 2);
        // channel 0 vs GND, gain 1, single shot
        assert_eq!(writes[0].1, vec![0x01, 0x80 | 0x40 | 0x02 | 0x01, 0x80 | 0x03]);
        // pointer back to the conversion register
        assert_eq!(writes[1].1, vec![0x00]);
        assert_eq!(writes[0].0, ADDRESS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scale_overrides_range() {
        // full scale 1000 units: 10852/32768*1000 = 331.2 -> 331
        let (dev, _) = adc(1, 1000);
        assert_eq!(dev.measure().await.unwrap(), 331);
    }

    #[test]
    fn test_invalid_indices_rejected() {
        let i2c: Arc<dyn I2cBus> = Arc::new(SimI2c::new());
        assert!(Ads1115::new(
            "a".into(),
            "a".into(),
            8,
            1,
            0,
            4,
            i2c.clone(),
            ChangeBus::new()
        )
        .is_err());
        assert!(Ads1115::new(
            "a".into(),
            "a".into(),
            0,
            6,
            0,
            4,
            i2c,
            ChangeBus::new()
        )
        .is_err());
    }
}
