/*!
 * DS1820 temperature sensor on the 1-Wire bus.
 *
 * Each sample is published as a change event; threshold monitors
 * (above/below/between) are evaluated by the engine against these events,
 * not inside the device.
 */
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info};

use berryrig_core::event::{ChangeBus, ChangeEvent};
use berryrig_core::types::{Id, Value};

use crate::bus::OneWireBus;
use crate::device::{
    unknown_command, CommandSpec, Device, DeviceError, Direction, ElementKind, Protocol, Result,
};

#[derive(Debug)]
struct Ds1820Inner {
    id: Id,
    name: String,
    gpio: u8,
    address: String,
    onewire: Arc<dyn OneWireBus>,
    value: Mutex<f64>,
    bus: ChangeBus,
    released: AtomicBool,
}

/// A 1-Wire temperature sensor
#[derive(Debug)]
pub struct Ds1820 {
    inner: Arc<Ds1820Inner>,
}

impl Ds1820 {
    /// Create a sensor over an already-opened 1-Wire bus
    pub fn new(
        id: Id,
        name: String,
        gpio: u8,
        address: &str,
        onewire: Arc<dyn OneWireBus>,
        bus: ChangeBus,
    ) -> Self {
        info!("DS1820       connecting to addresse: {}", address);
        Self {
            inner: Arc::new(Ds1820Inner {
                id,
                name,
                gpio,
                address: address.to_string(),
                onewire,
                value: Mutex::new(0.0),
                bus,
                released: AtomicBool::new(false),
            }),
        }
    }

    /// The sensor's bus address
    pub fn address(&self) -> &str {
        &self.inner.address
    }

    /// Read the temperature, cache it and publish the change event
    pub async fn sample(&self) -> Result<f64> {
        if self.inner.released.load(Ordering::SeqCst) {
            return Err(DeviceError::NotConnected);
        }
        let value = self.inner.onewire.read_temperature(&self.inner.address)?;
        *self.inner.value.lock().unwrap() = value;
        debug!(
            "DS1820       {} : received value from 1-wire bus: {}",
            self.inner.address, value
        );
        let _ = self.inner.bus.publish(ChangeEvent::new(
            self.inner.id.clone(),
            "DS1820",
            Value::Float(value),
        ));
        Ok(value)
    }
}

#[async_trait]
impl Device for Ds1820 {
    fn id(&self) -> &Id {
        &self.inner.id
    }

    fn name(&self) -> &str {
        &self.inner.name
    }

    fn kind(&self) -> ElementKind {
        ElementKind::Ds1820
    }

    fn direction(&self) -> Direction {
        Direction::In
    }

    fn protocol(&self) -> Protocol {
        Protocol::OneWire
    }

    fn gpios(&self) -> Vec<u8> {
        vec![self.inner.gpio]
    }

    fn value(&self) -> Value {
        Value::Float(*self.inner.value.lock().unwrap())
    }

    async fn invoke(&self, cmd: &str, _arg: Option<&Value>) -> Result<Value> {
        match cmd {
            "measure" => Ok(Value::Float(self.sample().await?)),
            "getValue" => Ok(self.value()),
            _ => Err(unknown_command(ElementKind::Ds1820, cmd)),
        }
    }

    async fn release(&self) {
        if self.inner.released.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Device       releasing DS1820 {}", self.inner.name);
    }

    fn api(&self) -> &'static [CommandSpec] {
        &[
            CommandSpec {
                cmd: "getValue",
                args: &[],
                effect: "returns the temperature in degrees Celsius",
            },
            CommandSpec {
                cmd: "measure",
                args: &[],
                effect: "reads the sensor and returns the new temperature",
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SimOneWire;

    #[tokio::test]
    async fn test_sample_publishes_reading() {
        let onewire = Arc::new(SimOneWire::new());
        onewire.set_temperature(35.2);
        let bus = ChangeBus::new();
        let mut rx = bus.subscribe();

        let sensor = Ds1820::new(
            "t1".into(),
            "tank".into(),
            4,
            "28-0000075268f1",
            onewire,
            bus,
        );
        assert_eq!(sensor.sample().await.unwrap(), 35.2);
        assert_eq!(sensor.value(), Value::Float(35.2));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, "DS1820");
        assert_eq!(event.value, Value::Float(35.2));
    }

    #[tokio::test]
    async fn test_release_blocks_sampling() {
        let sensor = Ds1820::new(
            "t1".into(),
            "tank".into(),
            4,
            "28-0000075268f1",
            Arc::new(SimOneWire::new()),
            ChangeBus::new(),
        );
        sensor.release().await;
        assert!(matches!(
            sensor.sample().await,
            Err(DeviceError::NotConnected)
        ));
    }
}
