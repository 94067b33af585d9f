/*!
 * Debounced push button on a GPIO.
 *
 * Edge values delivered to watchers: `1` = down (low→high), `0` = up
 * (high→low), `2` = discrete press. With `edge_mode = Rising` only the
 * discrete press is reported; `Both` reports the individual transitions too.
 */
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use berryrig_core::event::{ChangeBus, ChangeEvent};
use berryrig_core::types::{Id, Value};

use crate::bus::{Edge, InputLine};
use crate::device::{
    unknown_command, ArgSpec, CommandSpec, Device, DeviceError, Direction, ElementKind, Protocol,
    Result,
};

/// Edge value for a button being pushed down
pub const EDGE_DOWN: i64 = 1;
/// Edge value for a button being released
pub const EDGE_UP: i64 = 0;
/// Edge value for a discrete press
pub const EDGE_PRESSED: i64 = 2;

#[derive(Debug)]
struct ButtonInner {
    id: Id,
    name: String,
    gpio: u8,
    debounce: Duration,
    edge_mode: Edge,
    line: InputLine,
    bus: ChangeBus,
    last_edge: Mutex<Option<Instant>>,
    value: Mutex<i64>,
    released: AtomicBool,
}

/// A physical on/off button connected to a GPIO with configurable debouncing
#[derive(Debug)]
pub struct Button {
    inner: Arc<ButtonInner>,
}

impl Button {
    /// Create a button over an already-opened input line
    pub fn new(
        id: Id,
        name: String,
        gpio: u8,
        debounce_ms: u64,
        edge_mode: Edge,
        line: InputLine,
        bus: ChangeBus,
    ) -> Self {
        info!("Button       creating {} at gpio {}", name, gpio);
        Self {
            inner: Arc::new(ButtonInner {
                id,
                name,
                gpio,
                debounce: Duration::from_millis(debounce_ms),
                edge_mode,
                line,
                bus,
                last_edge: Mutex::new(None),
                value: Mutex::new(0),
                released: AtomicBool::new(false),
            }),
        }
    }

    /// Create a button backed by an emulated line
    pub fn emulated(
        id: Id,
        name: String,
        gpio: u8,
        debounce_ms: u64,
        edge_mode: Edge,
        bus: ChangeBus,
    ) -> Self {
        Self::new(
            id,
            name,
            gpio,
            debounce_ms,
            edge_mode,
            InputLine::sim(gpio),
            bus,
        )
    }

    /// The configured edge mode
    pub fn edge_mode(&self) -> Edge {
        self.inner.edge_mode
    }

    /// Simulate a button event: `"down"`, `"up"` or `"pressed"`.
    ///
    /// Transitions inside the debounce window after the first accepted edge
    /// are swallowed. Returns the emitted edge value, or `Null` when the
    /// event was debounced or filtered by the edge mode.
    pub fn press(&self, state: &str) -> Result<Value> {
        let edge = match state {
            "down" => EDGE_DOWN,
            "up" => EDGE_UP,
            "pressed" => EDGE_PRESSED,
            other => {
                return Err(DeviceError::InvalidArgument(
                    "press".to_string(),
                    format!("expected down/up/pressed, got '{}'", other),
                ))
            }
        };

        // debounce window
        {
            let mut last = self.inner.last_edge.lock().unwrap();
            if let Some(at) = *last {
                if at.elapsed() < self.inner.debounce {
                    trace!("Button       {} bounce ignored ({})", self.inner.id, state);
                    return Ok(Value::Null);
                }
            }
            *last = Some(Instant::now());
        }

        // keep the emulated line level in sync with down/up
        match edge {
            EDGE_DOWN => self.inner.line.set_sim_level(1),
            EDGE_UP => self.inner.line.set_sim_level(0),
            _ => {}
        }

        // rising mode only reports the discrete press
        if self.inner.edge_mode == Edge::Rising && edge != EDGE_PRESSED {
            return Ok(Value::Null);
        }

        *self.inner.value.lock().unwrap() = edge;
        debug!("Button       {} {} -> {}", self.inner.id, state, edge);
        let _ = self.inner.bus.publish(ChangeEvent::new(
            self.inner.id.clone(),
            "Button",
            Value::Integer(edge),
        ));
        Ok(Value::Integer(edge))
    }

    fn ensure_live(&self) -> Result<()> {
        if self.inner.released.load(Ordering::SeqCst) {
            Err(DeviceError::NotConnected)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Device for Button {
    fn id(&self) -> &Id {
        &self.inner.id
    }

    fn name(&self) -> &str {
        &self.inner.name
    }

    fn kind(&self) -> ElementKind {
        ElementKind::Button
    }

    fn direction(&self) -> Direction {
        Direction::In
    }

    fn protocol(&self) -> Protocol {
        Protocol::OnOff
    }

    fn gpios(&self) -> Vec<u8> {
        vec![self.inner.gpio]
    }

    fn value(&self) -> Value {
        Value::Integer(*self.inner.value.lock().unwrap())
    }

    async fn invoke(&self, cmd: &str, arg: Option<&Value>) -> Result<Value> {
        self.ensure_live()?;
        match cmd {
            "press" => {
                let state = arg
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        DeviceError::InvalidArgument(
                            "press".to_string(),
                            "missing state argument".to_string(),
                        )
                    })?
                    .to_string();
                self.press(&state)
            }
            "down" => self.press("down"),
            "up" => self.press("up"),
            "getValue" => Ok(self.value()),
            _ => Err(unknown_command(ElementKind::Button, cmd)),
        }
    }

    async fn release(&self) {
        if self.inner.released.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(
            "Device       releasing Button {} at gpio {}",
            self.inner.name, self.inner.gpio
        );
    }

    fn api(&self) -> &'static [CommandSpec] {
        &[
            CommandSpec {
                cmd: "press",
                args: &[ArgSpec {
                    name: "state",
                    meaning: "one of down, up, pressed",
                }],
                effect: "simulates a button down, up or press action",
            },
            CommandSpec {
                cmd: "down",
                args: &[],
                effect: "simulates a button which was pushed and is now being held down",
            },
            CommandSpec {
                cmd: "up",
                args: &[],
                effect: "simulates a button which had been pushed and is now being released",
            },
            CommandSpec {
                cmd: "getValue",
                args: &[],
                effect: "returns the last emitted edge value",
            },
        ]
    }
}
