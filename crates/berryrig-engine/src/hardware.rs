/*!
 * The element registry.
 *
 * A hardware description (already normalized to JSON by the description
 * pre-processor) is parsed into an ordered list of typed elements, built
 * into live devices (with deterministic emulation fallback when a physical
 * bus cannot be opened), and wired to the action dispatcher through the
 * change bus. The registry also serves the bulk state and setup snapshots
 * the transport layer exposes.
 */
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use berryrig_core::event::{ChangeBus, ChangeEvent};
use berryrig_core::types::{Id, Value};
use berryrig_devices::bus::{
    open_i2c, open_onewire, open_pwm, open_spi, hardware_channel, Edge, I2cBus, InputLine,
    OneWireBus, OutputLine, PwmChannel, SimI2c, SimOneWire, SimPwm, SimSpi, SpiBus,
};
use berryrig_devices::devices::{
    Ads1115, Button, Display, Ds1820, Led, Microphone, Mpu6500, PwDevice, Speakers, TextInput,
    Ws2801,
};
use berryrig_devices::registry::SharedDeviceRegistry;
use berryrig_devices::{Device, Direction, ElementKind};
use berryrig_devices::pins::{gpio_at_pin, pin_for_gpio, pin_label};

use crate::action::{Action, ActionSet};
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};

/// A threshold monitor: fire the action with 1/0 depending on whether each
/// reading is beyond `value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdMonitor {
    /// The threshold
    pub value: f64,
    /// The action receiving 1 or 0 per reading
    #[serde(flatten)]
    pub action: Action,
}

/// A range monitor: fire the action with 1/0 depending on whether each
/// reading lies within `[value.0, value.1]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeMonitor {
    /// Lower and upper bound
    pub value: (f64, f64),
    /// The action receiving 1 or 0 per reading
    #[serde(flatten)]
    pub action: Action,
}

/// A periodic Task monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSpec {
    /// The dispatched action
    #[serde(flatten)]
    pub action: Action,
    /// Polling interval in msec
    #[serde(default)]
    pub interval: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct AdsCfg {
    #[serde(default)]
    channel: usize,
    #[serde(default = "default_gain")]
    gain: usize,
    #[serde(default)]
    scale: i64,
    #[serde(default = "default_sps")]
    sps: usize,
}

#[derive(Debug, Clone, Deserialize)]
struct ButtonCfg {
    gpio: u8,
    #[serde(default)]
    debounce: u64,
    down: Option<ActionSet>,
    up: Option<ActionSet>,
    #[serde(rename = "downUp")]
    down_up: Option<ActionSet>,
    pressed: Option<ActionSet>,
}

#[derive(Debug, Clone, Deserialize)]
struct DisplayCfg {
    #[serde(rename = "xDim", default = "default_x_dim")]
    x_dim: usize,
    #[serde(rename = "yDim", default = "default_y_dim")]
    y_dim: usize,
}

#[derive(Debug, Clone, Deserialize)]
struct Ds1820Cfg {
    gpio: u8,
    #[serde(alias = "addresse")]
    address: String,
    below: Option<ThresholdMonitor>,
    between: Option<RangeMonitor>,
    above: Option<ThresholdMonitor>,
}

#[derive(Debug, Clone, Deserialize)]
struct FrontPanelCfg {
    init: Option<ActionSet>,
    exit: Option<ActionSet>,
}

#[derive(Debug, Clone, Deserialize)]
struct LedCfg {
    gpio: u8,
    #[serde(default = "default_color")]
    color: String,
}

#[derive(Debug, Clone, Deserialize)]
struct MpuCfg {
    #[serde(default)]
    orientation: [f64; 3],
}

#[derive(Debug, Clone, Deserialize)]
struct PwCfg {
    gpio: u8,
    #[serde(default = "default_frequency")]
    frequency: f64,
    duty: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Deserialize)]
struct SpeakersCfg {
    #[serde(rename = "devName", default)]
    dev_name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct TaskCfg {
    monitor: Option<MonitorSpec>,
}

#[derive(Debug, Clone, Deserialize)]
struct TextInputCfg {
    #[serde(default = "default_cols")]
    cols: usize,
    #[serde(default = "default_rows")]
    rows: usize,
    changed: Option<ActionSet>,
}

#[derive(Debug, Clone, Deserialize)]
struct Ws2801Cfg {
    #[serde(rename = "numLEDs", alias = "numLeds")]
    num_leds: usize,
    spi: String,
    #[serde(default = "default_spi_speed")]
    speed: u32,
    #[serde(default)]
    reverse: bool,
}

fn default_gain() -> usize {
    1
}
fn default_sps() -> usize {
    4
}
fn default_x_dim() -> usize {
    40
}
fn default_y_dim() -> usize {
    4
}
fn default_color() -> String {
    "red".to_string()
}
fn default_frequency() -> f64 {
    50.0
}
fn default_cols() -> usize {
    20
}
fn default_rows() -> usize {
    1
}
fn default_spi_speed() -> u32 {
    2_000_000
}

/// Kind-specific element configuration
#[derive(Debug, Clone)]
enum ElementConfig {
    Action,
    Ads1115(AdsCfg),
    Button(ButtonCfg),
    Display(DisplayCfg),
    Ds1820(Ds1820Cfg),
    FrontPanel(FrontPanelCfg),
    Label,
    Led(LedCfg),
    Microphone,
    Mpu6500(MpuCfg),
    PwDevice(PwCfg),
    Speakers(SpeakersCfg),
    Task(TaskCfg),
    TextInput(TextInputCfg),
    Ws2801(Ws2801Cfg),
}

/// One entry of the hardware description
#[derive(Debug, Clone)]
pub struct Element {
    /// Unique element id
    pub id: Id,
    /// Element kind
    pub kind: ElementKind,
    /// Display name (defaults to the id)
    pub name: String,
    /// Forced emulation for this element
    pub emulate: bool,
    config: ElementConfig,
    raw: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
struct DescriptionFile {
    title: Option<String>,
    #[serde(rename = "type")]
    hw_type: Option<String>,
    desc: Option<String>,
    rev: Option<String>,
    style: Option<String>,
    img: Option<String>,
    #[serde(default)]
    elms: Vec<serde_json::Value>,
}

/// Info recorded when the hardware is built
#[derive(Debug, Clone, Serialize)]
pub struct BuildInfo {
    /// Server/application name the hardware was built for
    pub name: String,
    /// Software version of the server application
    pub version: String,
    /// Unique id of this build instance
    pub instance: String,
    /// Build timestamp
    pub created_at: DateTime<Utc>,
}

/// One entry of the bulk state snapshot
#[derive(Debug, Clone, Serialize)]
pub struct ElementState {
    /// Element id
    pub id: String,
    /// Element kind wire name
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Current device value
    pub value: Value,
}

/// One entry of the 41-slot physical pin table
#[derive(Debug, Clone, Serialize)]
pub struct PinEntry {
    /// Kind of the element occupying the pin, if any
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Name of the element occupying the pin, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// BCM gpio number at this pin, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpio: Option<u8>,
    /// Signal name of the pin
    pub signal: String,
}

/// One entry of the gpio cross-reference
#[derive(Debug, Clone, Serialize)]
pub struct GpioEntry {
    /// Kind of the element using the gpio
    #[serde(rename = "type")]
    pub kind: String,
    /// Name of the element using the gpio
    pub name: String,
    /// Physical pin carrying this gpio
    pub pin: Option<u8>,
    /// Signal name of that pin
    pub signal: String,
}

/// Static description metadata for the setup snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SetupInfo {
    /// Description title
    pub title: Option<String>,
    /// Hardware type name
    #[serde(rename = "type")]
    pub hw_type: Option<String>,
    /// Build name
    pub name: Option<String>,
    /// Description text
    pub desc: Option<String>,
    /// Description revision
    pub rev: Option<String>,
    /// Server software version
    pub version: Option<String>,
    /// CSS style for the front panel
    pub style: Option<String>,
    /// Front panel background image
    #[serde(skip_serializing_if = "Option::is_none")]
    pub img: Option<String>,
    /// Build timestamp
    pub creation_time: Option<DateTime<Utc>>,
    /// Per-element static configuration
    pub elms: BTreeMap<String, serde_json::Value>,
}

/// The serializable setup snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SetupSnapshot {
    /// Description metadata and element configurations
    pub setup: SetupInfo,
    /// 41-entry physical pin table (index 0 unused)
    pub pins: Vec<PinEntry>,
    /// Sparse gpio cross-reference
    pub gpios: BTreeMap<u8, GpioEntry>,
}

#[derive(Debug, Default)]
struct ButtonEdges {
    down: Option<ActionSet>,
    up: Option<ActionSet>,
    down_up: Option<ActionSet>,
    pressed: Option<ActionSet>,
}

#[derive(Debug, Default)]
struct SensorMonitors {
    above: Option<ThresholdMonitor>,
    below: Option<ThresholdMonitor>,
    between: Option<RangeMonitor>,
}

/// Event-loop routing table derived from the description at build time
#[derive(Debug, Default)]
struct Wiring {
    buttons: HashMap<Id, ButtonEdges>,
    changed: HashMap<Id, ActionSet>,
    thresholds: HashMap<Id, SensorMonitors>,
}

/// The element registry: a group of virtual building blocks (elements)
/// connected to devices
#[derive(Debug)]
pub struct Hardware {
    title: Option<String>,
    hw_type: Option<String>,
    desc: Option<String>,
    rev: Option<String>,
    style: Option<String>,
    img: Option<String>,
    elements: Vec<Element>,
    index: HashMap<Id, usize>,
    devices: SharedDeviceRegistry,
    bus: ChangeBus,
    dispatcher: Dispatcher,
    monitor_interval_ms: u64,
    build_info: Mutex<Option<BuildInfo>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Hardware {
    /// Parse a normalized hardware description.
    ///
    /// In lenient mode invalid elements are logged and skipped; in strict
    /// mode the first invalid element fails the parse. Duplicate ids are
    /// always fatal.
    pub fn parse(text: &str, strict: bool) -> Result<Self> {
        let file: DescriptionFile = serde_json::from_str(text)?;

        let mut elements: Vec<Element> = Vec::new();
        let mut index = HashMap::new();
        for raw in &file.elms {
            match parse_element(raw) {
                Ok(element) => {
                    if index.contains_key(&element.id) {
                        return Err(Error::description(format!(
                            "duplicate element id '{}'",
                            element.id
                        )));
                    }
                    index.insert(element.id.clone(), elements.len());
                    elements.push(element);
                }
                Err(e) if strict => return Err(e),
                Err(e) => error!("HWD: {}", e),
            }
        }

        let devices = SharedDeviceRegistry::new();
        let dispatcher = Dispatcher::new(devices.clone());
        Ok(Self {
            title: file.title,
            hw_type: file.hw_type,
            desc: file.desc,
            rev: file.rev,
            style: file.style,
            img: file.img,
            elements,
            index,
            devices,
            bus: ChangeBus::new(),
            dispatcher,
            monitor_interval_ms: 5000,
            build_info: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Override the default interval for Task monitors that declare none
    pub fn set_monitor_interval(&mut self, ms: u64) {
        self.monitor_interval_ms = ms.max(1);
    }

    /// The parsed elements, in description order
    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// The action dispatcher for this hardware instance
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The change bus devices publish on (the broadcast layer subscribes
    /// here)
    pub fn change_bus(&self) -> &ChangeBus {
        &self.bus
    }

    /// The live device for an element, if built
    pub fn device(&self, id: &Id) -> Option<Arc<dyn Device>> {
        self.devices.get(id)
    }

    /// Set an element's attribute before building
    pub fn set(&mut self, elm: &str, attr: &str, value: serde_json::Value) {
        let idx = match self.index.get(&Id::from(elm)) {
            Some(&idx) => idx,
            None => {
                error!("Hardware: unknown element '{}'", elm);
                return;
            }
        };
        let element = &mut self.elements[idx];
        if attr == "emulate" {
            element.emulate = value.as_bool().unwrap_or(true);
        }
        if let Some(obj) = element.raw.as_object_mut() {
            obj.insert(attr.to_string(), value);
        }
    }

    /// Set a given attribute for all elements (e.g. the global emulation
    /// switch)
    pub fn set_all(&mut self, attr: &str, value: serde_json::Value) {
        let ids: Vec<String> = self
            .elements
            .iter()
            .map(|e| e.id.as_str().to_string())
            .collect();
        for id in ids {
            self.set(&id, attr, value.clone());
        }
    }

    /// Walk the element list and create one device per element, wire the
    /// engine event loop and run the front-panel init actions.
    pub async fn build(&self, name: &str, version: &str) -> Result<()> {
        if self.build_info.lock().unwrap().is_some() {
            return Err(Error::other("hardware is already built"));
        }

        let mut wiring = Wiring::default();
        let mut monitors: Vec<(Id, MonitorSpec)> = Vec::new();
        let mut init_actions: Vec<(Id, Action)> = Vec::new();

        for element in &self.elements {
            info!(
                "Hardware     creating {}: {}  ({}){}",
                element.kind,
                element.id,
                element.name,
                if element.emulate { " (emulation)" } else { "" }
            );

            match &element.config {
                ElementConfig::Action | ElementConfig::Label => {}
                ElementConfig::FrontPanel(cfg) => {
                    if let Some(init) = &cfg.init {
                        for action in init.iter() {
                            init_actions.push((element.id.clone(), action.clone()));
                        }
                    }
                }
                ElementConfig::Task(cfg) => {
                    if let Some(monitor) = &cfg.monitor {
                        monitors.push((element.id.clone(), monitor.clone()));
                    }
                }
                ElementConfig::Ads1115(cfg) => {
                    let i2c = self.i2c_bus(element);
                    let device = Ads1115::new(
                        element.id.clone(),
                        element.name.clone(),
                        cfg.channel,
                        cfg.gain,
                        cfg.scale,
                        cfg.sps,
                        i2c,
                        self.bus.clone(),
                    )?;
                    if let Err(e) = device.measure().await {
                        warn!("ADS1115      {} initial measurement failed: {}", element.id, e);
                    }
                    self.devices.register(Arc::new(device))?;
                }
                ElementConfig::Button(cfg) => {
                    let edge_mode =
                        if cfg.down.is_some() || cfg.up.is_some() || cfg.down_up.is_some() {
                            Edge::Both
                        } else {
                            Edge::Rising
                        };
                    let line = self.input_line(element, cfg.gpio);
                    let device = Button::new(
                        element.id.clone(),
                        element.name.clone(),
                        cfg.gpio,
                        cfg.debounce,
                        edge_mode,
                        line,
                        self.bus.clone(),
                    );
                    self.devices.register(Arc::new(device))?;

                    let has_edges = cfg.down.is_some()
                        || cfg.up.is_some()
                        || cfg.down_up.is_some()
                        || cfg.pressed.is_some();
                    if has_edges {
                        info!("Hardware     installing edge watcher for {}", element.id);
                        wiring.buttons.insert(
                            element.id.clone(),
                            ButtonEdges {
                                down: cfg.down.clone(),
                                up: cfg.up.clone(),
                                down_up: cfg.down_up.clone(),
                                pressed: cfg.pressed.clone(),
                            },
                        );
                    }
                }
                ElementConfig::Display(cfg) => {
                    let device = Display::new(
                        element.id.clone(),
                        element.name.clone(),
                        cfg.x_dim,
                        cfg.y_dim,
                        self.bus.clone(),
                    );
                    self.devices.register(Arc::new(device))?;
                }
                ElementConfig::Ds1820(cfg) => {
                    let onewire = self.onewire_bus(element, &cfg.address);
                    let device = Ds1820::new(
                        element.id.clone(),
                        element.name.clone(),
                        cfg.gpio,
                        &cfg.address,
                        onewire,
                        self.bus.clone(),
                    );
                    if let Err(e) = device.sample().await {
                        warn!("DS1820       {} initial sample failed: {}", element.id, e);
                    }
                    self.devices.register(Arc::new(device))?;

                    if cfg.above.is_some() || cfg.below.is_some() || cfg.between.is_some() {
                        wiring.thresholds.insert(
                            element.id.clone(),
                            SensorMonitors {
                                above: cfg.above.clone(),
                                below: cfg.below.clone(),
                                between: cfg.between.clone(),
                            },
                        );
                    }
                }
                ElementConfig::Led(cfg) => {
                    let line = self.output_line(element, cfg.gpio);
                    let device = Led::new(
                        element.id.clone(),
                        element.name.clone(),
                        &cfg.color,
                        cfg.gpio,
                        line,
                        self.bus.clone(),
                    );
                    self.devices.register(Arc::new(device))?;
                }
                ElementConfig::Microphone => {
                    let device =
                        Microphone::new(element.id.clone(), element.name.clone(), self.bus.clone());
                    self.devices.register(Arc::new(device))?;
                }
                ElementConfig::Mpu6500(cfg) => {
                    let i2c = self.i2c_bus(element);
                    let device = Mpu6500::new(
                        element.id.clone(),
                        element.name.clone(),
                        cfg.orientation,
                        i2c,
                        self.bus.clone(),
                    );
                    if let Err(e) = device.sample().await {
                        warn!("MPU6500      {} initial sample failed: {}", element.id, e);
                    }
                    self.devices.register(Arc::new(device))?;
                }
                ElementConfig::PwDevice(cfg) => {
                    let (channel, hardware) = self.pwm_channel(element, cfg.gpio, cfg.frequency);
                    let device = PwDevice::new(
                        element.id.clone(),
                        element.name.clone(),
                        cfg.gpio,
                        channel,
                        hardware,
                        self.bus.clone(),
                    );
                    if let Some(duty) = &cfg.duty {
                        device.limit_duty_cycle(duty)?;
                    }
                    self.devices.register(Arc::new(device))?;
                }
                ElementConfig::Speakers(cfg) => {
                    let device = Speakers::new(
                        element.id.clone(),
                        element.name.clone(),
                        &cfg.dev_name,
                        self.bus.clone(),
                    );
                    self.devices.register(Arc::new(device))?;
                }
                ElementConfig::TextInput(cfg) => {
                    let device = TextInput::new(
                        element.id.clone(),
                        element.name.clone(),
                        cfg.cols,
                        cfg.rows,
                        self.bus.clone(),
                    );
                    self.devices.register(Arc::new(device))?;

                    if let Some(changed) = &cfg.changed {
                        wiring.changed.insert(element.id.clone(), changed.clone());
                    }
                }
                ElementConfig::Ws2801(cfg) => {
                    let spi = self.spi_bus(element, &cfg.spi, cfg.speed);
                    let device = Ws2801::new(
                        element.id.clone(),
                        element.name.clone(),
                        cfg.num_leds,
                        &cfg.spi,
                        spi,
                        self.bus.clone(),
                    )?;
                    if cfg.reverse {
                        device.reverse();
                    }
                    self.devices.register(Arc::new(device))?;
                }
            }
        }

        // the engine event loop: route device changes to their action sets
        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(self.spawn_event_loop(wiring));

        // periodic Task monitors
        for (task_id, monitor) in monitors {
            tasks.push(self.spawn_monitor(task_id, monitor));
        }
        drop(tasks);

        *self.build_info.lock().unwrap() = Some(BuildInfo {
            name: name.to_string(),
            version: version.to_string(),
            instance: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
        });

        // front panel init actions run on the finished graph
        for (panel_id, action) in init_actions {
            if let Err(e) = self.dispatcher.handle(&panel_id, &action, &Value::Null).await {
                warn!("init action on {} failed: {}", panel_id, e);
            }
        }

        info!("Hardware     built {} devices", self.devices.len());
        Ok(())
    }

    fn spawn_event_loop(&self, wiring: Wiring) -> JoinHandle<()> {
        let dispatcher = self.dispatcher.clone();
        let mut rx = self.bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => route_event(&dispatcher, &wiring, event).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("event loop lagged, {} change events dropped", n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn spawn_monitor(&self, task_id: Id, monitor: MonitorSpec) -> JoinHandle<()> {
        let dispatcher = self.dispatcher.clone();
        let interval =
            Duration::from_millis(monitor.interval.unwrap_or(self.monitor_interval_ms).max(1));
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = dispatcher.handle(&task_id, &monitor.action, &Value::Null).await {
                    warn!("monitor {} failed: {}", task_id, e);
                }
            }
        })
    }

    /// Release every built device.
    ///
    /// Front-panel exit actions run first; monitor tasks and the event loop
    /// are stopped; each device's release hook runs in turn. Pending
    /// dispatcher timers are not flushed — a timer may still fire after
    /// release and its invocation will fail with a logged dispatch error.
    pub async fn release(&self) {
        if self.build_info.lock().unwrap().take().is_none() {
            return;
        }

        for element in &self.elements {
            if let ElementConfig::FrontPanel(cfg) = &element.config {
                if let Some(exit) = &cfg.exit {
                    for action in exit.iter() {
                        if let Err(e) =
                            self.dispatcher.handle(&element.id, action, &Value::Null).await
                        {
                            warn!("exit action on {} failed: {}", element.id, e);
                        }
                    }
                }
            }
        }

        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }

        let mut releasing = Vec::new();
        for element in &self.elements {
            if let Some(device) = self.devices.get(&element.id) {
                info!("Hardware     releasing {}:{}", element.kind, element.name);
                self.devices.unregister(&element.id);
                releasing.push(async move { device.release().await });
            }
        }
        // bus devices disconnect asynchronously; none of them gates the others
        futures::future::join_all(releasing).await;
    }

    /// Whether the hardware is currently built
    pub fn is_built(&self) -> bool {
        self.build_info.lock().unwrap().is_some()
    }

    /// Current state of every element with observable state: outputs and
    /// sensors. Labels, Actions, front panels and tasks carry none.
    pub fn all_states(&self) -> Vec<ElementState> {
        let mut states = Vec::new();
        for element in &self.elements {
            let device = match self.devices.get(&element.id) {
                Some(device) => device,
                None => continue,
            };
            if element.kind.is_sensor() || device.direction() == Direction::Out {
                states.push(ElementState {
                    id: element.id.as_str().to_string(),
                    kind: element.kind.as_str(),
                    value: device.value(),
                });
            }
        }
        states
    }

    /// Serializable snapshot of the static configuration: every element's
    /// description plus the derived pin/gpio cross reference.
    pub fn setup(&self) -> SetupSnapshot {
        let mut elms = BTreeMap::new();
        let mut gpio_entries: BTreeMap<u8, GpioEntry> = BTreeMap::new();

        // 41 entries, 1-indexed; entry 0 stays unused
        let mut pins: Vec<PinEntry> = (0..=40u8)
            .map(|p| PinEntry {
                kind: None,
                name: None,
                gpio: gpio_at_pin(p),
                signal: pin_label(p).to_string(),
            })
            .collect();

        for element in &self.elements {
            let mut entry = element.raw.clone();
            if let Some(device) = self.devices.get(&element.id) {
                if let Some(obj) = entry.as_object_mut() {
                    obj.insert(
                        "direction".to_string(),
                        serde_json::to_value(device.direction()).unwrap_or_default(),
                    );
                    obj.insert(
                        "protocol".to_string(),
                        serde_json::Value::String(device.protocol().to_string()),
                    );
                    let gpios = device.gpios();
                    if !gpios.is_empty() {
                        obj.insert(
                            "gpios".to_string(),
                            serde_json::to_value(&gpios).unwrap_or_default(),
                        );
                    }
                    if !device.api().is_empty() {
                        obj.insert(
                            "api".to_string(),
                            serde_json::to_value(device.api()).unwrap_or_default(),
                        );
                    }
                    for gpio in gpios {
                        let pin = pin_for_gpio(gpio);
                        let signal = pin.map(pin_label).unwrap_or("").to_string();
                        gpio_entries.insert(
                            gpio,
                            GpioEntry {
                                kind: element.kind.as_str().to_string(),
                                name: element.name.clone(),
                                pin,
                                signal: signal.clone(),
                            },
                        );
                        if let Some(pin) = pin {
                            pins[pin as usize] = PinEntry {
                                kind: Some(element.kind.as_str().to_string()),
                                name: Some(element.name.clone()),
                                gpio: Some(gpio),
                                signal,
                            };
                        }
                    }
                }
            }
            elms.insert(element.id.as_str().to_string(), entry);
        }

        let build_info = self.build_info.lock().unwrap().clone();
        SetupSnapshot {
            setup: SetupInfo {
                title: self.title.clone(),
                hw_type: self.hw_type.clone(),
                name: build_info.as_ref().map(|b| b.name.clone()),
                desc: self.desc.clone(),
                rev: self.rev.clone(),
                version: build_info.as_ref().map(|b| b.version.clone()),
                style: self.style.clone(),
                img: self.img.clone(),
                creation_time: build_info.as_ref().map(|b| b.created_at),
                elms,
            },
            pins,
            gpios: gpio_entries,
        }
    }

    /// The front panel's init actions, if a FrontPanel element declares any
    pub fn init_actions(&self) -> Vec<Action> {
        for element in &self.elements {
            if let ElementConfig::FrontPanel(cfg) = &element.config {
                return cfg
                    .init
                    .as_ref()
                    .map(|set| set.iter().cloned().collect())
                    .unwrap_or_default();
            }
        }
        Vec::new()
    }

    fn output_line(&self, element: &Element, gpio: u8) -> OutputLine {
        if !element.emulate {
            match OutputLine::open(gpio) {
                Ok(line) => return line,
                Err(e) => warn!(
                    "Hardware     {}: {}; switching to emulation",
                    element.id, e
                ),
            }
        }
        OutputLine::sim(gpio)
    }

    fn input_line(&self, element: &Element, gpio: u8) -> InputLine {
        if !element.emulate {
            match InputLine::open(gpio) {
                Ok(line) => return line,
                Err(e) => warn!(
                    "Hardware     {}: {}; switching to emulation",
                    element.id, e
                ),
            }
        }
        InputLine::sim(gpio)
    }

    fn i2c_bus(&self, element: &Element) -> Arc<dyn I2cBus> {
        if !element.emulate {
            match open_i2c() {
                Ok(bus) => return bus,
                Err(e) => warn!(
                    "Hardware     {}: {}; switching to emulation",
                    element.id, e
                ),
            }
        }
        Arc::new(SimI2c::new())
    }

    fn spi_bus(&self, element: &Element, spi_name: &str, speed: u32) -> Arc<dyn SpiBus> {
        if !element.emulate {
            let mut parts = spi_name.split('.');
            let bus = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
            let ss = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
            match open_spi(bus, ss, speed) {
                Ok(bus) => return bus,
                Err(e) => warn!(
                    "Hardware     {}: {}; switching to emulation",
                    element.id, e
                ),
            }
        }
        Arc::new(SimSpi::new(&format!("/dev/spidev{}", spi_name), speed))
    }

    fn pwm_channel(
        &self,
        element: &Element,
        gpio: u8,
        frequency: f64,
    ) -> (Arc<dyn PwmChannel>, bool) {
        if !element.emulate && hardware_channel(gpio).is_some() {
            match open_pwm(gpio, frequency) {
                Ok(channel) => return (channel, true),
                Err(e) => warn!(
                    "Hardware     {}: {}; switching to emulation",
                    element.id, e
                ),
            }
        }
        (Arc::new(SimPwm::new(gpio, frequency)), false)
    }

    fn onewire_bus(&self, element: &Element, address: &str) -> Arc<dyn OneWireBus> {
        if !element.emulate {
            match open_onewire(address) {
                Ok(bus) => return bus,
                Err(e) => warn!(
                    "Hardware     {}: {}; switching to emulation",
                    element.id, e
                ),
            }
        }
        Arc::new(SimOneWire::new())
    }
}

/// Route one change event to the action sets wired to its source element
async fn route_event(dispatcher: &Dispatcher, wiring: &Wiring, event: ChangeEvent) {
    if let Some(edges) = wiring.buttons.get(&event.source) {
        let edge = event.value.as_integer().unwrap_or(-1);
        let mut sets: Vec<&ActionSet> = Vec::new();
        match edge {
            1 => {
                if let Some(set) = &edges.down {
                    sets.push(set);
                }
            }
            0 => {
                if let Some(set) = &edges.up {
                    sets.push(set);
                }
            }
            _ => {}
        }
        if edge == 0 || edge == 1 {
            if let Some(set) = &edges.down_up {
                sets.push(set);
            }
        }
        if edge == 2 {
            if let Some(set) = &edges.pressed {
                sets.push(set);
            }
        }
        for set in sets {
            for action in set.iter() {
                debug!(
                    "Hardware     {} {}, action: {:?}",
                    event.source, edge, action
                );
                let _ = dispatcher.handle(&event.source, action, &event.value).await;
            }
        }
    }

    if let Some(set) = wiring.changed.get(&event.source) {
        for action in set.iter() {
            let _ = dispatcher.handle(&event.source, action, &event.value).await;
        }
    }

    if let Some(monitors) = wiring.thresholds.get(&event.source) {
        if let Some(reading) = event.value.as_float() {
            if let Some(threshold) = &monitors.above {
                let flag = Value::Integer((reading > threshold.value) as i64);
                let _ = dispatcher.handle(&event.source, &threshold.action, &flag).await;
            }
            if let Some(threshold) = &monitors.below {
                let flag = Value::Integer((reading < threshold.value) as i64);
                let _ = dispatcher.handle(&event.source, &threshold.action, &flag).await;
            }
            if let Some(range) = &monitors.between {
                let inside = reading >= range.value.0 && reading <= range.value.1;
                let flag = Value::Integer(inside as i64);
                let _ = dispatcher.handle(&event.source, &range.action, &flag).await;
            }
        }
    }
}

fn parse_element(raw: &serde_json::Value) -> Result<Element> {
    let obj = raw
        .as_object()
        .ok_or_else(|| Error::description("element is not an object"))?;
    let id = obj
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::description("element has no 'id' property"))?;
    let kind_str = obj
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::description(format!("element '{}' has no 'type' property", id)))?;
    let kind = ElementKind::from_str(kind_str).ok_or_else(|| {
        Error::validation(format!("element '{}' has unknown type '{}'", id, kind_str))
    })?;
    let name = obj
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or(id)
        .to_string();
    let emulate = obj
        .get("emulate")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let schema_err = |e: serde_json::Error| {
        Error::validation(format!(
            "element '{}' does not conform to schema for '{}': {}",
            id, kind_str, e
        ))
    };
    let config = match kind {
        ElementKind::Action => ElementConfig::Action,
        ElementKind::Label => ElementConfig::Label,
        ElementKind::Microphone => ElementConfig::Microphone,
        ElementKind::Ads1115 => {
            ElementConfig::Ads1115(serde_json::from_value(raw.clone()).map_err(schema_err)?)
        }
        ElementKind::Button => {
            ElementConfig::Button(serde_json::from_value(raw.clone()).map_err(schema_err)?)
        }
        ElementKind::Display => {
            ElementConfig::Display(serde_json::from_value(raw.clone()).map_err(schema_err)?)
        }
        ElementKind::Ds1820 => {
            ElementConfig::Ds1820(serde_json::from_value(raw.clone()).map_err(schema_err)?)
        }
        ElementKind::FrontPanel => {
            ElementConfig::FrontPanel(serde_json::from_value(raw.clone()).map_err(schema_err)?)
        }
        ElementKind::Led => {
            ElementConfig::Led(serde_json::from_value(raw.clone()).map_err(schema_err)?)
        }
        ElementKind::Mpu6500 => {
            ElementConfig::Mpu6500(serde_json::from_value(raw.clone()).map_err(schema_err)?)
        }
        ElementKind::PwDevice => {
            ElementConfig::PwDevice(serde_json::from_value(raw.clone()).map_err(schema_err)?)
        }
        ElementKind::Speakers => {
            ElementConfig::Speakers(serde_json::from_value(raw.clone()).map_err(schema_err)?)
        }
        ElementKind::Task => {
            ElementConfig::Task(serde_json::from_value(raw.clone()).map_err(schema_err)?)
        }
        ElementKind::TextInput => {
            ElementConfig::TextInput(serde_json::from_value(raw.clone()).map_err(schema_err)?)
        }
        ElementKind::Ws2801 => {
            ElementConfig::Ws2801(serde_json::from_value(raw.clone()).map_err(schema_err)?)
        }
    };

    Ok(Element {
        id: Id::from(id),
        kind,
        name,
        emulate,
        config,
        raw: raw.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elm(json: &str) -> String {
        format!(r#"{{"elms": [{}]}}"#, json)
    }

    #[test]
    fn test_parse_minimal_description() {
        let hardware = Hardware::parse(
            r#"{
                "title": "Two lamps",
                "type": "Lamps",
                "elms": [
                    { "id": "l1", "type": "LED", "gpio": 17 },
                    { "id": "l2", "type": "LED", "gpio": 27, "color": "green", "name": "status" }
                ]
            }"#,
            true,
        )
        .unwrap();
        assert_eq!(hardware.elements().len(), 2);
        assert_eq!(hardware.elements()[0].id.as_str(), "l1");
        assert_eq!(hardware.elements()[0].name, "l1");
        assert_eq!(hardware.elements()[1].name, "status");
        assert_eq!(hardware.elements()[1].kind, ElementKind::Led);
    }

    #[test]
    fn test_unknown_type_skipped_in_lenient_mode() {
        let text = elm(r#"{ "id": "x", "type": "Teapot" }"#);
        let hardware = Hardware::parse(&text, false).unwrap();
        assert!(hardware.elements().is_empty());
    }

    #[test]
    fn test_unknown_type_fails_in_strict_mode() {
        let text = elm(r#"{ "id": "x", "type": "Teapot" }"#);
        assert!(matches!(
            Hardware::parse(&text, true),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_missing_gpio_fails_schema() {
        let text = elm(r#"{ "id": "l1", "type": "LED" }"#);
        assert!(matches!(
            Hardware::parse(&text, true),
            Err(Error::Validation(_))
        ));
        // lenient mode drops the element and keeps going
        let hardware = Hardware::parse(&text, false).unwrap();
        assert!(hardware.elements().is_empty());
    }

    #[test]
    fn test_duplicate_id_always_fatal() {
        let text = r#"{"elms": [
            { "id": "l1", "type": "LED", "gpio": 17 },
            { "id": "l1", "type": "LED", "gpio": 27 }
        ]}"#;
        assert!(matches!(
            Hardware::parse(text, false),
            Err(Error::Description(_))
        ));
    }

    #[test]
    fn test_missing_type_reported() {
        let text = elm(r#"{ "id": "x" }"#);
        assert!(matches!(
            Hardware::parse(&text, true),
            Err(Error::Description(_))
        ));
    }

    #[test]
    fn test_button_edge_actions_parsed() {
        let text = elm(
            r#"{ "id": "b1", "type": "Button", "gpio": 22, "debounce": 50,
                 "down": [ { "elm": "l1", "cmd": "on" }, { "elm": "app", "cmd": "log" } ],
                 "pressed": { "elm": "l1", "cmd": "blink", "once": true, "delay": 100 } }"#,
        );
        let hardware = Hardware::parse(&text, true).unwrap();
        match &hardware.elements()[0].config {
            ElementConfig::Button(cfg) => {
                assert_eq!(cfg.debounce, 50);
                assert_eq!(cfg.down.as_ref().unwrap().len(), 2);
                let pressed = cfg.pressed.as_ref().unwrap();
                let action = pressed.iter().next().unwrap();
                assert!(action.once);
                assert_eq!(action.delay, Some(100));
            }
            other => panic!("unexpected config {:?}", other),
        }
    }

    #[test]
    fn test_threshold_monitor_parsed() {
        let text = elm(
            r#"{ "id": "t1", "type": "DS1820", "gpio": 4, "addresse": "28-0000075268f1",
                 "above": { "value": 30, "elm": "l1", "cmd": "setValue" },
                 "between": { "value": [10, 20], "elm": "l2", "cmd": "setValue" } }"#,
        );
        let hardware = Hardware::parse(&text, true).unwrap();
        match &hardware.elements()[0].config {
            ElementConfig::Ds1820(cfg) => {
                assert_eq!(cfg.address, "28-0000075268f1");
                assert_eq!(cfg.above.as_ref().unwrap().value, 30.0);
                assert_eq!(cfg.above.as_ref().unwrap().action.cmd, "setValue");
                assert_eq!(cfg.between.as_ref().unwrap().value, (10.0, 20.0));
                assert!(cfg.below.is_none());
            }
            other => panic!("unexpected config {:?}", other),
        }
    }

    #[test]
    fn test_task_monitor_interval_parsed() {
        let text = elm(
            r#"{ "id": "poll", "type": "Task",
                 "monitor": { "elm": "adc1", "cmd": "measure", "interval": 2500 } }"#,
        );
        let hardware = Hardware::parse(&text, true).unwrap();
        match &hardware.elements()[0].config {
            ElementConfig::Task(cfg) => {
                let monitor = cfg.monitor.as_ref().unwrap();
                assert_eq!(monitor.interval, Some(2500));
                assert_eq!(monitor.action.cmd, "measure");
            }
            other => panic!("unexpected config {:?}", other),
        }
    }

    #[test]
    fn test_set_all_emulate() {
        let mut hardware = Hardware::parse(
            r#"{"elms": [
                { "id": "l1", "type": "LED", "gpio": 17 },
                { "id": "b1", "type": "Button", "gpio": 22 }
            ]}"#,
            true,
        )
        .unwrap();
        assert!(!hardware.elements()[0].emulate);
        hardware.set_all("emulate", serde_json::Value::Bool(true));
        assert!(hardware.elements().iter().all(|e| e.emulate));
    }
}
