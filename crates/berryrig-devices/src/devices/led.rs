/*!
 * LED output device with a drift-free blink state machine.
 *
 * Blink toggles are anchored to the absolute start timestamp: each delay is
 * computed as `step*interval - elapsed` instead of chaining relative sleeps,
 * so scheduler jitter does not accumulate over long blink sequences.
 */
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use berryrig_core::event::{ChangeBus, ChangeEvent};
use berryrig_core::types::{Id, Value};

use crate::bus::OutputLine;
use crate::device::{
    unknown_command, ArgSpec, CommandSpec, Device, DeviceError, Direction, ElementKind, Protocol,
    Result,
};

/// Parameters for a blink sequence
#[derive(Debug, Clone, Copy)]
pub struct BlinkArgs {
    /// Time between two toggles in milliseconds
    pub interval: u64,
    /// Skews the odd-step delays by `(ratio-50)*2%`; 50 means symmetric
    pub ratio: u8,
    /// Number of full on/off cycles (ignored when `duration` is set)
    pub cycles: u32,
    /// Total blink time in milliseconds; overrides `cycles` when non-zero
    pub duration: u64,
}

impl Default for BlinkArgs {
    fn default() -> Self {
        Self {
            interval: 500,
            ratio: 50,
            cycles: 3,
            duration: 0,
        }
    }
}

impl BlinkArgs {
    /// Build blink args from an action argument object
    pub fn from_value(value: Option<&Value>) -> Self {
        let mut args = Self::default();
        if let Some(obj) = value.and_then(|v| v.as_object()) {
            if let Some(v) = obj.get("interval").and_then(|v| v.as_integer()) {
                args.interval = v.max(1) as u64;
            }
            if let Some(v) = obj.get("ratio").and_then(|v| v.as_integer()) {
                args.ratio = v.clamp(0, 100) as u8;
            }
            if let Some(v) = obj.get("cycles").and_then(|v| v.as_integer()) {
                args.cycles = v.max(1) as u32;
            }
            if let Some(v) = obj.get("duration").and_then(|v| v.as_integer()) {
                args.duration = v.max(0) as u64;
            }
        }
        args
    }
}

#[derive(Debug)]
struct BlinkState {
    run: JoinHandle<()>,
    started_at: Instant,
    notify: Option<oneshot::Sender<i64>>,
}

#[derive(Debug)]
struct LedInner {
    id: Id,
    name: String,
    color: String,
    gpio: u8,
    line: OutputLine,
    bus: ChangeBus,
    blink: Mutex<Option<BlinkState>>,
    released: AtomicBool,
}

impl LedInner {
    fn set_level(&self, level: u8) {
        self.line.write(level);
        let _ = self.bus.publish(ChangeEvent::new(
            self.id.clone(),
            "LED",
            Value::Integer(level as i64),
        ));
    }

    fn level(&self) -> u8 {
        self.line.read()
    }

    /// Take the blink state and fire the finished notification exactly once.
    /// Both the run task (natural end) and `stop` come through here; the
    /// second caller finds the slot empty.
    fn finish(&self) {
        let state = self.blink.lock().unwrap().take();
        if let Some(state) = state {
            let elapsed = state.started_at.elapsed().as_millis() as i64;
            trace!("LED          {} blink finished after {} ms", self.id, elapsed);
            if let Some(notify) = state.notify {
                let _ = notify.send(elapsed);
            }
        }
    }
}

/// A LED connected to a GPIO, with on/off/toggle and blinking
#[derive(Debug)]
pub struct Led {
    inner: Arc<LedInner>,
}

impl Led {
    /// Create a LED over an already-opened output line
    pub fn new(id: Id, name: String, color: &str, gpio: u8, line: OutputLine, bus: ChangeBus) -> Self {
        Self {
            inner: Arc::new(LedInner {
                id,
                name,
                color: color.to_string(),
                gpio,
                line,
                bus,
                blink: Mutex::new(None),
                released: AtomicBool::new(false),
            }),
        }
    }

    /// Create a LED backed by an emulated line
    pub fn emulated(id: Id, name: String, color: &str, gpio: u8, bus: ChangeBus) -> Self {
        Self::new(id, name, color, gpio, OutputLine::sim(gpio), bus)
    }

    /// The configured color
    pub fn color(&self) -> &str {
        &self.inner.color
    }

    /// The underlying line (for tests against the emulated write timeline)
    pub fn line(&self) -> &OutputLine {
        &self.inner.line
    }

    /// Switch the LED on
    pub fn on(&self) {
        self.inner.set_level(1);
    }

    /// Switch the LED off
    pub fn off(&self) {
        self.inner.set_level(0);
    }

    /// Toggle between on and off
    pub fn toggle(&self) {
        if self.inner.level() == 1 {
            self.off();
        } else {
            self.on();
        }
    }

    /// Start blinking.
    ///
    /// Rejected with [`DeviceError::Busy`] while a blink sequence is already
    /// running; call [`Led::stop`] first. The optional `notify` channel
    /// receives the elapsed milliseconds exactly once when blinking ends,
    /// whether it ran to completion or was stopped.
    pub fn blink(&self, args: BlinkArgs, notify: Option<oneshot::Sender<i64>>) -> Result<()> {
        debug!(
            "LED          {} blink: {},{},{},{}",
            self.inner.id, args.interval, args.ratio, args.duration, args.cycles
        );

        let mut guard = self.inner.blink.lock().unwrap();
        if guard.is_some() {
            return Err(DeviceError::Busy(format!(
                "{} is already blinking; stop it first",
                self.inner.id
            )));
        }

        let started_at = Instant::now();
        let inner = self.inner.clone();
        let run = tokio::spawn(async move {
            blink_loop(&inner, args, started_at).await;
            inner.finish();
        });

        *guard = Some(BlinkState {
            run,
            started_at,
            notify,
        });
        Ok(())
    }

    /// Stop a running blink sequence (no-op when idle)
    pub fn stop(&self) {
        let state = {
            let mut guard = self.inner.blink.lock().unwrap();
            guard.take()
        };
        if let Some(state) = state {
            state.run.abort();
            let elapsed = state.started_at.elapsed().as_millis() as i64;
            if let Some(notify) = state.notify {
                let _ = notify.send(elapsed);
            }
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.inner.released.load(Ordering::SeqCst) {
            Err(DeviceError::NotConnected)
        } else {
            Ok(())
        }
    }
}

/// Toggle until the cycle count or the duration is exhausted. Each delay
/// targets the next absolute multiple of the interval; odd steps carry the
/// ratio skew.
async fn blink_loop(inner: &LedInner, args: BlinkArgs, started_at: Instant) {
    inner.set_level(1);

    let deadline = if args.duration > 0 {
        Some(started_at + Duration::from_millis(args.duration))
    } else {
        None
    };
    let mut remaining = args.cycles;
    let mut step: u64 = 1;

    loop {
        let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
        let mut delay_ms = step as f64 * args.interval as f64 - elapsed_ms;
        if step % 2 == 1 {
            delay_ms *= 1.0 + (args.ratio as f64 - 50.0) * 0.02;
        }
        step += 1;
        let delay = Duration::from_secs_f64((delay_ms.max(0.0)) / 1000.0);

        if let Some(deadline) = deadline {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    // duration wins over cycles; complete the off phase
                    if inner.level() == 1 {
                        inner.set_level(0);
                    }
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        } else {
            tokio::time::sleep(delay).await;
        }

        if inner.level() == 1 {
            inner.set_level(0);
        } else {
            remaining = remaining.saturating_sub(1);
            if remaining == 0 && deadline.is_none() {
                return; // stop after the final off period
            }
            inner.set_level(1);
        }
    }
}

#[async_trait]
impl Device for Led {
    fn id(&self) -> &Id {
        &self.inner.id
    }

    fn name(&self) -> &str {
        &self.inner.name
    }

    fn kind(&self) -> ElementKind {
        ElementKind::Led
    }

    fn direction(&self) -> Direction {
        Direction::Out
    }

    fn protocol(&self) -> Protocol {
        Protocol::OnOff
    }

    fn gpios(&self) -> Vec<u8> {
        vec![self.inner.gpio]
    }

    fn value(&self) -> Value {
        Value::Integer(self.inner.level() as i64)
    }

    async fn invoke(&self, cmd: &str, arg: Option<&Value>) -> Result<Value> {
        self.ensure_live()?;
        match cmd {
            "on" => {
                self.on();
                Ok(Value::Integer(1))
            }
            "off" => {
                self.off();
                Ok(Value::Integer(0))
            }
            "toggle" => {
                self.toggle();
                Ok(self.value())
            }
            "blink" => {
                self.blink(BlinkArgs::from_value(arg), None)?;
                Ok(Value::Null)
            }
            "stop" => {
                self.stop();
                Ok(Value::Null)
            }
            "setValue" => {
                let level = arg.and_then(|v| v.as_integer()).ok_or_else(|| {
                    DeviceError::InvalidArgument(
                        "setValue".to_string(),
                        "expected 0 or 1".to_string(),
                    )
                })?;
                self.inner.set_level(if level == 0 { 0 } else { 1 });
                Ok(self.value())
            }
            "getValue" => Ok(self.value()),
            _ => Err(unknown_command(ElementKind::Led, cmd)),
        }
    }

    async fn release(&self) {
        if self.inner.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop();
        self.inner.set_level(0);
        info!("Device       releasing LED {} at gpio {}", self.inner.name, self.inner.gpio);
    }

    fn api(&self) -> &'static [CommandSpec] {
        &[
            CommandSpec {
                cmd: "blink",
                args: &[
                    ArgSpec { name: "interval", meaning: "msecs between two toggles" },
                    ArgSpec { name: "ratio", meaning: "0..100 on-time skew, 50 = symmetric" },
                    ArgSpec { name: "cycles", meaning: "number of full cycles to perform" },
                    ArgSpec { name: "duration", meaning: "time span for blinking; excess cycles are ignored" },
                ],
                effect: "let the LED blink according to the settings",
            },
            CommandSpec { cmd: "stop", args: &[], effect: "stop a running blink sequence" },
            CommandSpec { cmd: "on", args: &[], effect: "switch LED on" },
            CommandSpec { cmd: "off", args: &[], effect: "switch LED off" },
            CommandSpec { cmd: "toggle", args: &[], effect: "toggle the current state of the LED" },
            CommandSpec {
                cmd: "setValue",
                args: &[ArgSpec { name: "value", meaning: "0 or 1" }],
                effect: "set the LED state directly",
            },
            CommandSpec { cmd: "getValue", args: &[], effect: "return 0 or 1 for off/on" },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_led() -> Led {
        Led::emulated("l1".into(), "status".into(), "red", 17, ChangeBus::new())
    }

    #[tokio::test]
    async fn test_on_off_toggle() {
        let led = test_led();
        led.on();
        assert_eq!(led.value(), Value::Integer(1));
        led.toggle();
        assert_eq!(led.value(), Value::Integer(0));
        assert_eq!(led.invoke("on", None).await.unwrap(), Value::Integer(1));
        assert_eq!(led.invoke("getValue", None).await.unwrap(), Value::Integer(1));
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let led = test_led();
        let err = led.invoke("explode", None).await.unwrap_err();
        assert!(matches!(err, DeviceError::UnknownCommand { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blink_cycles_produce_six_toggles() {
        let led = test_led();
        let (tx, rx) = oneshot::channel();
        led.blink(
            BlinkArgs {
                interval: 100,
                ratio: 50,
                cycles: 3,
                duration: 0,
            },
            Some(tx),
        )
        .unwrap();

        let elapsed = rx.await.unwrap();
        assert!(elapsed >= 300, "elapsed {} ms", elapsed);

        let writes = led.line().as_sim().unwrap().writes();
        assert_eq!(writes.len(), 6, "on/off toggles");
        let levels: Vec<u8> = writes.iter().map(|w| w.1).collect();
        assert_eq!(levels, vec![1, 0, 1, 0, 1, 0]);
        assert_eq!(led.value(), Value::Integer(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blink_while_blinking_is_rejected() {
        let led = test_led();
        led.blink(BlinkArgs::default(), None).unwrap();
        let err = led.blink(BlinkArgs::default(), None).unwrap_err();
        assert!(matches!(err, DeviceError::Busy(_)));
        led.stop();
        // after stop a new sequence may start
        led.blink(BlinkArgs::default(), None).unwrap();
        led.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_blink_duration_overrides_cycles() {
        let led = test_led();
        let (tx, rx) = oneshot::channel();
        led.blink(
            BlinkArgs {
                interval: 100,
                ratio: 50,
                cycles: 100,
                duration: 350,
            },
            Some(tx),
        )
        .unwrap();

        let elapsed = rx.await.unwrap();
        assert!((350..500).contains(&elapsed), "elapsed {} ms", elapsed);
        // ends in the off state
        assert_eq!(led.value(), Value::Integer(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_fires_finished_once() {
        let led = test_led();
        let (tx, rx) = oneshot::channel();
        led.blink(
            BlinkArgs {
                interval: 100,
                ..BlinkArgs::default()
            },
            Some(tx),
        )
        .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        led.stop();
        let elapsed = rx.await.unwrap();
        assert!(elapsed >= 150);
        // second stop is a no-op
        led.stop();
    }

    #[tokio::test]
    async fn test_release_blocks_commands() {
        let led = test_led();
        led.release().await;
        assert!(matches!(
            led.invoke("on", None).await,
            Err(DeviceError::NotConnected)
        ));
    }
}
