/*!
 * Pulse-width-modulated device.
 *
 * The duty cycle can be limited to a subrange of [0, 1]; an extra floor
 * below the subrange snaps to the lower bound so loads that misbehave on
 * tiny current spikes never see them. `changeDutyCycle` ramps to a target
 * in discrete steps instead of jumping.
 */
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use berryrig_core::event::{ChangeBus, ChangeEvent};
use berryrig_core::types::{Id, Value};

use crate::bus::{hardware_channel, PwmChannel, SimPwm};
use crate::device::{
    unknown_command, ArgSpec, CommandSpec, Device, DeviceError, Direction, ElementKind, Protocol,
    Result,
};

/// Duty-cycle clamping configuration
#[derive(Debug, Clone, Copy)]
struct DutyBounds {
    lower: f64,
    upper: f64,
    extra: f64,
}

impl Default for DutyBounds {
    fn default() -> Self {
        Self {
            lower: 0.0,
            upper: 1.0,
            extra: 0.0,
        }
    }
}

#[derive(Debug)]
struct PwInner {
    id: Id,
    name: String,
    gpio: u8,
    pwm_type: &'static str,
    channel: Arc<dyn PwmChannel>,
    bounds: Mutex<DutyBounds>,
    bus: ChangeBus,
    ramp: Mutex<Option<JoinHandle<()>>>,
    released: AtomicBool,
}

impl PwInner {
    fn clamp(&self, value: f64) -> f64 {
        let bounds = *self.bounds.lock().unwrap();
        if bounds.extra > bounds.lower && value < bounds.extra {
            bounds.lower
        } else if value < bounds.lower {
            bounds.lower
        } else if value > bounds.upper {
            bounds.upper
        } else {
            value
        }
    }

    fn apply(&self, value: f64) -> Result<f64> {
        let value = self.clamp(value);
        self.channel.write(value)?;
        let _ = self.bus.publish(ChangeEvent::new(
            self.id.clone(),
            "PWDevice",
            Value::Float(value),
        ));
        Ok(value)
    }
}

/// A hardware- or software-PWM driven actuator
#[derive(Debug)]
pub struct PwDevice {
    inner: Arc<PwInner>,
}

impl PwDevice {
    /// Create a device over an already-opened PWM channel.
    ///
    /// `hardware` marks a real PWM peripheral channel; everything else is
    /// treated as a software channel (stable enough for LEDs, jittery for
    /// servos).
    pub fn new(
        id: Id,
        name: String,
        gpio: u8,
        channel: Arc<dyn PwmChannel>,
        hardware: bool,
        bus: ChangeBus,
    ) -> Self {
        let pwm_type = if hardware && hardware_channel(gpio).is_some() {
            "hard"
        } else {
            "soft"
        };
        Self {
            inner: Arc::new(PwInner {
                id,
                name,
                gpio,
                pwm_type,
                channel,
                bounds: Mutex::new(DutyBounds::default()),
                bus,
                ramp: Mutex::new(None),
                released: AtomicBool::new(false),
            }),
        }
    }

    /// Create a device backed by an emulated channel
    pub fn emulated(id: Id, name: String, gpio: u8, frequency: f64, bus: ChangeBus) -> Self {
        Self::new(id, name, gpio, Arc::new(SimPwm::new(gpio, frequency)), false, bus)
    }

    /// "hard" or "soft"
    pub fn pwm_type(&self) -> &'static str {
        self.inner.pwm_type
    }

    /// The underlying channel (for tests against the emulated write history)
    pub fn channel(&self) -> &Arc<dyn PwmChannel> {
        &self.inner.channel
    }

    /// Restrict the duty cycle to `[lower, upper]`, with an optional third
    /// entry as the extra floor below which output snaps to `lower`
    pub fn limit_duty_cycle(&self, bounds: &[f64]) -> Result<()> {
        if bounds.len() < 2 {
            return Err(DeviceError::InvalidArgument(
                "duty".to_string(),
                "expected [lower, upper] or [lower, upper, extra]".to_string(),
            ));
        }
        let mut guard = self.inner.bounds.lock().unwrap();
        guard.lower = bounds[0];
        guard.upper = bounds[1];
        guard.extra = if bounds.len() >= 3 { bounds[2] } else { bounds[0] };
        debug!(
            "PWDevice     {} limits: {}...{}  ({})",
            self.inner.id, guard.lower, guard.upper, guard.extra
        );
        Ok(())
    }

    /// Clamp and write the duty cycle immediately
    pub fn set_duty_cycle(&self, value: f64) -> Result<f64> {
        self.inner.apply(value)
    }

    /// The last written duty cycle
    pub fn duty_cycle(&self) -> f64 {
        self.inner.channel.duty()
    }

    /// Ramp to `value` in steps of `step_size`, one write every `delay` —
    /// a non-blocking transition. A running ramp is superseded.
    pub fn change_duty_cycle(&self, value: f64, step_size: f64, delay: Duration) -> Result<()> {
        if step_size <= 0.0 {
            return Err(DeviceError::InvalidArgument(
                "changeDutyCycle".to_string(),
                "stepSize must be positive".to_string(),
            ));
        }

        let mut ramp = self.inner.ramp.lock().unwrap();
        if let Some(handle) = ramp.take() {
            handle.abort();
        }

        let current = self.inner.channel.duty();
        let distance = value - current;
        let steps = (distance.abs() / step_size).ceil() as u32;
        if steps == 0 {
            return Ok(());
        }
        let direction = distance.signum();

        debug!(
            "PWDevice     {} ramp {} -> {} in {} steps",
            self.inner.id, current, value, steps
        );

        let inner = self.inner.clone();
        *ramp = Some(tokio::spawn(async move {
            for i in 1..=steps {
                tokio::time::sleep(delay).await;
                let next = if i == steps {
                    value
                } else {
                    current + direction * step_size * i as f64
                };
                if inner.apply(next).is_err() {
                    break;
                }
            }
        }));
        Ok(())
    }

    fn ensure_live(&self) -> Result<()> {
        if self.inner.released.load(Ordering::SeqCst) {
            Err(DeviceError::NotConnected)
        } else {
            Ok(())
        }
    }
}

fn number_arg(cmd: &str, arg: Option<&Value>) -> Result<f64> {
    arg.and_then(|v| v.as_float()).ok_or_else(|| {
        DeviceError::InvalidArgument(cmd.to_string(), "expected a number".to_string())
    })
}

#[async_trait]
impl Device for PwDevice {
    fn id(&self) -> &Id {
        &self.inner.id
    }

    fn name(&self) -> &str {
        &self.inner.name
    }

    fn kind(&self) -> ElementKind {
        ElementKind::PwDevice
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
        Value::Float(self.duty_cycle())
    }

    async fn invoke(&self, cmd: &str, arg: Option<&Value>) -> Result<Value> {
        self.ensure_live()?;
        match cmd {
            "setDutyCycle" => {
                let v = self.set_duty_cycle(number_arg(cmd, arg)?)?;
                Ok(Value::Float(v))
            }
            "changeDutyCycle" => {
                let obj = arg.and_then(|v| v.as_object()).ok_or_else(|| {
                    DeviceError::InvalidArgument(
                        cmd.to_string(),
                        "expected {value, stepSize, delay}".to_string(),
                    )
                })?;
                let value = obj.get("value").and_then(|v| v.as_float()).ok_or_else(|| {
                    DeviceError::InvalidArgument(cmd.to_string(), "missing value".to_string())
                })?;
                let step_size = obj
                    .get("stepSize")
                    .and_then(|v| v.as_float())
                    .unwrap_or(0.1);
                let delay = obj
                    .get("delay")
                    .and_then(|v| v.as_integer())
                    .unwrap_or(100)
                    .max(1) as u64;
                self.change_duty_cycle(value, step_size, Duration::from_millis(delay))?;
                Ok(Value::Null)
            }
            "getDutyCycle" | "getValue" => Ok(self.value()),
            _ => Err(unknown_command(ElementKind::PwDevice, cmd)),
        }
    }

    async fn release(&self) {
        if self.inner.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.inner.ramp.lock().unwrap().take() {
            handle.abort();
        }
        info!(
            "Device       releasing PWDevice {} at gpio {}",
            self.inner.name, self.inner.gpio
        );
    }

    fn api(&self) -> &'static [CommandSpec] {
        &[
            CommandSpec {
                cmd: "getDutyCycle",
                args: &[],
                effect: "returns the duty cycle (0..1)",
            },
            CommandSpec {
                cmd: "getValue",
                args: &[],
                effect: "returns the duty cycle (0..1)",
            },
            CommandSpec {
                cmd: "setDutyCycle",
                args: &[ArgSpec {
                    name: "value",
                    meaning: "a fractional number between 0 and 1",
                }],
                effect: "updates the duty cycle immediately",
            },
            CommandSpec {
                cmd: "changeDutyCycle",
                args: &[
                    ArgSpec { name: "value", meaning: "target duty cycle" },
                    ArgSpec { name: "stepSize", meaning: "duty change per step" },
                    ArgSpec { name: "delay", meaning: "msecs between steps" },
                ],
                effect: "ramps the duty cycle to the target in discrete steps",
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pwdevice() -> (PwDevice, Arc<SimPwm>) {
        let channel = Arc::new(SimPwm::new(18, 50.0));
        let dev = PwDevice::new(
            "pw1".into(),
            "fan".into(),
            18,
            channel.clone(),
            false,
            ChangeBus::new(),
        );
        (dev, channel)
    }

    #[tokio::test]
    async fn test_set_duty_clamps_to_bounds() {
        let (dev, _) = pwdevice();
        dev.limit_duty_cycle(&[0.2, 0.9]).unwrap();
        assert_eq!(dev.set_duty_cycle(0.05).unwrap(), 0.2);
        assert_eq!(dev.set_duty_cycle(0.95).unwrap(), 0.9);
        assert_eq!(dev.set_duty_cycle(0.5).unwrap(), 0.5);
    }

    #[tokio::test]
    async fn test_extra_floor_snaps_to_lower() {
        let (dev, _) = pwdevice();
        dev.limit_duty_cycle(&[0.0, 1.0, 0.1]).unwrap();
        // below the extra floor: snap down to lower, not up
        assert_eq!(dev.set_duty_cycle(0.05).unwrap(), 0.0);
        assert_eq!(dev.set_duty_cycle(0.1).unwrap(), 0.1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ramp_writes_discrete_steps() {
        let (dev, channel) = pwdevice();
        dev.change_duty_cycle(0.8, 0.1, Duration::from_millis(50))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(450)).await;
        let writes = channel.writes();
        assert_eq!(writes.len(), 8, "one write per step");
        assert!((writes[0] - 0.1).abs() < 1e-9);
        assert!((writes[6] - 0.7).abs() < 1e-9);
        assert_eq!(writes[7], 0.8, "final write is exactly the target");
        assert_eq!(dev.duty_cycle(), 0.8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ramp_downwards() {
        let (dev, channel) = pwdevice();
        dev.set_duty_cycle(0.6).unwrap();
        dev.change_duty_cycle(0.0, 0.2, Duration::from_millis(10))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(dev.duty_cycle(), 0.0);
        // 0.6 (set) + 3 ramp steps
        assert_eq!(channel.writes().len(), 4);
    }

    #[tokio::test]
    async fn test_zero_step_size_rejected() {
        let (dev, _) = pwdevice();
        assert!(matches!(
            dev.change_duty_cycle(0.5, 0.0, Duration::from_millis(10)),
            Err(DeviceError::InvalidArgument(..))
        ));
    }

    #[tokio::test]
    async fn test_invoke_set_duty() {
        let (dev, _) = pwdevice();
        let v = dev
            .invoke("setDutyCycle", Some(&Value::Float(0.4)))
            .await
            .unwrap();
        assert_eq!(v, Value::Float(0.4));
        assert_eq!(dev.invoke("getValue", None).await.unwrap(), Value::Float(0.4));
    }
}
