/*!
 * Audio endpoints: speakers and microphone.
 *
 * Actual playback and capture run in an external audio layer; these devices
 * carry the configuration, accept the commands and publish them as change
 * events for that layer to consume.
 */
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::info;

use berryrig_core::event::{ChangeBus, ChangeEvent};
use berryrig_core::types::{Id, Value};

use crate::device::{
    unknown_command, ArgSpec, CommandSpec, Device, DeviceError, Direction, ElementKind, Protocol,
    Result,
};

#[derive(Debug)]
struct SpeakersInner {
    id: Id,
    name: String,
    dev_name: String,
    last_request: Mutex<Value>,
    bus: ChangeBus,
    released: AtomicBool,
}

/// Audio playback endpoint
#[derive(Debug)]
pub struct Speakers {
    inner: Arc<SpeakersInner>,
}

impl Speakers {
    /// Create a speakers device; `dev_name` selects the ALSA output
    pub fn new(id: Id, name: String, dev_name: &str, bus: ChangeBus) -> Self {
        Self {
            inner: Arc::new(SpeakersInner {
                id,
                name,
                dev_name: dev_name.to_string(),
                last_request: Mutex::new(Value::Null),
                bus,
                released: AtomicBool::new(false),
            }),
        }
    }

    /// The configured output device name
    pub fn dev_name(&self) -> &str {
        &self.inner.dev_name
    }

    fn forward(&self, cmd: &str, arg: Option<&Value>) -> Value {
        let mut request = std::collections::HashMap::new();
        request.insert("cmd".to_string(), Value::from(cmd));
        if let Some(arg) = arg {
            request.insert("arg".to_string(), arg.clone());
        }
        let value = Value::Object(request);
        *self.inner.last_request.lock().unwrap() = value.clone();
        let _ = self.inner.bus.publish(ChangeEvent::new(
            self.inner.id.clone(),
            "Speakers",
            value.clone(),
        ));
        value
    }
}

#[async_trait]
impl Device for Speakers {
    fn id(&self) -> &Id {
        &self.inner.id
    }

    fn name(&self) -> &str {
        &self.inner.name
    }

    fn kind(&self) -> ElementKind {
        ElementKind::Speakers
    }

    fn direction(&self) -> Direction {
        Direction::Out
    }

    fn protocol(&self) -> Protocol {
        Protocol::I2s
    }

    fn value(&self) -> Value {
        self.inner.last_request.lock().unwrap().clone()
    }

    async fn invoke(&self, cmd: &str, arg: Option<&Value>) -> Result<Value> {
        if self.inner.released.load(Ordering::SeqCst) {
            return Err(DeviceError::NotConnected);
        }
        match cmd {
            "play" | "say" | "setVolume" => Ok(self.forward(cmd, arg)),
            "getValue" => Ok(self.value()),
            _ => Err(unknown_command(ElementKind::Speakers, cmd)),
        }
    }

    async fn release(&self) {
        if self.inner.released.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Device       releasing Speakers {}", self.inner.name);
    }

    fn api(&self) -> &'static [CommandSpec] {
        &[
            CommandSpec {
                cmd: "play",
                args: &[ArgSpec { name: "file", meaning: "audio file to play" }],
                effect: "requests playback of an audio file",
            },
            CommandSpec {
                cmd: "say",
                args: &[ArgSpec { name: "text", meaning: "text to speak" }],
                effect: "requests speech output",
            },
            CommandSpec {
                cmd: "setVolume",
                args: &[ArgSpec { name: "value", meaning: "volume 0..100" }],
                effect: "requests a volume change",
            },
        ]
    }
}

#[derive(Debug)]
struct MicrophoneInner {
    id: Id,
    name: String,
    last_request: Mutex<Value>,
    bus: ChangeBus,
    released: AtomicBool,
}

/// Audio capture endpoint
#[derive(Debug)]
pub struct Microphone {
    inner: Arc<MicrophoneInner>,
}

impl Microphone {
    /// Create a microphone device
    pub fn new(id: Id, name: String, bus: ChangeBus) -> Self {
        Self {
            inner: Arc::new(MicrophoneInner {
                id,
                name,
                last_request: Mutex::new(Value::Null),
                bus,
                released: AtomicBool::new(false),
            }),
        }
    }
}

#[async_trait]
impl Device for Microphone {
    fn id(&self) -> &Id {
        &self.inner.id
    }

    fn name(&self) -> &str {
        &self.inner.name
    }

    fn kind(&self) -> ElementKind {
        ElementKind::Microphone
    }

    fn direction(&self) -> Direction {
        Direction::In
    }

    fn protocol(&self) -> Protocol {
        Protocol::I2s
    }

    fn value(&self) -> Value {
        self.inner.last_request.lock().unwrap().clone()
    }

    async fn invoke(&self, cmd: &str, arg: Option<&Value>) -> Result<Value> {
        if self.inner.released.load(Ordering::SeqCst) {
            return Err(DeviceError::NotConnected);
        }
        match cmd {
            "record" => {
                let mut request = std::collections::HashMap::new();
                request.insert("cmd".to_string(), Value::from("record"));
                if let Some(arg) = arg {
                    request.insert("arg".to_string(), arg.clone());
                }
                let value = Value::Object(request);
                *self.inner.last_request.lock().unwrap() = value.clone();
                let _ = self.inner.bus.publish(ChangeEvent::new(
                    self.inner.id.clone(),
                    "Microphone",
                    value.clone(),
                ));
                Ok(value)
            }
            "getValue" => Ok(self.value()),
            _ => Err(unknown_command(ElementKind::Microphone, cmd)),
        }
    }

    async fn release(&self) {
        if self.inner.released.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Device       releasing Microphone {}", self.inner.name);
    }

    fn api(&self) -> &'static [CommandSpec] {
        &[CommandSpec {
            cmd: "record",
            args: &[ArgSpec { name: "duration", meaning: "capture length in msecs" }],
            effect: "requests an audio capture",
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_speakers_forward_requests() {
        let bus = ChangeBus::new();
        let mut rx = bus.subscribe();
        let speakers = Speakers::new("sp1".into(), "desk".into(), "hw:0", bus);
        let value = speakers
            .invoke("play", Some(&Value::from("chime.wav")))
            .await
            .unwrap();
        assert!(matches!(value, Value::Object(_)));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, "Speakers");
    }

    #[tokio::test]
    async fn test_microphone_rejects_unknown() {
        let mic = Microphone::new("m1".into(), "desk".into(), ChangeBus::new());
        assert!(mic.invoke("play", None).await.is_err());
    }
}
