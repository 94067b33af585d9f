/*!
 * Virtual text input area on the front panel.
 */
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info};

use berryrig_core::event::{ChangeBus, ChangeEvent};
use berryrig_core::types::{Id, Value};

use crate::device::{
    unknown_command, ArgSpec, CommandSpec, Device, DeviceError, Direction, ElementKind, Result,
};

#[derive(Debug)]
struct TextInputInner {
    id: Id,
    name: String,
    cols: usize,
    rows: usize,
    contents: Mutex<String>,
    bus: ChangeBus,
    released: AtomicBool,
}

/// A rectangular text input area of `cols` x `rows` characters
#[derive(Debug)]
pub struct TextInput {
    inner: Arc<TextInputInner>,
}

impl TextInput {
    /// Create a text input area
    pub fn new(id: Id, name: String, cols: usize, rows: usize, bus: ChangeBus) -> Self {
        info!("TextInput    creating field: {} x {}", cols, rows);
        Self {
            inner: Arc::new(TextInputInner {
                id,
                name,
                cols,
                rows,
                contents: Mutex::new(String::new()),
                bus,
                released: AtomicBool::new(false),
            }),
        }
    }

    /// The configured dimensions
    pub fn dimensions(&self) -> (usize, usize) {
        (self.inner.cols, self.inner.rows)
    }

    /// Replace the contents; any `changed` action set attached to the
    /// element fires through the engine's event loop
    pub fn set_value(&self, text: &str) {
        debug!("TextInput    {} setValue: {}", self.inner.id, text);
        *self.inner.contents.lock().unwrap() = text.to_string();
        let _ = self.inner.bus.publish(ChangeEvent::new(
            self.inner.id.clone(),
            "TextInput",
            Value::from(text),
        ));
    }

    /// Clear the contents
    pub fn clear(&self) {
        self.set_value("");
    }
}

#[async_trait]
impl Device for TextInput {
    fn id(&self) -> &Id {
        &self.inner.id
    }

    fn name(&self) -> &str {
        &self.inner.name
    }

    fn kind(&self) -> ElementKind {
        ElementKind::TextInput
    }

    fn direction(&self) -> Direction {
        Direction::In
    }

    fn value(&self) -> Value {
        Value::from(self.inner.contents.lock().unwrap().clone())
    }

    async fn invoke(&self, cmd: &str, arg: Option<&Value>) -> Result<Value> {
        if self.inner.released.load(Ordering::SeqCst) {
            return Err(DeviceError::NotConnected);
        }
        match cmd {
            "setValue" => {
                let text = arg.map(|v| v.to_string()).unwrap_or_default();
                self.set_value(&text);
                Ok(self.value())
            }
            "clear" => {
                self.clear();
                Ok(Value::Null)
            }
            "getValue" => Ok(self.value()),
            _ => Err(unknown_command(ElementKind::TextInput, cmd)),
        }
    }

    async fn release(&self) {
        if self.inner.released.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Device       releasing TextInput {}", self.inner.name);
    }

    fn api(&self) -> &'static [CommandSpec] {
        &[CommandSpec {
            cmd: "setValue",
            args: &[ArgSpec { name: "val", meaning: "a line of text" }],
            effect: "simulates a text input",
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_value_publishes() {
        let bus = ChangeBus::new();
        let mut rx = bus.subscribe();
        let input = TextInput::new("in1".into(), "command".into(), 20, 1, bus);
        input.set_value("hello");
        assert_eq!(input.value(), Value::from("hello"));
        assert_eq!(rx.recv().await.unwrap().value, Value::from("hello"));
        input.clear();
        assert_eq!(input.value(), Value::from(""));
    }
}
