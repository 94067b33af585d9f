/*!
 * Virtual character display shown on the front panel.
 */
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::info;

use berryrig_core::event::{ChangeBus, ChangeEvent};
use berryrig_core::types::{Id, Value};

use crate::device::{
    unknown_command, ArgSpec, CommandSpec, Device, DeviceError, Direction, ElementKind, Result,
};

#[derive(Debug)]
struct DisplayInner {
    id: Id,
    name: String,
    x_dim: usize,
    y_dim: usize,
    contents: Mutex<DisplayContents>,
    bus: ChangeBus,
    released: AtomicBool,
}

#[derive(Debug)]
struct DisplayContents {
    lines: Vec<String>,
    y_pos: usize,
}

/// A character display of `x_dim` columns and `y_dim` lines
#[derive(Debug)]
pub struct Display {
    inner: Arc<DisplayInner>,
}

impl Display {
    /// Create a display
    pub fn new(id: Id, name: String, x_dim: usize, y_dim: usize, bus: ChangeBus) -> Self {
        Self {
            inner: Arc::new(DisplayInner {
                id,
                name,
                x_dim,
                y_dim,
                contents: Mutex::new(DisplayContents {
                    lines: vec![String::new(); y_dim],
                    y_pos: 0,
                }),
                bus,
                released: AtomicBool::new(false),
            }),
        }
    }

    /// Append one line of text, scrolling when the display is full.
    /// Horizontal overflow is cut off.
    pub fn println(&self, text: &str) {
        let value = {
            let mut contents = self.inner.contents.lock().unwrap();
            let line: String = text.chars().take(self.inner.x_dim).collect();
            if contents.y_pos >= self.inner.y_dim {
                // full: scroll up, keep writing on the last line
                contents.lines.remove(0);
                contents.lines.push(line);
            } else {
                let y = contents.y_pos;
                contents.lines[y] = line;
                contents.y_pos += 1;
            }
            Value::Array(contents.lines.iter().map(|l| Value::from(l.clone())).collect())
        };
        let _ = self
            .inner
            .bus
            .publish(ChangeEvent::new(self.inner.id.clone(), "Display", value));
    }

    /// Clear all lines
    pub fn clear(&self) {
        let mut contents = self.inner.contents.lock().unwrap();
        for line in contents.lines.iter_mut() {
            line.clear();
        }
        contents.y_pos = 0;
    }
}

#[async_trait]
impl Device for Display {
    fn id(&self) -> &Id {
        &self.inner.id
    }

    fn name(&self) -> &str {
        &self.inner.name
    }

    fn kind(&self) -> ElementKind {
        ElementKind::Display
    }

    fn direction(&self) -> Direction {
        Direction::Out
    }

    fn value(&self) -> Value {
        let contents = self.inner.contents.lock().unwrap();
        Value::Array(contents.lines.iter().map(|l| Value::from(l.clone())).collect())
    }

    async fn invoke(&self, cmd: &str, arg: Option<&Value>) -> Result<Value> {
        if self.inner.released.load(Ordering::SeqCst) {
            return Err(DeviceError::NotConnected);
        }
        match cmd {
            "println" | "setValue" => {
                let text = arg.map(|v| v.to_string()).unwrap_or_default();
                self.println(&text);
                Ok(self.value())
            }
            "clear" => {
                self.clear();
                Ok(Value::Null)
            }
            "getValue" => Ok(self.value()),
            _ => Err(unknown_command(ElementKind::Display, cmd)),
        }
    }

    async fn release(&self) {
        if self.inner.released.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Device       releasing Display {}", self.inner.name);
    }

    fn api(&self) -> &'static [CommandSpec] {
        &[
            CommandSpec {
                cmd: "getValue",
                args: &[],
                effect: "returns the current contents of the display (array of text lines)",
            },
            CommandSpec {
                cmd: "println",
                args: &[ArgSpec { name: "text", meaning: "text line" }],
                effect: "appends one line of text",
            },
            CommandSpec { cmd: "clear", args: &[], effect: "clears the display" },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_println_truncates_and_scrolls() {
        let display = Display::new("d1".into(), "panel".into(), 5, 2, ChangeBus::new());
        display.println("hello world");
        assert_eq!(
            display.value(),
            Value::Array(vec![Value::from("hello"), Value::from("")])
        );
        display.println("two");
        display.println("three");
        // first line scrolled out
        match display.value() {
            Value::Array(lines) => {
                assert_eq!(lines[0], Value::from("two"));
                assert_eq!(lines[1], Value::from("three"));
            }
            other => panic!("unexpected value {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_clear() {
        let display = Display::new("d1".into(), "panel".into(), 10, 2, ChangeBus::new());
        display.println("text");
        display.clear();
        assert_eq!(
            display.value(),
            Value::Array(vec![Value::from(""), Value::from("")])
        );
    }
}
