/*!
 * The Berry runtime: the lifecycle façade the transport layer talks to.
 *
 * Ties one parsed [`Hardware`] to its dispatcher and an optional
 * application collaborator, and exposes the build/release/states/setup/
 * handle surface.
 */
use std::sync::Arc;

use tracing::info;

use berryrig_core::config::Config;
use berryrig_core::types::{Id, Value};

use crate::action::Action;
use crate::app::AppHandler;
use crate::error::Result;
use crate::hardware::{ElementState, Hardware, SetupSnapshot};

/// A hardware instance plus its application collaborator
#[derive(Debug)]
pub struct Berry {
    hardware: Hardware,
    app: Option<Arc<dyn AppHandler>>,
}

impl Berry {
    /// Parse a normalized hardware description using the configured
    /// validation and emulation settings
    pub fn from_description(text: &str, config: &Config) -> Result<Self> {
        let mut hardware = Hardware::parse(text, config.hardware.strict_validation)?;
        hardware.set_monitor_interval(config.hardware.monitor_interval_ms);
        if config.hardware.emulate {
            hardware.set_all("emulate", serde_json::Value::Bool(true));
        }
        Ok(Self {
            hardware,
            app: None,
        })
    }

    /// Wrap an already-parsed hardware
    pub fn new(hardware: Hardware) -> Self {
        Self {
            hardware,
            app: None,
        }
    }

    /// Register the application collaborator reachable via `elm: "app"`
    pub fn with_app(mut self, app: Arc<dyn AppHandler>) -> Self {
        self.hardware.dispatcher().set_app(app.clone());
        self.app = Some(app);
        self
    }

    /// The underlying hardware
    pub fn hardware(&self) -> &Hardware {
        &self.hardware
    }

    /// Build the device graph and start the application
    pub async fn build(&self, name: &str, version: &str) -> Result<()> {
        self.hardware.build(name, version).await?;
        if let Some(app) = &self.app {
            app.on_start().await?;
        }
        info!("Berry        {} {} is up", name, version);
        Ok(())
    }

    /// Stop the application and release the device graph
    pub async fn release(&self) {
        if let Some(app) = &self.app {
            if let Err(e) = app.on_stop().await {
                info!("Berry        app stop hook failed: {}", e);
            }
        }
        self.hardware.release().await;
        info!("Berry        released");
    }

    /// Current state of all observable elements
    pub fn all_states(&self) -> Vec<ElementState> {
        self.hardware.all_states()
    }

    /// Static setup snapshot including the pin cross reference
    pub fn setup(&self) -> SetupSnapshot {
        self.hardware.setup()
    }

    /// Dispatch one action on behalf of `source`
    pub async fn handle(&self, source: &Id, action: &Action, value: &Value) -> Result<()> {
        self.hardware.dispatcher().handle(source, action, value).await
    }

    /// Invoke a device command directly by element id
    pub async fn invoke(&self, id: &Id, cmd: &str, arg: Option<&Value>) -> Result<Value> {
        self.hardware.dispatcher().invoke(id, cmd, arg).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const DESCRIPTION: &str = r#"{
        "title": "Test rig",
        "type": "TestRig",
        "elms": [
            { "id": "panel", "type": "FrontPanel",
              "init": { "elm": "l1", "cmd": "off" } },
            { "id": "b1", "type": "Button", "gpio": 22,
              "down": { "elm": "l1", "cmd": "on" },
              "up":   { "elm": "l1", "cmd": "off" } },
            { "id": "l1", "type": "LED", "gpio": 17, "color": "red" },
            { "id": "t1", "type": "DS1820", "gpio": 4, "addresse": "28-0000075268f1",
              "above": { "value": 30, "elm": "l1", "cmd": "setValue" } },
            { "id": "pw1", "type": "PWDevice", "gpio": 18 }
        ]
    }"#;

    fn rig() -> Berry {
        let mut config = Config::default();
        config.hardware.emulate = true;
        Berry::from_description(DESCRIPTION, &config).unwrap()
    }

    async fn settle() {
        // let the event loop drain
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_button_drives_led() {
        let berry = rig();
        berry.build("test", "0.1.0").await.unwrap();

        berry
            .invoke(&"b1".into(), "press", Some(&Value::from("down")))
            .await
            .unwrap();
        settle().await;
        assert_eq!(
            berry.invoke(&"l1".into(), "getValue", None).await.unwrap(),
            Value::Integer(1)
        );

        berry
            .invoke(&"b1".into(), "press", Some(&Value::from("up")))
            .await
            .unwrap();
        settle().await;
        assert_eq!(
            berry.invoke(&"l1".into(), "getValue", None).await.unwrap(),
            Value::Integer(0)
        );

        berry.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_temperature_threshold_sets_led()
    {
        use berryrig_core::event::ChangeEvent;

        let berry = rig();
        berry.build("test", "0.1.0").await.unwrap();
        settle().await;

        // a hot reading switches the LED on through the above-monitor
        berry
            .hardware()
            .change_bus()
            .publish(ChangeEvent::new("t1".into(), "DS1820", Value::Float(35.2)))
            .unwrap();
        settle().await;
        assert_eq!(
            berry.invoke(&"l1".into(), "getValue", None).await.unwrap(),
            Value::Integer(1)
        );

        // a cool reading switches it back off
        berry
            .hardware()
            .change_bus()
            .publish(ChangeEvent::new("t1".into(), "DS1820", Value::Float(20.0)))
            .unwrap();
        settle().await;
        assert_eq!(
            berry.invoke(&"l1".into(), "getValue", None).await.unwrap(),
            Value::Integer(0)
        );

        berry.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_states_skips_stateless_elements() {
        let berry = rig();
        berry.build("test", "0.1.0").await.unwrap();

        let states = berry.all_states();
        let ids: Vec<&str> = states.iter().map(|s| s.id.as_str()).collect();
        // panel has no state, b1 is a plain input; LED, sensor and PWM report
        assert_eq!(ids, vec!["l1", "t1", "pw1"]);

        berry.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_snapshot_pins() {
        let berry = rig();
        berry.build("test", "0.1.0").await.unwrap();

        let setup = berry.setup();
        assert_eq!(setup.pins.len(), 41);
        assert_eq!(setup.pins[0].signal, "");

        // LED at gpio 17 sits on physical pin 11
        let pin11 = &setup.pins[11];
        assert_eq!(pin11.kind.as_deref(), Some("LED"));
        assert_eq!(pin11.gpio, Some(17));
        assert_eq!(setup.gpios.get(&17).unwrap().pin, Some(11));

        // unclaimed pins keep their static signal
        assert_eq!(setup.pins[1].signal, "+3V3");
        assert!(setup.pins[1].kind.is_none());

        assert_eq!(setup.setup.name.as_deref(), Some("test"));
        assert!(setup.setup.elms.contains_key("b1"));

        berry.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_disconnects_devices() {
        let berry = rig();
        berry.build("test", "0.1.0").await.unwrap();
        berry.release().await;

        assert!(berry.all_states().is_empty());
        assert!(berry.invoke(&"l1".into(), "on", None).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_build_rejected() {
        let berry = rig();
        berry.build("test", "0.1.0").await.unwrap();
        assert!(berry.build("test", "0.1.0").await.is_err());
        berry.release().await;
    }
}
