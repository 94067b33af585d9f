/*!
 * The action-dispatch engine.
 *
 * `handle` interprets one action descriptor against one triggering value:
 * target resolution, the `when` value guard, `clear`/`after`/`delay`
 * semantics and finally the command invocation. The per-(element, command)
 * timer table is owned by the dispatcher instance and guarded by a single
 * mutex; clear, replace and fire are serialized through it.
 */
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use berryrig_core::types::{Id, Value};
use berryrig_devices::registry::SharedDeviceRegistry;

use crate::action::{Action, ActionArg, APP_TARGET};
use crate::app::AppHandler;
use crate::error::{Error, Result};

/// Timers are keyed by target element and command; at most one timer is
/// live per key.
type TimerKey = (Id, String);

#[derive(Debug)]
struct TimerEntry {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Debug)]
struct DispatcherInner {
    devices: SharedDeviceRegistry,
    app: RwLock<Option<Arc<dyn AppHandler>>>,
    timers: Mutex<HashMap<TimerKey, TimerEntry>>,
    generation: AtomicU64,
}

/// The action-dispatch engine
#[derive(Debug, Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    /// Create a dispatcher over a device registry
    pub fn new(devices: SharedDeviceRegistry) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                devices,
                app: RwLock::new(None),
                timers: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Register the application collaborator addressed by `elm: "app"`
    pub fn set_app(&self, app: Arc<dyn AppHandler>) {
        *self.inner.app.write().unwrap() = Some(app);
    }

    /// Number of pending element-bound timers
    pub fn pending_timers(&self) -> usize {
        self.inner.timers.lock().unwrap().len()
    }

    /// Interpret one action triggered by `source` with the given current
    /// value.
    ///
    /// Every target of a multi-target action is processed even when an
    /// earlier one fails; the first error is returned after the loop so the
    /// transport layer can report it.
    pub async fn handle(&self, source: &Id, action: &Action, current: &Value) -> Result<()> {
        let mut first_error = None;
        for target in action.elm.ids() {
            if let Err(e) = self.handle_target(source, target, action, current).await {
                error!(
                    "dispatch {} -> {}.{}: {}",
                    source, target, action.cmd, e
                );
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    async fn handle_target(
        &self,
        source: &Id,
        target: &str,
        action: &Action,
        current: &Value,
    ) -> Result<()> {
        let target_id = Id::from(target);
        let is_app = target == APP_TARGET;

        // resolve before any timer side effect
        if !is_app && !self.inner.devices.contains(&target_id) {
            return Err(Error::unknown_element(target));
        }

        // value guard; a mismatch skips this target without touching timers
        if let Some(when) = &action.when {
            if !is_app {
                let value = self
                    .inner
                    .devices
                    .get(&target_id)
                    .map(|d| d.value())
                    .unwrap_or(Value::Null);
                if !value.loosely_eq(when) {
                    trace!(
                        "skipping {}.{}: value {} != when {}",
                        target,
                        action.cmd,
                        value,
                        when
                    );
                    return Ok(());
                }
            }
        }

        let key: TimerKey = (target_id.clone(), action.cmd.clone());

        if action.clear {
            // absence of a timer is a silent no-op
            if let Some(entry) = self.inner.timers.lock().unwrap().remove(&key) {
                entry.handle.abort();
                debug!("cleared timer {}.{}", key.0, key.1);
            }
            return Ok(());
        }

        if let Some(after) = action.after {
            // an isolated timer, independent of the keyed table
            let inner = self.inner.clone();
            let source = source.clone();
            let action = action.clone();
            let current = current.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(after)).await;
                if let Err(e) = invoke_one(&inner, &source, &target_id, &action, &current).await {
                    error!("after-timer {}.{} failed: {}", target_id, action.cmd, e);
                }
            });
            return Ok(());
        }

        if let Some(delay) = action.delay {
            let mut timers = self.inner.timers.lock().unwrap();
            if timers.contains_key(&key) {
                if action.once {
                    // once-timers suppress further triggering entirely
                    trace!("once-timer {}.{} pending, trigger ignored", key.0, key.1);
                    return Ok(());
                }
                // normal timers: the window restarts with the new settings
                if let Some(entry) = timers.remove(&key) {
                    entry.handle.abort();
                }
            }

            let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
            let inner = self.inner.clone();
            let source = source.clone();
            let action = action.clone();
            let current = current.clone();
            let fire_key = key.clone();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                if let Err(e) =
                    invoke_one(&inner, &source, &fire_key.0, &action, &current).await
                {
                    error!("delay-timer {}.{} failed: {}", fire_key.0, fire_key.1, e);
                }
                // remove our own entry unless a newer timer replaced it
                let mut timers = inner.timers.lock().unwrap();
                if timers.get(&fire_key).map(|e| e.generation) == Some(generation) {
                    timers.remove(&fire_key);
                }
            });
            timers.insert(key, TimerEntry { generation, handle });
            return Ok(());
        }

        // no timer fields: invoke synchronously
        invoke_one(&self.inner, source, &target_id, action, current)
            .await
            .map(|_| ())
    }

    /// Invoke a command on a device or the app directly, outside of any
    /// action timer logic (used for per-device API calls from the
    /// transport layer)
    pub async fn invoke(&self, id: &Id, cmd: &str, arg: Option<&Value>) -> Result<Value> {
        let device = self
            .inner
            .devices
            .get(id)
            .ok_or_else(|| Error::unknown_element(id.as_str()))?;
        Ok(device.invoke(cmd, arg).await?)
    }
}

/// Resolve the argument an invocation should carry: the literal argument,
/// the result of an indirect query, or the triggering value.
async fn resolve_arg(inner: &Arc<DispatcherInner>, action: &Action, current: &Value) -> Value {
    match &action.arg {
        None => current.clone(),
        Some(ActionArg::Literal(v)) => v.clone(),
        Some(ActionArg::Query(q)) => {
            let id = Id::from(q.elm.as_str());
            match inner.devices.get(&id) {
                Some(device) => device.invoke(&q.cmd, None).await.unwrap_or(Value::Null),
                None => {
                    warn!("arg query references unknown element '{}'", q.elm);
                    Value::Null
                }
            }
        }
    }
}

async fn invoke_one(
    inner: &Arc<DispatcherInner>,
    source: &Id,
    target: &Id,
    action: &Action,
    current: &Value,
) -> Result<Value> {
    let arg = resolve_arg(inner, action, current).await;
    if target.as_str() == APP_TARGET {
        let app = inner
            .app
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::dispatch("no application collaborator registered"))?;
        app.call(&action.cmd, source, &arg, action).await
    } else {
        let device = inner
            .devices
            .get(target)
            .ok_or_else(|| Error::unknown_element(target.as_str()))?;
        Ok(device.invoke(&action.cmd, Some(&arg)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    use berryrig_core::event::ChangeBus;
    use berryrig_devices::devices::{Led, TextInput};
    use berryrig_devices::DeviceError;

    fn setup() -> (Dispatcher, SharedDeviceRegistry) {
        let registry = SharedDeviceRegistry::new();
        registry
            .register(Arc::new(Led::emulated(
                "l1".into(),
                "led 1".into(),
                "red",
                17,
                ChangeBus::new(),
            )))
            .unwrap();
        registry
            .register(Arc::new(TextInput::new(
                "t1".into(),
                "input".into(),
                20,
                1,
                ChangeBus::new(),
            )))
            .unwrap();
        (Dispatcher::new(registry.clone()), registry)
    }

    fn text_value(registry: &SharedDeviceRegistry) -> Value {
        registry.get(&"t1".into()).unwrap().value()
    }

    #[tokio::test]
    async fn test_direct_invocation_passes_arg() {
        let (dispatcher, registry) = setup();
        let action = Action::new("t1", "setValue").with_arg("hello");
        dispatcher
            .handle(&"src".into(), &action, &Value::Null)
            .await
            .unwrap();
        assert_eq!(text_value(&registry), Value::from("hello"));
    }

    #[tokio::test]
    async fn test_direct_invocation_falls_back_to_current_value() {
        let (dispatcher, registry) = setup();
        let action = Action::new("t1", "setValue");
        dispatcher
            .handle(&"src".into(), &action, &Value::from("current"))
            .await
            .unwrap();
        assert_eq!(text_value(&registry), Value::from("current"));
    }

    #[tokio::test]
    async fn test_when_guard_blocks_on_mismatch() {
        let (dispatcher, registry) = setup();
        // l1 is off (0); when: 1 must block
        let blocked = Action::new("l1", "on").with_when(1);
        dispatcher
            .handle(&"src".into(), &blocked, &Value::Null)
            .await
            .unwrap();
        assert_eq!(
            registry.get(&"l1".into()).unwrap().value(),
            Value::Integer(0)
        );

        // when: 0 matches and executes
        let allowed = Action::new("l1", "on").with_when(0);
        dispatcher
            .handle(&"src".into(), &allowed, &Value::Null)
            .await
            .unwrap();
        assert_eq!(
            registry.get(&"l1".into()).unwrap().value(),
            Value::Integer(1)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_coalesces_to_second_trigger() {
        let (dispatcher, registry) = setup();
        let source: Id = "src".into();

        let first = Action::new("t1", "setValue").with_arg("first").with_delay(100);
        dispatcher.handle(&source, &first, &Value::Null).await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        let second = Action::new("t1", "setValue").with_arg("second").with_delay(100);
        dispatcher.handle(&source, &second, &Value::Null).await.unwrap();

        // 60 + 70 = 130 ms: past the first deadline, before the second
        tokio::time::sleep(Duration::from_millis(70)).await;
        assert_eq!(text_value(&registry), Value::from(""));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(text_value(&registry), Value::from("second"));
        assert_eq!(dispatcher.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_once_suppresses_second_trigger() {
        let (dispatcher, registry) = setup();
        let source: Id = "src".into();

        let first = Action::new("t1", "setValue")
            .with_arg("first")
            .with_delay(100)
            .once();
        dispatcher.handle(&source, &first, &Value::Null).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = Action::new("t1", "setValue")
            .with_arg("second")
            .with_delay(100)
            .once();
        dispatcher.handle(&source, &second, &Value::Null).await.unwrap();

        // fires at the original 100 ms with the original argument
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(text_value(&registry), Value::from("first"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(text_value(&registry), Value::from("first"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_cancels_pending_timer() {
        let (dispatcher, registry) = setup();
        let source: Id = "src".into();

        let delayed = Action::new("t1", "setValue").with_arg("late").with_delay(100);
        dispatcher.handle(&source, &delayed, &Value::Null).await.unwrap();
        assert_eq!(dispatcher.pending_timers(), 1);

        let clear = Action::new("t1", "setValue").clearing();
        dispatcher.handle(&source, &clear, &Value::Null).await.unwrap();
        assert_eq!(dispatcher.pending_timers(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(text_value(&registry), Value::from(""));

        // clear without a pending timer is a silent no-op
        dispatcher.handle(&source, &clear, &Value::Null).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_after_timers_are_independent() {
        let (dispatcher, registry) = setup();
        let source: Id = "src".into();

        // two after-timers for the same key coexist
        let a = Action::new("l1", "toggle").with_after(50);
        dispatcher.handle(&source, &a, &Value::Null).await.unwrap();
        dispatcher.handle(&source, &a, &Value::Null).await.unwrap();
        assert_eq!(dispatcher.pending_timers(), 0, "after-timers are not tabled");

        tokio::time::sleep(Duration::from_millis(100)).await;
        // both fired: toggled twice, back to off
        assert_eq!(
            registry.get(&"l1".into()).unwrap().value(),
            Value::Integer(0)
        );
    }

    #[tokio::test]
    async fn test_unknown_target_continues_with_siblings() {
        let (dispatcher, registry) = setup();
        let action = Action::new(vec!["ghost", "l1"], "on");
        let result = dispatcher.handle(&"src".into(), &action, &Value::Null).await;
        assert!(matches!(result, Err(Error::UnknownElement(_))));
        // the sibling still executed
        assert_eq!(
            registry.get(&"l1".into()).unwrap().value(),
            Value::Integer(1)
        );
    }

    #[tokio::test]
    async fn test_unknown_command_propagates() {
        let (dispatcher, _) = setup();
        let action = Action::new("l1", "levitate");
        let result = dispatcher.handle(&"src".into(), &action, &Value::Null).await;
        assert!(matches!(
            result,
            Err(Error::Device(DeviceError::UnknownCommand { .. }))
        ));
    }

    #[derive(Debug, Default)]
    struct RecordingApp {
        calls: Mutex<Vec<(String, Value)>>,
        starts: AtomicUsize,
    }

    #[async_trait]
    impl AppHandler for RecordingApp {
        async fn on_start(&self) -> Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn call(
            &self,
            method: &str,
            _source: &Id,
            value: &Value,
            _action: &Action,
        ) -> Result<Value> {
            self.calls
                .lock()
                .unwrap()
                .push((method.to_string(), value.clone()));
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn test_app_target_routes_to_handler() {
        let (dispatcher, _) = setup();
        let app = Arc::new(RecordingApp::default());
        dispatcher.set_app(app.clone());

        let action = Action::new(APP_TARGET, "notify");
        dispatcher
            .handle(&"b1".into(), &action, &Value::Integer(2))
            .await
            .unwrap();

        let calls = app.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "notify");
        assert_eq!(calls[0].1, Value::Integer(2));
    }

    #[tokio::test]
    async fn test_app_target_without_handler_fails() {
        let (dispatcher, _) = setup();
        let action = Action::new(APP_TARGET, "notify");
        let result = dispatcher.handle(&"b1".into(), &action, &Value::Null).await;
        assert!(matches!(result, Err(Error::Dispatch(_))));
    }

    #[tokio::test]
    async fn test_query_arg_resolved_at_fire_time() {
        let (dispatcher, registry) = setup();
        registry
            .get(&"t1".into())
            .unwrap()
            .invoke("setValue", Some(&Value::from("queried")))
            .await
            .unwrap();

        let display = Arc::new(berryrig_devices::devices::Display::new(
            "d1".into(),
            "panel".into(),
            20,
            2,
            ChangeBus::new(),
        ));
        registry.register(display).unwrap();

        let action: Action = serde_json::from_str(
            r#"{"elm": "d1", "cmd": "println", "arg": {"elm": "t1", "cmd": "getValue"}}"#,
        )
        .unwrap();
        dispatcher.handle(&"src".into(), &action, &Value::Null).await.unwrap();

        match registry.get(&"d1".into()).unwrap().value() {
            Value::Array(lines) => assert_eq!(lines[0], Value::from("queried")),
            other => panic!("unexpected display value {:?}", other),
        }
    }
}
