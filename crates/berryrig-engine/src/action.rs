/*!
 * The action data model.
 *
 * An action routes a command to one or more elements (or to the application
 * collaborator), optionally guarded by a value condition and optionally
 * deferred through the dispatcher's timer table. Actions are parsed once
 * from the hardware description and never mutated; every trigger
 * re-evaluates the same descriptor.
 */
use serde::{Deserialize, Serialize};

use berryrig_core::types::Value;

/// The reserved target id addressing the application collaborator
pub const APP_TARGET: &str = "app";

/// One or more target element ids
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Target {
    /// A single element id (or `"app"`)
    One(String),
    /// Several element ids
    Many(Vec<String>),
}

impl Target {
    /// The target ids in order
    pub fn ids(&self) -> Vec<&str> {
        match self {
            Target::One(id) => vec![id.as_str()],
            Target::Many(ids) => ids.iter().map(|s| s.as_str()).collect(),
        }
    }
}

impl From<&str> for Target {
    fn from(s: &str) -> Self {
        Target::One(s.to_string())
    }
}

impl From<Vec<&str>> for Target {
    fn from(ids: Vec<&str>) -> Self {
        Target::Many(ids.into_iter().map(|s| s.to_string()).collect())
    }
}

/// An indirect argument: read `elm`'s `cmd` result at fire time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArgQuery {
    /// Element to query
    pub elm: String,
    /// Command whose result becomes the argument
    pub cmd: String,
}

/// An action argument: a literal value, or a query resolved when the
/// action fires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionArg {
    /// Indirect argument (must be listed first so `{elm, cmd}` objects are
    /// recognized before the catch-all literal)
    Query(ArgQuery),
    /// Literal argument
    Literal(Value),
}

/// A directive routing a command to one or more elements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Target element id(s), or `"app"`
    pub elm: Target,
    /// Command to invoke on each target
    pub cmd: String,
    /// Argument passed to the command; the triggering value when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arg: Option<ActionArg>,
    /// Only execute when the target's current value equals this
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Value>,
    /// Schedule on a new, independent timer (msec)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<u64>,
    /// Schedule on the timer bound to (target, cmd) (msec)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
    /// With `delay`: keep an already-pending timer instead of replacing it
    #[serde(default)]
    pub once: bool,
    /// Cancel the pending (target, cmd) timer instead of invoking
    #[serde(default)]
    pub clear: bool,
}

impl Action {
    /// Create a direct action
    pub fn new<T: Into<Target>, S: Into<String>>(elm: T, cmd: S) -> Self {
        Self {
            elm: elm.into(),
            cmd: cmd.into(),
            arg: None,
            when: None,
            after: None,
            delay: None,
            once: false,
            clear: false,
        }
    }

    /// Set a literal argument
    pub fn with_arg<V: Into<Value>>(mut self, arg: V) -> Self {
        self.arg = Some(ActionArg::Literal(arg.into()));
        self
    }

    /// Set the value condition
    pub fn with_when<V: Into<Value>>(mut self, when: V) -> Self {
        self.when = Some(when.into());
        self
    }

    /// Schedule on an independent timer
    pub fn with_after(mut self, msec: u64) -> Self {
        self.after = Some(msec);
        self
    }

    /// Schedule on the element-bound timer
    pub fn with_delay(mut self, msec: u64) -> Self {
        self.delay = Some(msec);
        self
    }

    /// Suppress re-triggering while the delay timer is pending
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    /// Turn this into a clear directive
    pub fn clearing(mut self) -> Self {
        self.clear = true;
        self
    }
}

/// One action or a list of actions, as descriptions write them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionSet {
    /// A single action
    One(Action),
    /// Several actions, executed in order
    Many(Vec<Action>),
}

impl ActionSet {
    /// Iterate the contained actions in order
    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        match self {
            ActionSet::One(action) => std::slice::from_ref(action).iter(),
            ActionSet::Many(actions) => actions.iter(),
        }
    }

    /// Number of contained actions
    pub fn len(&self) -> usize {
        match self {
            ActionSet::One(_) => 1,
            ActionSet::Many(actions) => actions.len(),
        }
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_action() {
        let action: Action =
            serde_json::from_str(r#"{"elm": "l1", "cmd": "on"}"#).unwrap();
        assert_eq!(action.elm.ids(), vec!["l1"]);
        assert_eq!(action.cmd, "on");
        assert!(action.arg.is_none());
        assert!(!action.once);
        assert!(!action.clear);
    }

    #[test]
    fn test_parse_multi_target_and_fields() {
        let action: Action = serde_json::from_str(
            r#"{"elm": ["l1", "l2"], "cmd": "blink", "arg": {"cycles": 2}, "when": 0, "delay": 500, "once": true}"#,
        )
        .unwrap();
        assert_eq!(action.elm.ids(), vec!["l1", "l2"]);
        assert_eq!(action.when, Some(Value::Integer(0)));
        assert_eq!(action.delay, Some(500));
        assert!(action.once);
        assert!(matches!(action.arg, Some(ActionArg::Literal(Value::Object(_)))));
    }

    #[test]
    fn test_parse_query_arg() {
        let action: Action = serde_json::from_str(
            r#"{"elm": "display", "cmd": "println", "arg": {"elm": "t1", "cmd": "getValue"}}"#,
        )
        .unwrap();
        match action.arg {
            Some(ActionArg::Query(q)) => {
                assert_eq!(q.elm, "t1");
                assert_eq!(q.cmd, "getValue");
            }
            other => panic!("expected query arg, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_action_set_both_shapes() {
        let one: ActionSet = serde_json::from_str(r#"{"elm": "l1", "cmd": "on"}"#).unwrap();
        assert_eq!(one.len(), 1);

        let many: ActionSet = serde_json::from_str(
            r#"[{"elm": "l1", "cmd": "on"}, {"elm": "l2", "cmd": "off"}]"#,
        )
        .unwrap();
        assert_eq!(many.len(), 2);
        let cmds: Vec<&str> = many.iter().map(|a| a.cmd.as_str()).collect();
        assert_eq!(cmds, vec!["on", "off"]);
    }

    #[test]
    fn test_builder() {
        let action = Action::new("l1", "setValue")
            .with_arg(1)
            .with_when(0)
            .with_delay(250)
            .once();
        assert_eq!(action.delay, Some(250));
        assert_eq!(action.when, Some(Value::Integer(0)));
        assert!(action.once);
    }
}
