//! Component variables.
//!
//! A [`Var`] is what a component holds for one server-owned variable. The
//! shape is decided once, when the value enters the runtime: JSON primitives
//! become [`Var::Scalar`], arrays and objects become [`Var::Structured`], and
//! decoded component references become [`Var::Component`].

use std::collections::BTreeMap;

use serde_json::{Value, json};

use crate::ids::ComponentId;

/// Variables of one component keyed by name.
pub type VarMap = BTreeMap<String, Var>;

/// Key used in snapshots to mark a nested component reference.
pub const COMPONENT_MARKER: &str = "$component";

/// A component variable.
#[derive(Clone, Debug, PartialEq)]
pub enum Var {
    /// `null`, boolean, number, or string.
    Scalar(Value),
    /// Array or object.
    Structured(Value),
    /// Reference to another live component instance.
    Component(ComponentId),
}

impl Var {
    /// Classify a raw JSON value.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Array(_) | Value::Object(_) => Self::Structured(value),
            other => Self::Scalar(other),
        }
    }

    /// The `null` placeholder.
    pub fn null() -> Self {
        Self::Scalar(Value::Null)
    }

    /// The JSON value, unless this is a component reference.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Scalar(value) | Self::Structured(value) => Some(value),
            Self::Component(_) => None,
        }
    }

    /// The referenced component, if any.
    pub fn component_id(&self) -> Option<&ComponentId> {
        match self {
            Self::Component(id) => Some(id),
            Self::Scalar(_) | Self::Structured(_) => None,
        }
    }

    /// JSON form used for snapshots and diffing.
    ///
    /// Component references become `{"$component": "<id>"}` so a parent's
    /// snapshot never inlines a child's state.
    pub fn snapshot_value(&self) -> Value {
        match self {
            Self::Scalar(value) | Self::Structured(value) => value.clone(),
            Self::Component(id) => json!({ COMPONENT_MARKER: id.as_str() }),
        }
    }

    /// Whether two variables hold the same value.
    pub fn same_value(&self, other: &Var) -> bool {
        match (self, other) {
            (Self::Component(a), Self::Component(b)) => a == b,
            (Self::Component(_), _) | (_, Self::Component(_)) => false,
            (a, b) => match (a.as_value(), b.as_value()) {
                (Some(a), Some(b)) => same_value(a, b),
                _ => false,
            },
        }
    }
}

impl Default for Var {
    fn default() -> Self {
        Self::null()
    }
}

impl From<Value> for Var {
    fn from(value: Value) -> Self {
        Self::from_value(value)
    }
}

impl From<ComponentId> for Var {
    fn from(id: ComponentId) -> Self {
        Self::Component(id)
    }
}

/// Compare two JSON values the way the render diff does.
///
/// Primitives compare by equality; arrays and objects compare by canonical
/// serialized form (object keys are sorted), never by a structural walk.
pub fn same_value(a: &Value, b: &Value) -> bool {
    if is_primitive(a) && is_primitive(b) {
        return a == b;
    }
    canonical(a) == canonical(b)
}

/// Canonical serialized form of a JSON value.
pub fn canonical(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

fn is_primitive(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}
