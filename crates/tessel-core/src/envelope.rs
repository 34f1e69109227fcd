//! Variable envelopes.
//!
//! The wire and storage form of a variable is either a raw JSON value or a
//! tagged component reference:
//!
//! ```json
//! {"type": "component", "mode": "SERVER", "component": "widget", "id": "1", "vars": {...}}
//! ```
//!
//! Decoding is untagged: only objects whose `type` is `"component"` and that
//! carry the reference fields decode as [`ComponentRef`]. References nested
//! inside arrays or plain objects stay raw.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::ComponentId;
use crate::mode::Mode;

/// The `"type": "component"` marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentTag {
    /// A component payload or reference.
    #[serde(rename = "component")]
    Component,
}

/// A reference to a component together with its server-owned variables.
///
/// Used both as a variable envelope and as the component payload of an
/// exchange request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComponentRef {
    /// Always `"component"`.
    #[serde(rename = "type")]
    pub kind: ComponentTag,
    /// Mode the reference was produced under.
    #[serde(default)]
    pub mode: Mode,
    /// Component name.
    pub component: String,
    /// Optional instance disambiguator.
    #[serde(default)]
    pub id: Option<String>,
    /// Server-owned variables, recursively encoded.
    #[serde(default)]
    pub vars: BTreeMap<String, Envelope>,
}

impl ComponentRef {
    /// Build a reference.
    pub fn new(
        mode: Mode,
        component: impl Into<String>,
        id: Option<String>,
        vars: BTreeMap<String, Envelope>,
    ) -> Self {
        Self {
            kind: ComponentTag::Component,
            mode,
            component: component.into(),
            id,
            vars,
        }
    }

    /// The component id this reference resolves to.
    pub fn component_id(&self) -> ComponentId {
        ComponentId::new(&self.component, self.id.as_deref())
    }

    /// The variables as raw JSON values (references re-encoded).
    pub fn vars_as_values(&self) -> serde_json::Map<String, Value> {
        self.vars
            .iter()
            .map(|(key, envelope)| (key.clone(), envelope.to_value()))
            .collect()
    }
}

/// Wire/storage form of one variable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Envelope {
    /// Tagged component reference.
    Component(ComponentRef),
    /// Any other JSON value.
    Raw(Value),
}

impl Envelope {
    /// Decode a raw JSON value.
    pub fn from_value(value: Value) -> Self {
        if value.get("type").and_then(Value::as_str) != Some("component") {
            return Self::Raw(value);
        }
        match serde_json::from_value::<ComponentRef>(value.clone()) {
            Ok(reference) => Self::Component(reference),
            Err(_) => Self::Raw(value),
        }
    }

    /// Encode back into JSON.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Raw(value) => value.clone(),
            Self::Component(reference) => {
                serde_json::to_value(reference).unwrap_or(Value::Null)
            }
        }
    }

    /// The component reference, if this envelope is one.
    pub fn as_component(&self) -> Option<&ComponentRef> {
        match self {
            Self::Component(reference) => Some(reference),
            Self::Raw(_) => None,
        }
    }
}

impl From<Value> for Envelope {
    fn from(value: Value) -> Self {
        Self::from_value(value)
    }
}
