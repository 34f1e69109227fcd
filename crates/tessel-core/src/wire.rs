//! Exchange request/response types carried by the transport.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::envelope::ComponentRef;

/// The `"type": "request"` marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestTag {
    /// An exchange request.
    #[serde(rename = "request")]
    Request,
}

/// Asks the remote store for a template if its version differs from `version`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateProbe {
    /// Component name.
    pub component: String,
    /// Locally known version (empty when unknown).
    pub version: String,
}

/// A request exchanged with the remote store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRequest {
    /// Always `"request"`.
    #[serde(rename = "type")]
    pub kind: RequestTag,
    /// Component payloads.
    pub components: Vec<ComponentRef>,
    /// Template version probes.
    pub templates: Vec<TemplateProbe>,
}

impl ExchangeRequest {
    /// Build a request.
    pub fn new(components: Vec<ComponentRef>, templates: Vec<TemplateProbe>) -> Self {
        Self {
            kind: RequestTag::Request,
            components,
            templates,
        }
    }

    /// A request that only probes templates.
    pub fn templates_only(templates: Vec<TemplateProbe>) -> Self {
        Self::new(Vec::new(), templates)
    }
}

/// One component in a response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseComponent {
    /// Component name.
    pub component: String,
    /// Authoritative instance id.
    #[serde(default)]
    pub id: Option<String>,
    /// Authoritative server-owned variables (envelopes in JSON form).
    #[serde(default)]
    pub vars: Map<String, Value>,
    /// Template version the variables belong to.
    #[serde(default)]
    pub version: String,
    /// Declared server-owned keys, in order. Defaults to the keys of `vars`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<String>>,
    /// Fully rendered markup (SSR responses).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

impl ResponseComponent {
    /// Server-declared variable keys.
    pub fn declared_keys(&self) -> Vec<String> {
        self.keys
            .clone()
            .unwrap_or_else(|| self.vars.keys().cloned().collect())
    }
}

/// Template as delivered by the remote store or the static location.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplatePayload {
    /// Component name.
    pub component: String,
    /// Template version.
    pub version: String,
    /// Behavior payload.
    #[serde(default)]
    pub js_code: String,
    /// Stylesheet.
    #[serde(default)]
    pub css_code: String,
    /// Markup, before normalization.
    #[serde(default)]
    pub html_code: String,
}

/// A response from the remote store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangeResponse {
    /// Must be `"response"`; checked by the transport.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Component results.
    #[serde(default)]
    pub components: Vec<ResponseComponent>,
    /// Templates whose probe version was stale.
    #[serde(default)]
    pub templates: Vec<TemplatePayload>,
}

impl ExchangeResponse {
    /// Value of the `type` marker on a valid response.
    pub const MARKER: &'static str = "response";

    /// Build a marked response.
    pub fn new(components: Vec<ResponseComponent>, templates: Vec<TemplatePayload>) -> Self {
        Self {
            kind: Some(Self::MARKER.to_owned()),
            components,
            templates,
        }
    }

    /// Whether the `type: response` marker is present.
    pub fn has_marker(&self) -> bool {
        self.kind.as_deref() == Some(Self::MARKER)
    }

    /// The first component result with the given name.
    pub fn component(&self, name: &str) -> Option<&ResponseComponent> {
        self.components.iter().find(|c| c.component == name)
    }
}
