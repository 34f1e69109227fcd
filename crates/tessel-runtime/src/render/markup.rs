//! String-template renderer.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;
use tessel_core::ComponentId;
use tracing::trace;

use super::{RenderValue, Renderer};
use crate::cache::{Template, pattern};
use crate::errors::RenderError;
use crate::surface::{Container, component_placeholder};

/// A rune slot (group 1) or a `{{ name }}` expression (group 2). Both are
/// matched in one pass so substituted text is never scanned again.
static TOKEN: LazyLock<std::result::Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r#"<rune data-var="([^"]*)"></rune>|\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}"#)
});

/// Renders normalized template markup.
///
/// - rune slots get the escaped value as their text
/// - `{{ name }}` expressions are replaced by the escaped variable, falling
///   back to a constant of the same name, else nothing
/// - component-valued variables become placeholders
/// - a non-empty stylesheet is prefixed as a `<style>` block
///
/// Other `{{ … }}` expressions are left in place.
#[derive(Clone, Copy, Debug, Default)]
pub struct MarkupRenderer;

impl MarkupRenderer {
    /// Create a renderer.
    pub fn new() -> Self {
        Self
    }

    /// Produce the markup without touching a container.
    pub fn to_markup(
        &self,
        template: &Template,
        vars: &BTreeMap<String, RenderValue>,
        constants: &Value,
    ) -> Result<String, RenderError> {
        check_balanced(template)?;

        let body = pattern(&TOKEN)?.replace_all(&template.html_code, |caps: &Captures<'_>| {
            if let Some(key) = caps.get(1).map(|m| m.as_str()) {
                return match vars.get(key) {
                    Some(RenderValue::Placeholder(id)) => component_placeholder(id),
                    Some(RenderValue::Value(value)) => {
                        format!(r#"<rune data-var="{key}">{}</rune>"#, escape(&text_of(value)))
                    }
                    None => format!(r#"<rune data-var="{key}"></rune>"#),
                };
            }
            let name = &caps[2];
            match vars.get(name) {
                Some(RenderValue::Placeholder(id)) => component_placeholder(id),
                Some(RenderValue::Value(value)) => escape(&text_of(value)),
                None => constants
                    .get(name)
                    .map(|value| escape(&text_of(value)))
                    .unwrap_or_default(),
            }
        });

        if template.css_code.trim().is_empty() {
            Ok(body.into_owned())
        } else {
            Ok(format!("<style>{}</style>{body}", template.css_code))
        }
    }
}

impl Renderer for MarkupRenderer {
    fn render(
        &self,
        container: &dyn Container,
        component_id: &ComponentId,
        template: &Template,
        vars: &BTreeMap<String, RenderValue>,
        constants: &Value,
    ) -> Result<(), RenderError> {
        let markup = self.to_markup(template, vars, constants)?;
        trace!(%component_id, bytes = markup.len(), "full render");
        container.replace_content(&markup)
    }

    fn render_slot(&self, slot: &dyn Container, value: &RenderValue) -> Result<(), RenderError> {
        match value {
            RenderValue::Value(value) => slot.replace_content(&escape(&text_of(value))),
            RenderValue::Placeholder(id) => slot.replace_content(&component_placeholder(id)),
        }
    }
}

fn check_balanced(template: &Template) -> Result<(), RenderError> {
    let html = &template.html_code;
    let mut rest = html.as_str();
    while let Some(open) = rest.find("{{") {
        let Some(close) = rest[open + 2..].find("}}") else {
            return Err(RenderError::MalformedTemplate {
                component: template.component.clone(),
                message: format!("unclosed expression at byte {}", html.len() - rest.len() + open),
            });
        };
        rest = &rest[open + 2 + close + 2..];
    }
    Ok(())
}

fn text_of(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Escape text for HTML content and attribute values.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
