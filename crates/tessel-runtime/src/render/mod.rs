//! Rendering collaborator.

mod markup;

use std::collections::BTreeMap;

use serde_json::Value;
use tessel_core::ComponentId;

use crate::cache::Template;
use crate::errors::RenderError;
use crate::surface::Container;

pub use markup::MarkupRenderer;

/// A variable as seen by rendering.
///
/// Nested component instances are passed by reference so a parent's markup
/// never inlines a child's state.
#[derive(Clone, Debug, PartialEq)]
pub enum RenderValue {
    /// Plain JSON value.
    Value(Value),
    /// Placeholder for a nested component.
    Placeholder(ComponentId),
}

/// Maps a template plus variables to markup inside a container.
pub trait Renderer {
    /// Full render of a component into its container.
    fn render(
        &self,
        container: &dyn Container,
        component_id: &ComponentId,
        template: &Template,
        vars: &BTreeMap<String, RenderValue>,
        constants: &Value,
    ) -> Result<(), RenderError>;

    /// Rewrite a single rune slot.
    fn render_slot(&self, slot: &dyn Container, value: &RenderValue) -> Result<(), RenderError>;
}
