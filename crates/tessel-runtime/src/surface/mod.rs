//! UI container collaborator.

mod memory;

use std::rc::Rc;

use tessel_core::ComponentId;

use crate::errors::RenderError;

pub use memory::MemoryNode;

/// Markup placeholder a component is mounted into.
pub fn component_placeholder(component_id: &ComponentId) -> String {
    format!(r#"<component data-id="{component_id}"></component>"#)
}

/// A node of the rendered surface.
///
/// Lookups are scoped: `find_component` searches every descendant, while
/// `find_slot` stays within the subtree owned by this node and does not
/// descend into nested component containers.
pub trait Container {
    /// The container of a nested component, by id.
    fn find_component(&self, component_id: &ComponentId) -> Option<Rc<dyn Container>>;

    /// The rune slot bound to `key`.
    fn find_slot(&self, key: &str) -> Option<Rc<dyn Container>>;

    /// Replace the inner content with `markup`.
    fn replace_content(&self, markup: &str) -> Result<(), RenderError>;

    /// Append `markup` after the current content.
    fn append_content(&self, markup: &str) -> Result<(), RenderError>;

    /// The inner content as markup.
    fn content(&self) -> String;

    /// Attribute value.
    fn attribute(&self, name: &str) -> Option<String>;

    /// Set an attribute.
    fn set_attribute(&self, name: &str, value: &str);

    /// Add (`on`) or remove a CSS class.
    fn toggle_class(&self, class: &str, on: bool);

    /// Whether a CSS class is set.
    fn has_class(&self, class: &str) -> bool;
}
