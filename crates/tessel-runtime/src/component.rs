//! Component capability set and the factory table that builds instances.
//!
//! The runtime never generates code. Each component name maps to a factory
//! registered up front; an optional fallback covers names without one.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tessel_core::{ComponentId, VarMap};

use crate::cache::Template;
use crate::errors::{ComponentError, Result, RuntimeError};
use crate::session::SessionHandle;

/// Identity and session access handed to an instance right after creation.
#[derive(Clone, Debug)]
pub struct ComponentContext {
    /// Session that owns the instance.
    pub session: SessionHandle,
    /// Derived component id.
    pub component_id: ComponentId,
    /// Component name.
    pub component: String,
    /// Instance disambiguator.
    pub id: Option<String>,
}

/// A live, application-supplied stateful object.
///
/// Hooks run on the session thread. `on_update`, `on_render`, and `destroy`
/// are invoked while the registry holds the instance, so they must not call
/// back into the registry synchronously; spawn a task to react instead.
#[async_trait(?Send)]
pub trait Component {
    /// Current variables (server-owned and client-only).
    fn vars(&self) -> &VarMap;

    /// Mutable access to the variables.
    fn vars_mut(&mut self) -> &mut VarMap;

    /// Receive the session handle and identity.
    fn attach(&mut self, _context: ComponentContext) {}

    /// Post-creation hook, awaited before the instance is registered.
    async fn hydrate(&mut self) -> std::result::Result<(), ComponentError> {
        Ok(())
    }

    /// Called with the previous values of exactly the keys just reassigned.
    fn on_update(&mut self, _previous: &VarMap) {}

    /// Called after a full render (`None`) or after one slot was patched.
    fn on_render(&mut self, _slot: Option<&str>) {}

    /// Teardown hook.
    fn destroy(&mut self) -> std::result::Result<(), ComponentError> {
        Ok(())
    }

    /// Constants bound into rendering alongside the variables.
    fn constants(&self) -> Value {
        Value::Object(Map::new())
    }
}

/// A component without behavior: it only holds variables.
#[derive(Debug, Default)]
pub struct DataComponent {
    vars: VarMap,
    context: Option<ComponentContext>,
}

impl DataComponent {
    /// Create an empty instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// The context received on attach.
    pub fn context(&self) -> Option<&ComponentContext> {
        self.context.as_ref()
    }
}

#[async_trait(?Send)]
impl Component for DataComponent {
    fn vars(&self) -> &VarMap {
        &self.vars
    }

    fn vars_mut(&mut self) -> &mut VarMap {
        &mut self.vars
    }

    fn attach(&mut self, context: ComponentContext) {
        self.context = Some(context);
    }
}

/// Builds an instance from its template.
pub type ComponentFactory =
    Box<dyn Fn(&Template) -> std::result::Result<Box<dyn Component>, ComponentError>>;

/// Factory table keyed by component name.
#[derive(Default)]
pub struct ComponentFactories {
    factories: HashMap<String, ComponentFactory>,
    fallback: Option<ComponentFactory>,
}

impl ComponentFactories {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// A table whose fallback builds [`DataComponent`]s.
    pub fn with_data_fallback() -> Self {
        Self::new().fallback(|_| Ok(Box::new(DataComponent::new())))
    }

    /// Register a factory for `component`, replacing any previous one.
    #[must_use]
    pub fn register<F>(mut self, component: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&Template) -> std::result::Result<Box<dyn Component>, ComponentError> + 'static,
    {
        let _ = self.factories.insert(component.into(), Box::new(factory));
        self
    }

    /// Set the factory used for unregistered names.
    #[must_use]
    pub fn fallback<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Template) -> std::result::Result<Box<dyn Component>, ComponentError> + 'static,
    {
        self.fallback = Some(Box::new(factory));
        self
    }

    /// Whether `component` resolves to a factory.
    pub fn contains(&self, component: &str) -> bool {
        self.fallback.is_some() || self.factories.contains_key(component)
    }

    /// Build an instance for the template's component.
    pub fn build(&self, template: &Template) -> Result<Box<dyn Component>> {
        let factory = self
            .factories
            .get(&template.component)
            .or(self.fallback.as_ref())
            .ok_or_else(|| RuntimeError::ComponentNotRegistered(template.component.clone()))?;
        Ok(factory(template)?)
    }
}

impl fmt::Debug for ComponentFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("ComponentFactories")
            .field("factories", &names)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}
