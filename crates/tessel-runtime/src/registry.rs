//! Live component records.
//!
//! The registry owns every instance of a session, decodes variable envelopes
//! into nested instances, applies server updates, and decides per render
//! whether the whole component is re-rendered or only its rune slots are
//! patched.
//!
//! No `RefCell` borrow of the record table is held across an `.await`: an
//! instance is built and hydrated while owned by the creating call, and only
//! inserted once it is ready.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tessel_core::{ComponentId, ComponentRef, Envelope, Mode, Var, VarMap};
use tessel_store::LocalStore;
use tracing::{debug, instrument, warn};

use crate::LocalBoxFuture;
use crate::cache::{Template, TemplateCache};
use crate::component::{Component, ComponentContext, ComponentFactories};
use crate::errors::{RenderError, Result, RuntimeError};
use crate::render::{RenderValue, Renderer};
use crate::session::SessionHandle;
use crate::surface::Container;

/// Store key of a component's last rendered variables.
pub fn snapshot_key(component_id: &ComponentId) -> String {
    format!("tessel:vars:{component_id}")
}

/// Last rendered variables of a component, as persisted.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VarSnapshot {
    /// Variables in snapshot form.
    pub vars: Map<String, Value>,
    /// Template version the variables were rendered with.
    #[serde(default)]
    pub version: String,
    /// When the snapshot was written.
    pub updated_at: Option<DateTime<Utc>>,
}

/// One live component.
pub struct InstanceRecord {
    /// Derived id.
    pub component_id: ComponentId,
    /// The owned instance.
    pub instance: Box<dyn Component>,
    /// Component name.
    pub component: String,
    /// Instance disambiguator.
    pub id: Option<String>,
    /// Last applied template version.
    pub version: String,
    /// Server-owned keys, in declaration order.
    pub server_var_keys: Vec<String>,
    /// Server-owned keys bound to a single rune slot.
    pub rune_keys: BTreeSet<String>,
    /// Last creation or update.
    pub last_updated: DateTime<Utc>,
}

/// How a render call touched the surface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RenderOutcome {
    /// The whole component was re-rendered.
    Full,
    /// Only these slots were rewritten (possibly none).
    Patched(Vec<String>),
}

/// Owner of all live component records of a session.
pub struct InstanceRegistry {
    records: RefCell<HashMap<ComponentId, InstanceRecord>>,
    factories: ComponentFactories,
    cache: Rc<TemplateCache>,
    store: Rc<dyn LocalStore>,
    renderer: Rc<dyn Renderer>,
    session: SessionHandle,
}

impl InstanceRegistry {
    /// Create an empty registry.
    pub fn new(
        factories: ComponentFactories,
        cache: Rc<TemplateCache>,
        store: Rc<dyn LocalStore>,
        renderer: Rc<dyn Renderer>,
        session: SessionHandle,
    ) -> Self {
        Self {
            records: RefCell::new(HashMap::new()),
            factories,
            cache,
            store,
            renderer,
            session,
        }
    }

    // ── lifecycle ───────────────────────────────────────────────────

    /// Create, hydrate, and register an instance.
    ///
    /// Every declared key must be present in `vars`. Component references
    /// among the values are materialized as nested instances first.
    pub fn create<'a>(
        &'a self,
        template: &'a Template,
        vars: Map<String, Value>,
        keys: Vec<String>,
        id: Option<String>,
        mode: Mode,
    ) -> LocalBoxFuture<'a, Result<ComponentId>> {
        Box::pin(async move {
            let component_id = ComponentId::new(&template.component, id.as_deref());
            let mut instance = self.factories.build(template)?;
            instance.attach(ComponentContext {
                session: self.session.clone(),
                component_id: component_id.clone(),
                component: template.component.clone(),
                id: id.clone(),
            });
            let rune_keys = template.rune_keys(&keys)?;

            let mut vars = vars;
            for key in &keys {
                let value = vars.remove(key).ok_or_else(|| RuntimeError::MissingKey {
                    component_id: component_id.clone(),
                    key: key.clone(),
                })?;
                let var = self.decode_value(value, mode).await?;
                let _ = instance.vars_mut().insert(key.clone(), var);
            }

            instance.hydrate().await?;

            if self.exists(&component_id) {
                if let Err(e) = instance.destroy() {
                    warn!(%component_id, error = %e, "teardown of duplicate instance failed");
                }
                return Err(RuntimeError::AlreadyExists(component_id));
            }

            debug!(%component_id, keys = keys.len(), runes = rune_keys.len(), "instance created");
            let record = InstanceRecord {
                component_id: component_id.clone(),
                instance,
                component: template.component.clone(),
                id,
                version: template.version.clone(),
                server_var_keys: keys,
                rune_keys,
                last_updated: Utc::now(),
            };
            let _ = self
                .records
                .borrow_mut()
                .insert(component_id.clone(), record);
            Ok(component_id)
        })
    }

    /// Apply server-owned values and return the keys that changed.
    ///
    /// Tracked keys missing from `new_vars` become `null`. The update hook
    /// runs in the same synchronous section as the assignment, with the
    /// previous values of exactly the reassigned keys.
    pub fn update<'a>(
        &'a self,
        component_id: &'a ComponentId,
        new_vars: Map<String, Value>,
        new_version: &'a str,
        mode: Mode,
    ) -> LocalBoxFuture<'a, Result<Vec<String>>> {
        Box::pin(async move {
            let keys = self.server_var_keys(component_id)?;
            let mut new_vars = new_vars;
            let mut decoded = Vec::with_capacity(keys.len());
            for key in keys {
                let value = new_vars.remove(&key).unwrap_or(Value::Null);
                let var = self.decode_value(value, mode).await?;
                decoded.push((key, var));
            }

            let mut records = self.records.borrow_mut();
            let record = records
                .get_mut(component_id)
                .ok_or_else(|| RuntimeError::ComponentNotFound(component_id.clone()))?;

            let mut previous = VarMap::new();
            {
                let vars = record.instance.vars_mut();
                for (key, var) in decoded {
                    let old = vars.get(&key).cloned().unwrap_or_default();
                    if old.same_value(&var) {
                        continue;
                    }
                    let _ = vars.insert(key.clone(), var);
                    let _ = previous.insert(key, old);
                }
            }

            if record.version != new_version {
                record.version = new_version.to_owned();
                match self.cache.get(&record.component) {
                    Ok(template) if template.version == new_version => {
                        record.rune_keys = template.rune_keys(&record.server_var_keys)?;
                    }
                    _ => debug!(%component_id, new_version, "template for new version not cached, keeping rune keys"),
                }
            }
            record.last_updated = Utc::now();

            if !previous.is_empty() {
                record.instance.on_update(&previous);
            }
            debug!(%component_id, changed = previous.len(), "instance updated");
            Ok(previous.into_keys().collect())
        })
    }

    /// Tear down and delete a record. The record is deleted even when the
    /// teardown hook fails or panics; its error is returned afterwards.
    #[instrument(skip(self))]
    pub fn remove(&self, component_id: &ComponentId) -> Result<()> {
        if !self.exists(component_id) {
            return Err(RuntimeError::ComponentNotFound(component_id.clone()));
        }
        let _guard = RemoveOnDrop {
            records: &self.records,
            component_id,
        };
        let mut records = self.records.borrow_mut();
        let teardown = match records.get_mut(component_id) {
            Some(record) => record.instance.destroy(),
            None => Ok(()),
        };
        drop(records);
        Ok(teardown?)
    }

    /// Materialize one value: a component reference creates or updates the
    /// referenced instance, anything else is classified by shape.
    pub fn decode_value(&self, value: Value, mode: Mode) -> LocalBoxFuture<'_, Result<Var>> {
        Box::pin(async move {
            let reference = match Envelope::from_value(value) {
                Envelope::Raw(value) => return Ok(Var::from_value(value)),
                Envelope::Component(reference) => reference,
            };
            let child_id = reference.component_id();
            let vars = reference.vars_as_values();

            if self.exists(&child_id) {
                let version = self.version(&child_id)?;
                let _ = self.update(&child_id, vars, &version, mode).await?;
                return Ok(Var::Component(child_id));
            }

            let template = match self.cache.get(&reference.component) {
                Ok(template) => template,
                Err(RuntimeError::TemplateNotFound(_)) => {
                    let known = self
                        .cache
                        .local_version(&reference.component)?
                        .unwrap_or_default();
                    self.cache
                        .get_or_fetch(&reference.component, &known, mode)
                        .await?
                }
                Err(e) => return Err(e),
            };
            let keys = vars.keys().cloned().collect();
            match self.create(&template, vars, keys, reference.id.clone(), mode).await {
                Ok(_) | Err(RuntimeError::AlreadyExists(_)) => Ok(Var::Component(child_id)),
                Err(e) => Err(e),
            }
        })
    }

    /// Server-owned variables as envelopes, recursing into nested instances
    /// through their own server-owned variables.
    pub fn encode_vars(&self, component_id: &ComponentId, mode: Mode) -> Result<BTreeMap<String, Envelope>> {
        let mut visiting = BTreeSet::new();
        self.encode_inner(component_id, mode, &mut visiting)
    }

    fn encode_inner(
        &self,
        component_id: &ComponentId,
        mode: Mode,
        visiting: &mut BTreeSet<ComponentId>,
    ) -> Result<BTreeMap<String, Envelope>> {
        let _ = visiting.insert(component_id.clone());
        let vars = self.extract_vars(component_id)?;
        let mut encoded = BTreeMap::new();
        for (key, var) in vars {
            let envelope = match var {
                Var::Scalar(value) | Var::Structured(value) => Envelope::Raw(value),
                Var::Component(child) if visiting.contains(&child) => {
                    warn!(%component_id, %child, "cyclic component reference, encoding as null");
                    Envelope::Raw(Value::Null)
                }
                Var::Component(child) => {
                    let (name, id) = self.component_name_and_id(&child)?;
                    let child_vars = self.encode_inner(&child, mode, visiting)?;
                    Envelope::Component(ComponentRef::new(mode, name, id, child_vars))
                }
            };
            let _ = encoded.insert(key, envelope);
        }
        let _ = visiting.remove(component_id);
        Ok(encoded)
    }

    // ── render ──────────────────────────────────────────────────────

    /// Render a component into `container`.
    ///
    /// Diffs the current variables against the persisted snapshot, writes the
    /// new snapshot, then renders fully when `is_new`, when markup is
    /// supplied, when the template version moved since the last render, or
    /// when any changed key is not a rune key; otherwise patches
    /// the changed rune slots one by one. Nested components are rendered into
    /// their placeholders afterwards, fully when this component was.
    pub fn render(
        &self,
        container: &dyn Container,
        component_id: &ComponentId,
        is_new: bool,
        template: &Template,
        prerendered: Option<&str>,
    ) -> Result<RenderOutcome> {
        let (vars, rune_keys, constants) = {
            let records = self.records.borrow();
            let record = records
                .get(component_id)
                .ok_or_else(|| RuntimeError::ComponentNotFound(component_id.clone()))?;
            (
                record.instance.vars().clone(),
                record.rune_keys.clone(),
                record.instance.constants(),
            )
        };

        let snapshot: Map<String, Value> = vars
            .iter()
            .map(|(key, var)| (key.clone(), var.snapshot_value()))
            .collect();
        let VarSnapshot {
            vars: previous,
            version: rendered_version,
            ..
        } = self.load_snapshot(component_id);
        let mut changed: Vec<String> = snapshot
            .iter()
            .filter(|(key, value)| {
                previous
                    .get(*key)
                    .is_none_or(|old| !tessel_core::same_value(old, value))
            })
            .map(|(key, _)| key.clone())
            .collect();
        changed.extend(
            previous
                .keys()
                .filter(|key| !snapshot.contains_key(*key))
                .cloned(),
        );
        self.store.set(
            &snapshot_key(component_id),
            &serde_json::to_string(&VarSnapshot {
                vars: snapshot,
                version: template.version.clone(),
                updated_at: Some(Utc::now()),
            })?,
        )?;

        let mut nested = Vec::new();
        let render_vars: BTreeMap<String, RenderValue> = vars
            .iter()
            .map(|(key, var)| {
                let value = match var {
                    Var::Component(child) => {
                        nested.push(child.clone());
                        RenderValue::Placeholder(child.clone())
                    }
                    Var::Scalar(value) | Var::Structured(value) => RenderValue::Value(value.clone()),
                };
                (key.clone(), value)
            })
            .collect();

        let full = is_new
            || prerendered.is_some()
            || rendered_version != template.version
            || changed.iter().any(|key| {
                !rune_keys.contains(key)
                    || matches!(render_vars.get(key), Some(RenderValue::Placeholder(_)))
            });

        let outcome = if full {
            match prerendered {
                Some(markup) => container.replace_content(markup)?,
                None => self.renderer.render(
                    container,
                    component_id,
                    template,
                    &render_vars,
                    &constants,
                )?,
            }
            debug!(%component_id, is_new, changed = changed.len(), "full render");
            RenderOutcome::Full
        } else {
            for key in &changed {
                let slot = container.find_slot(key).ok_or_else(|| RenderError::MissingSlot {
                    component_id: component_id.clone(),
                    key: key.clone(),
                })?;
                let value = render_vars
                    .get(key)
                    .cloned()
                    .unwrap_or(RenderValue::Value(Value::Null));
                self.renderer.render_slot(&*slot, &value)?;
                self.notify_render(component_id, Some(key.as_str()));
            }
            debug!(%component_id, patched = changed.len(), "patch render");
            RenderOutcome::Patched(changed)
        };

        for child in nested {
            let child_container = container
                .find_component(&child)
                .ok_or_else(|| RuntimeError::NoContainer(child.clone()))?;
            let (name, _) = self.component_name_and_id(&child)?;
            let child_template = self.cache.get(&name)?;
            let _ = self.render(&*child_container, &child, full, &child_template, None)?;
        }

        if full {
            self.notify_render(component_id, None);
        }
        Ok(outcome)
    }

    fn notify_render(&self, component_id: &ComponentId, slot: Option<&str>) {
        if let Some(record) = self.records.borrow_mut().get_mut(component_id) {
            record.instance.on_render(slot);
        }
    }

    fn load_snapshot(&self, component_id: &ComponentId) -> VarSnapshot {
        let raw = match self.store.get(&snapshot_key(component_id)) {
            Ok(Some(raw)) => raw,
            Ok(None) => return VarSnapshot::default(),
            Err(e) => {
                warn!(%component_id, error = %e, "snapshot unreadable, diffing against empty");
                return VarSnapshot::default();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(%component_id, error = %e, "snapshot malformed, diffing against empty");
            VarSnapshot::default()
        })
    }

    // ── accessors ───────────────────────────────────────────────────

    /// Whether a record exists.
    pub fn exists(&self, component_id: &ComponentId) -> bool {
        self.records.borrow().contains_key(component_id)
    }

    /// Ids of every live record.
    pub fn component_ids(&self) -> Vec<ComponentId> {
        self.records.borrow().keys().cloned().collect()
    }

    /// Current values of the server-owned variables.
    pub fn extract_vars(&self, component_id: &ComponentId) -> Result<VarMap> {
        self.read(component_id, |record| {
            let vars = record.instance.vars();
            record
                .server_var_keys
                .iter()
                .map(|key| (key.clone(), vars.get(key).cloned().unwrap_or_default()))
                .collect()
        })
    }

    /// Server-owned keys in declaration order.
    pub fn server_var_keys(&self, component_id: &ComponentId) -> Result<Vec<String>> {
        self.read(component_id, |record| record.server_var_keys.clone())
    }

    /// Rune keys.
    pub fn rune_keys(&self, component_id: &ComponentId) -> Result<BTreeSet<String>> {
        self.read(component_id, |record| record.rune_keys.clone())
    }

    /// Component name and instance id.
    pub fn component_name_and_id(&self, component_id: &ComponentId) -> Result<(String, Option<String>)> {
        self.read(component_id, |record| (record.component.clone(), record.id.clone()))
    }

    /// Last applied template version.
    pub fn version(&self, component_id: &ComponentId) -> Result<String> {
        self.read(component_id, |record| record.version.clone())
    }

    /// Run `f` against the instance.
    pub fn with_instance<R>(&self, component_id: &ComponentId, f: impl FnOnce(&dyn Component) -> R) -> Result<R> {
        self.read(component_id, |record| f(&*record.instance))
    }

    /// Run `f` against the instance mutably.
    pub fn with_instance_mut<R>(
        &self,
        component_id: &ComponentId,
        f: impl FnOnce(&mut dyn Component) -> R,
    ) -> Result<R> {
        let mut records = self.records.borrow_mut();
        let record = records
            .get_mut(component_id)
            .ok_or_else(|| RuntimeError::ComponentNotFound(component_id.clone()))?;
        Ok(f(&mut *record.instance))
    }

    fn read<R>(&self, component_id: &ComponentId, f: impl FnOnce(&InstanceRecord) -> R) -> Result<R> {
        let records = self.records.borrow();
        let record = records
            .get(component_id)
            .ok_or_else(|| RuntimeError::ComponentNotFound(component_id.clone()))?;
        Ok(f(record))
    }
}

impl std::fmt::Debug for InstanceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceRegistry")
            .field("records", &self.records.borrow().len())
            .field("factories", &self.factories)
            .finish_non_exhaustive()
    }
}

struct RemoveOnDrop<'a> {
    records: &'a RefCell<HashMap<ComponentId, InstanceRecord>>,
    component_id: &'a ComponentId,
}

impl Drop for RemoveOnDrop<'_> {
    fn drop(&mut self) {
        if let Ok(mut records) = self.records.try_borrow_mut() {
            let _ = records.remove(self.component_id);
        }
    }
}
