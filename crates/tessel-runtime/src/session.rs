//! Session orchestrator.
//!
//! A [`Session`] is the single entry point for interactions. Per component
//! id it keeps an in-flight entry and runs this state machine:
//!
//! 1. `SERVER_WAIT` while an entry exists: count the call as dropped and
//!    return without doing anything.
//! 2. `SERVER`: re-render locally first.
//! 3. Bump the generation; the new value is this call's serial number.
//! 4. Serial above 1 with a remote mode: run as `CSR` and count the call as
//!    collapsed. Local-only modes run as requested.
//! 5. Run the unit of work.
//! 6. The serial-1 call clears the entry. If calls were collapsed meanwhile,
//!    it spawns one fresh interaction with the original mode (a respawn) so
//!    the latest local state reaches the remote store.
//!
//! At most one remote exchange per component id is outstanding at a time,
//! and a stale remote response never overwrites newer local state.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use serde_json::{Map, Value};
use tessel_core::{ComponentId, ComponentRef, Envelope, ExchangeRequest, Mode, TemplateProbe};
use tessel_settings::{SessionSettings, TesselSettings};
use tessel_store::LocalStore;
use tessel_transport::{Transport, TransportError};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::LocalBoxFuture;
use crate::cache::TemplateCache;
use crate::component::{Component, ComponentFactories};
use crate::errors::{Result, RuntimeError};
use crate::registry::{InstanceRegistry, RenderOutcome};
use crate::render::Renderer;
use crate::surface::{Container, component_placeholder};

/// Collaborators a session is built from.
pub struct SessionDeps {
    /// Remote exchange.
    pub transport: Rc<dyn Transport>,
    /// Durable local store.
    pub store: Rc<dyn LocalStore>,
    /// Rendering collaborator.
    pub renderer: Rc<dyn Renderer>,
    /// Component factory table.
    pub factories: ComponentFactories,
}

/// In-flight bookkeeping for one component id. Absent means idle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlightEntry {
    /// Bumped by every arriving call, dropped ones included.
    pub generation: u32,
    /// Overlapping remote calls that ran as `CSR` instead. Local calls
    /// overlap without being counted here.
    pub collapsed: u32,
    /// `SERVER_WAIT` calls that were dropped.
    pub dropped: u32,
}

impl FlightEntry {
    /// Whether the call in flight is still the only one of its batch that
    /// did any work.
    fn is_lone(&self) -> bool {
        self.generation - self.dropped == 1
    }
}

struct Interaction {
    component_id: ComponentId,
    component: String,
    id: Option<String>,
    mode: Mode,
    initial_vars: Option<Map<String, Value>>,
    depth: u32,
}

struct SessionInner {
    me: Weak<SessionInner>,
    settings: SessionSettings,
    default_mode: Option<Mode>,
    transport: Rc<dyn Transport>,
    cache: Rc<TemplateCache>,
    registry: InstanceRegistry,
    flights: RefCell<HashMap<ComponentId, FlightEntry>>,
    roots: RefCell<HashMap<ComponentId, Rc<dyn Container>>>,
    respawns: RefCell<Vec<JoinHandle<()>>>,
}

/// The orchestrator. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Session {
    inner: Rc<SessionInner>,
}

/// Weak handle to a session, attached to every component instance.
#[derive(Clone)]
pub struct SessionHandle(Weak<SessionInner>);

impl SessionHandle {
    /// Upgrade to a session, if it is still alive.
    pub fn session(&self) -> Option<Session> {
        self.0.upgrade().map(|inner| Session { inner })
    }

    /// Trigger an interaction on `component_id`.
    pub async fn react(&self, component_id: &ComponentId, mode: Option<Mode>) -> Result<()> {
        let session = self.session().ok_or(RuntimeError::SessionClosed)?;
        session.react(component_id, mode).await
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionHandle")
            .field(&(self.0.strong_count() > 0))
            .finish()
    }
}

impl Session {
    /// Build a session. Invalid settings are a fatal configuration error.
    pub fn new(settings: &TesselSettings, deps: SessionDeps) -> Result<Self> {
        settings.validate()?;
        let default_mode = settings.default_mode()?;
        let cache = TemplateCache::new(
            deps.store.clone(),
            deps.transport.clone(),
            Duration::from_millis(settings.session.index_flush_delay_ms),
        );
        let inner = Rc::new_cyclic(|me: &Weak<SessionInner>| SessionInner {
            me: me.clone(),
            settings: settings.session.clone(),
            default_mode,
            transport: deps.transport,
            cache: cache.clone(),
            registry: InstanceRegistry::new(
                deps.factories,
                cache,
                deps.store,
                deps.renderer,
                SessionHandle(me.clone()),
            ),
            flights: RefCell::new(HashMap::new()),
            roots: RefCell::new(HashMap::new()),
            respawns: RefCell::new(Vec::new()),
        });
        info!(default_mode = ?default_mode, "session created");
        Ok(Self { inner })
    }

    /// A weak handle to this session.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle(self.inner.me.clone())
    }

    /// The instance registry.
    pub fn registry(&self) -> &InstanceRegistry {
        &self.inner.registry
    }

    /// The template cache.
    pub fn cache(&self) -> &Rc<TemplateCache> {
        &self.inner.cache
    }

    /// In-flight entry of a component, if any call is outstanding.
    pub fn flight(&self, component_id: &ComponentId) -> Option<FlightEntry> {
        self.inner.flights.borrow().get(component_id).copied()
    }

    /// Mount a component into `container` and run its first interaction.
    ///
    /// Returns the id the component ended up with, which differs from the
    /// derived one when the remote store assigns an instance id. `None`
    /// means another flow created that id while this one was exchanging, and
    /// this call was abandoned without rendering.
    #[instrument(skip(self, container, initial_vars))]
    pub async fn start(
        &self,
        container: Rc<dyn Container>,
        component: &str,
        id: Option<&str>,
        initial_vars: Map<String, Value>,
        mode: Option<&str>,
    ) -> Result<Option<ComponentId>> {
        let mode = self.inner.resolve_mode(mode)?;
        let component_id = ComponentId::new(component, id);
        if self.inner.registry.exists(&component_id)
            || self.inner.flights.borrow().contains_key(&component_id)
        {
            return Err(RuntimeError::AlreadyExists(component_id));
        }

        if container.find_component(&component_id).is_none() {
            container.append_content(&component_placeholder(&component_id))?;
        }
        let _ = self
            .inner
            .roots
            .borrow_mut()
            .insert(component_id.clone(), container);

        info!(%component_id, %mode, "starting component");
        self.inner
            .clone()
            .interact(Interaction {
                component_id: component_id.clone(),
                component: component.to_owned(),
                id: id.filter(|id| !id.is_empty()).map(str::to_owned),
                mode,
                initial_vars: Some(initial_vars),
                depth: 0,
            })
            .await
    }

    /// Trigger an interaction on a live component.
    #[instrument(skip(self))]
    pub async fn react(&self, component_id: &ComponentId, mode: Option<Mode>) -> Result<()> {
        let (component, id) = self.inner.registry.component_name_and_id(component_id)?;
        let mode = match mode {
            Some(mode) => mode,
            None => self.inner.resolve_mode(None)?,
        };
        let _ = self
            .inner
            .clone()
            .interact(Interaction {
                component_id: component_id.clone(),
                component,
                id,
                mode,
                initial_vars: None,
                depth: 0,
            })
            .await?;
        Ok(())
    }

    /// [`react`](Self::react) with a mode given as text.
    pub async fn react_str(&self, component_id: &ComponentId, mode: Option<&str>) -> Result<()> {
        let mode = self.inner.resolve_mode(mode)?;
        self.react(component_id, Some(mode)).await
    }

    /// Await every respawn spawned so far (and those they spawn), then the
    /// pending index flush.
    pub async fn settle(&self) {
        loop {
            let pending: Vec<_> = self.inner.respawns.borrow_mut().drain(..).collect();
            if pending.is_empty() {
                break;
            }
            for task in pending {
                if let Err(e) = task.await {
                    warn!(error = %e, "respawn task failed");
                }
            }
        }
        self.inner.cache.settle().await;
    }

    /// Tear down one component.
    pub fn destroy(&self, component_id: &ComponentId) -> Result<()> {
        let _ = self.inner.roots.borrow_mut().remove(component_id);
        self.inner.registry.remove(component_id)
    }

    /// Run `f` against a live instance.
    pub fn with_instance<R>(
        &self,
        component_id: &ComponentId,
        f: impl FnOnce(&dyn Component) -> R,
    ) -> Result<R> {
        self.inner.registry.with_instance(component_id, f)
    }

    /// Run `f` against a live instance mutably.
    pub fn with_instance_mut<R>(
        &self,
        component_id: &ComponentId,
        f: impl FnOnce(&mut dyn Component) -> R,
    ) -> Result<R> {
        self.inner.registry.with_instance_mut(component_id, f)
    }

    /// Settle outstanding work, tear down every instance, and flush the
    /// version index.
    pub async fn shutdown(&self) -> Result<()> {
        self.settle().await;
        for component_id in self.inner.registry.component_ids() {
            if let Err(e) = self.inner.registry.remove(&component_id) {
                warn!(%component_id, error = %e, "teardown failed during shutdown");
            }
        }
        self.inner.roots.borrow_mut().clear();
        self.inner.cache.flush_index()?;
        info!("session shut down");
        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("default_mode", &self.inner.default_mode)
            .field("registry", &self.inner.registry)
            .field("in_flight", &self.inner.flights.borrow().len())
            .finish_non_exhaustive()
    }
}

impl SessionInner {
    fn resolve_mode(&self, requested: Option<&str>) -> Result<Mode> {
        match requested {
            Some(raw) => raw
                .parse()
                .map_err(|e: tessel_core::ParseModeError| RuntimeError::InvalidMode(e.0)),
            None => self
                .default_mode
                .ok_or_else(|| RuntimeError::InvalidMode("no mode given and no default configured".into())),
        }
    }

    /// Run one interaction through the state machine.
    ///
    /// Resolves to the component id after the call, or `None` when the call
    /// was dropped or abandoned.
    fn interact(self: Rc<Self>, ix: Interaction) -> LocalBoxFuture<'static, Result<Option<ComponentId>>> {
        Box::pin(async move {
            let component_id = ix.component_id.clone();

            if ix.mode == Mode::ServerWait {
                if let Some(entry) = self.flights.borrow_mut().get_mut(&component_id) {
                    entry.generation += 1;
                    entry.dropped += 1;
                    debug!(%component_id, generation = entry.generation, "SERVER_WAIT already in flight, dropping call");
                    return Ok(None);
                }
            }

            if ix.mode == Mode::Server && self.registry.exists(&component_id) {
                let _ = self.run(&ix, Mode::Csr, 0).await?;
            }

            let serial = {
                let mut flights = self.flights.borrow_mut();
                let entry = flights.entry(component_id.clone()).or_default();
                entry.generation += 1;
                entry.generation
            };

            let effective = if serial > 1 && ix.mode.is_remote() {
                if let Some(entry) = self.flights.borrow_mut().get_mut(&component_id) {
                    entry.collapsed += 1;
                }
                debug!(%component_id, serial, mode = %ix.mode, "overlapping remote call, running locally");
                Mode::Csr
            } else {
                ix.mode
            };

            let result = self.run(&ix, effective, serial).await;

            if serial == 1 {
                // Any call that overlapped and was not dropped made the remote
                // answer stale, so the latest local state is sent again.
                let entry = self.flights.borrow_mut().remove(&component_id);
                let superseded = entry.is_some_and(|entry| !entry.is_lone());
                if superseded && ix.mode.is_remote() {
                    let target = match &result {
                        Ok(Some(settled)) => settled.clone(),
                        _ => component_id.clone(),
                    };
                    self.respawn(&ix, target);
                }
            }

            result
        })
    }

    fn respawn(self: &Rc<Self>, ix: &Interaction, component_id: ComponentId) {
        if ix.depth >= self.settings.respawn_limit {
            warn!(
                %component_id,
                depth = ix.depth,
                limit = self.settings.respawn_limit,
                "respawn limit reached, latest local state not sent"
            );
            return;
        }
        let (component, id) = match self.registry.component_name_and_id(&component_id) {
            Ok(found) => found,
            Err(_) => {
                debug!(%component_id, "component gone before respawn");
                return;
            }
        };
        debug!(%component_id, depth = ix.depth + 1, mode = %ix.mode, "respawning");
        let next = Interaction {
            component_id,
            component,
            id,
            mode: ix.mode,
            initial_vars: None,
            depth: ix.depth + 1,
        };
        let me = self.clone();
        let task = tokio::task::spawn_local(async move {
            let component_id = next.component_id.clone();
            if let Err(e) = me.interact(next).await {
                warn!(%component_id, error = %e, "respawned interaction failed");
            }
        });
        self.respawns.borrow_mut().push(task);
    }

    /// The unit of work for one call under an already resolved mode.
    #[allow(clippy::too_many_lines)]
    async fn run(&self, ix: &Interaction, mode: Mode, serial: u32) -> Result<Option<ComponentId>> {
        let mut component_id = ix.component_id.clone();
        let is_new = !self.registry.exists(&component_id);

        let (mut vars, mut keys) = if is_new {
            let vars = ix.initial_vars.clone().unwrap_or_default();
            let keys = vars.keys().cloned().collect::<Vec<_>>();
            (vars, keys)
        } else if mode.is_remote() {
            let encoded = self.registry.encode_vars(&component_id, mode)?;
            let keys = encoded.keys().cloned().collect();
            let vars = encoded
                .into_iter()
                .map(|(key, envelope)| (key, envelope.to_value()))
                .collect();
            (vars, keys)
        } else {
            (Map::new(), Vec::new())
        };

        let mut version = match self.registry.version(&component_id) {
            Ok(version) => version,
            Err(_) => self.cache.local_version(&ix.component)?.unwrap_or_default(),
        };
        let mut id = ix.id.clone();
        let mut prerendered = None;
        let mut exchanged = false;

        if mode.is_remote() {
            let response = self
                .exchange(ix, &component_id, mode, &vars, id.as_deref(), &version)
                .await?;
            for payload in response.templates {
                let _ = self.cache.set_from_template_response(payload)?;
            }
            let item = response
                .components
                .into_iter()
                .find(|item| item.component == ix.component)
                .ok_or_else(|| TransportError::MissingComponent(ix.component.clone()))?;

            keys = item.declared_keys();
            id = item.id.filter(|id| !id.is_empty());
            if !item.version.is_empty() {
                version = item.version;
            } else if let Some(known) = self.cache.local_version(&ix.component)? {
                // No version in the reply: keep the copy this exchange or an
                // earlier one installed.
                version = known;
            }
            vars = item.vars;
            prerendered = item.html;

            let settled_id = ComponentId::new(&ix.component, id.as_deref());
            if is_new && self.registry.exists(&settled_id) {
                info!(component_id = %settled_id, "component created by a concurrent flow, abandoning");
                return Ok(None);
            }
            if is_new && settled_id != component_id {
                self.rebind_root(&component_id, &settled_id);
            }
            component_id = settled_id;
            exchanged = true;
        }

        let template = self.cache.get_or_fetch(&ix.component, &version, mode).await?;

        if is_new {
            match self.registry.create(&template, vars, keys, id, mode).await {
                Ok(_) => {}
                Err(RuntimeError::AlreadyExists(existing)) => {
                    info!(component_id = %existing, "component created by a concurrent flow, abandoning");
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        } else if exchanged {
            let lone = self
                .flights
                .borrow()
                .get(&ix.component_id)
                .is_none_or(FlightEntry::is_lone);
            if lone {
                let changed = self
                    .registry
                    .update(&component_id, vars, &template.version, mode)
                    .await?;
                debug!(%component_id, serial, changed = changed.len(), "server state applied");
            } else {
                debug!(%component_id, serial, "overlapping calls arrived, discarding stale response");
            }
        }

        let container = self.container_for(&component_id)?;
        let outcome = self.registry.render(
            &*container,
            &component_id,
            is_new,
            &template,
            prerendered.as_deref(),
        )?;
        debug!(
            %component_id,
            %mode,
            serial,
            full = outcome == RenderOutcome::Full,
            "interaction complete"
        );
        Ok(Some(component_id))
    }

    async fn exchange(
        &self,
        ix: &Interaction,
        component_id: &ComponentId,
        mode: Mode,
        vars: &Map<String, Value>,
        id: Option<&str>,
        version: &str,
    ) -> Result<tessel_core::ExchangeResponse> {
        let payload = ComponentRef::new(
            mode,
            ix.component.clone(),
            id.map(str::to_owned),
            vars.iter()
                .map(|(key, value)| (key.clone(), Envelope::from_value(value.clone())))
                .collect(),
        );
        let request = ExchangeRequest::new(
            vec![payload],
            vec![TemplateProbe {
                component: ix.component.clone(),
                version: version.to_owned(),
            }],
        );

        let pending = if mode == Mode::ServerWait {
            self.container_for(component_id).ok()
        } else {
            None
        };
        if let Some(container) = &pending {
            container.toggle_class(&self.settings.pending_class, true);
        }
        debug!(%component_id, %mode, "remote exchange");
        let response = self.transport.exchange(&request).await;
        if let Some(container) = &pending {
            container.toggle_class(&self.settings.pending_class, false);
        }
        Ok(response?)
    }

    fn container_for(&self, component_id: &ComponentId) -> Result<Rc<dyn Container>> {
        let roots = self.roots.borrow();
        if let Some(root) = roots.get(component_id) {
            return root
                .find_component(component_id)
                .ok_or_else(|| RuntimeError::NoContainer(component_id.clone()));
        }
        roots
            .values()
            .find_map(|root| root.find_component(component_id))
            .ok_or_else(|| RuntimeError::NoContainer(component_id.clone()))
    }

    fn rebind_root(&self, from: &ComponentId, to: &ComponentId) {
        let mut roots = self.roots.borrow_mut();
        let Some(root) = roots.remove(from) else {
            return;
        };
        if let Some(placeholder) = root.find_component(from) {
            placeholder.set_attribute("data-id", to.as_str());
        }
        debug!(%from, %to, "remote store assigned an instance id");
        let _ = roots.insert(to.clone(), root);
    }
}
