#![allow(dead_code, missing_docs)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tessel_core::{
    ComponentRef, ExchangeRequest, ExchangeResponse, Mode, ResponseComponent, TemplatePayload,
    VarMap,
};
use tessel_runtime::{
    Component, ComponentError, ComponentFactories, MarkupRenderer, Session, SessionDeps,
};
use tessel_settings::TesselSettings;
use tessel_store::{LocalStore, MemoryStore};
use tessel_transport::{Transport, TransportError};
use tokio::sync::Notify;

// ── remote store fake ───────────────────────────────────────────────

/// Echoes component variables back, serves published templates, and can
/// hold every exchange until released.
#[derive(Default)]
pub struct FakeRemote {
    templates: RefCell<HashMap<String, TemplatePayload>>,
    requests: RefCell<Vec<ExchangeRequest>>,
    overrides: RefCell<HashMap<String, Map<String, Value>>>,
    assigned_ids: RefCell<HashMap<String, String>>,
    held: Cell<bool>,
    passes: Cell<usize>,
    omit_versions: Cell<bool>,
    gate: Notify,
}

impl FakeRemote {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn publish(&self, component: &str, version: &str, html: &str) {
        let _ = self.templates.borrow_mut().insert(
            component.into(),
            TemplatePayload {
                component: component.into(),
                version: version.into(),
                html_code: html.into(),
                ..TemplatePayload::default()
            },
        );
    }

    /// Make the remote store answer `key` with `value` for `component`.
    pub fn override_var(&self, component: &str, key: &str, value: Value) {
        let _ = self
            .overrides
            .borrow_mut()
            .entry(component.into())
            .or_default()
            .insert(key.into(), value);
    }

    pub fn assign_id(&self, component: &str, id: &str) {
        let _ = self
            .assigned_ids
            .borrow_mut()
            .insert(component.into(), id.into());
    }

    pub fn hold(&self) {
        self.held.set(true);
    }

    pub fn release(&self) {
        self.held.set(false);
        self.gate.notify_waiters();
    }

    /// Let one waiting exchange through and keep holding the rest.
    pub fn step(&self) {
        self.passes.set(self.passes.get() + 1);
        self.gate.notify_waiters();
    }

    /// Answer component items without a template version.
    pub fn omit_versions(&self) {
        self.omit_versions.set(true);
    }

    pub fn requests(&self) -> Vec<ExchangeRequest> {
        self.requests.borrow().clone()
    }

    /// Component payloads sent for `component`, in arrival order.
    pub fn sent(&self, component: &str) -> Vec<ComponentRef> {
        self.requests
            .borrow()
            .iter()
            .flat_map(|request| request.components.iter())
            .filter(|payload| payload.component == component)
            .cloned()
            .collect()
    }

    fn respond(&self, request: &ExchangeRequest) -> ExchangeResponse {
        let templates = self.templates.borrow();
        let overrides = self.overrides.borrow();
        let assigned = self.assigned_ids.borrow();

        let components = request
            .components
            .iter()
            .map(|payload| {
                let mut vars = payload.vars_as_values();
                if let Some(extra) = overrides.get(&payload.component) {
                    for (key, value) in extra {
                        let _ = vars.insert(key.clone(), value.clone());
                    }
                }
                ResponseComponent {
                    component: payload.component.clone(),
                    id: assigned
                        .get(&payload.component)
                        .cloned()
                        .or_else(|| payload.id.clone()),
                    vars,
                    version: templates
                        .get(&payload.component)
                        .filter(|_| !self.omit_versions.get())
                        .map(|t| t.version.clone())
                        .unwrap_or_default(),
                    keys: None,
                    html: (payload.mode == Mode::Ssr)
                        .then(|| format!(r#"<p class="ssr">{}</p>"#, payload.component)),
                }
            })
            .collect();

        let stale = request
            .templates
            .iter()
            .filter_map(|probe| {
                let template = templates.get(&probe.component)?;
                (template.version != probe.version).then(|| template.clone())
            })
            .collect();

        ExchangeResponse::new(components, stale)
    }
}

#[async_trait(?Send)]
impl Transport for FakeRemote {
    async fn exchange(&self, request: &ExchangeRequest) -> tessel_transport::Result<ExchangeResponse> {
        self.requests.borrow_mut().push(request.clone());
        loop {
            let released = self.gate.notified();
            if !self.held.get() {
                break;
            }
            if self.passes.get() > 0 {
                self.passes.set(self.passes.get() - 1);
                break;
            }
            released.await;
        }
        Ok(self.respond(request))
    }

    async fn fetch_static_template(&self, component: &str) -> tessel_transport::Result<TemplatePayload> {
        self.templates
            .borrow()
            .get(component)
            .cloned()
            .ok_or(TransportError::NoStaticLocation)
    }
}

// ── components ──────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Update(Vec<String>),
    Render(Option<String>),
    Destroy,
}

pub type EventLog = Rc<RefCell<Vec<Event>>>;

/// Records every hook call into a shared log.
pub struct Recorder {
    vars: VarMap,
    log: EventLog,
    fail_destroy: bool,
}

#[async_trait(?Send)]
impl Component for Recorder {
    fn vars(&self) -> &VarMap {
        &self.vars
    }

    fn vars_mut(&mut self) -> &mut VarMap {
        &mut self.vars
    }

    fn on_update(&mut self, previous: &VarMap) {
        self.log
            .borrow_mut()
            .push(Event::Update(previous.keys().cloned().collect()));
    }

    fn on_render(&mut self, slot: Option<&str>) {
        self.log
            .borrow_mut()
            .push(Event::Render(slot.map(str::to_owned)));
    }

    fn destroy(&mut self) -> Result<(), ComponentError> {
        self.log.borrow_mut().push(Event::Destroy);
        if self.fail_destroy {
            return Err(ComponentError::Teardown("handle already closed".into()));
        }
        Ok(())
    }

    fn constants(&self) -> Value {
        serde_json::json!({ "unit": "clicks" })
    }
}

/// Factories where `counter` and `fragile` record into `log`.
pub fn recording_factories(log: &EventLog) -> ComponentFactories {
    let counter_log = log.clone();
    let fragile_log = log.clone();
    ComponentFactories::with_data_fallback()
        .register("counter", move |_| {
            Ok(Box::new(Recorder {
                vars: VarMap::new(),
                log: counter_log.clone(),
                fail_destroy: false,
            }))
        })
        .register("fragile", move |_| {
            Ok(Box::new(Recorder {
                vars: VarMap::new(),
                log: fragile_log.clone(),
                fail_destroy: true,
            }))
        })
}

// ── fixtures ────────────────────────────────────────────────────────

pub const COUNTER_HTML: &str = "<p>{{$count}}</p><p>{{ label }} {{ unit }}</p>";
pub const PANEL_HTML: &str = "<h1>{{$title}}</h1><div>{{$child}}</div>";
pub const WIDGET_HTML: &str = "<span>{{$label}}</span>";

pub fn settings() -> TesselSettings {
    TesselSettings::default()
}

pub fn vars(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

pub struct Fixture {
    pub remote: Rc<FakeRemote>,
    pub store: Rc<dyn LocalStore>,
    pub log: EventLog,
    pub session: Session,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_store(Rc::new(MemoryStore::new()))
    }

    pub fn with_store(store: Rc<dyn LocalStore>) -> Self {
        Self::build(store, &settings())
    }

    pub fn with_settings(settings: &TesselSettings) -> Self {
        Self::build(Rc::new(MemoryStore::new()), settings)
    }

    fn build(store: Rc<dyn LocalStore>, settings: &TesselSettings) -> Self {
        let remote = FakeRemote::new();
        remote.publish("counter", "v1", COUNTER_HTML);
        remote.publish("fragile", "v1", COUNTER_HTML);
        remote.publish("panel", "v1", PANEL_HTML);
        remote.publish("widget", "v1", WIDGET_HTML);
        let log = EventLog::default();
        let session = Session::new(
            settings,
            SessionDeps {
                transport: remote.clone(),
                store: store.clone(),
                renderer: Rc::new(MarkupRenderer::new()),
                factories: recording_factories(&log),
            },
        )
        .unwrap();
        Self {
            remote,
            store,
            log,
            session,
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.log.borrow().clone()
    }

    pub fn clear_events(&self) {
        self.log.borrow_mut().clear();
    }
}
