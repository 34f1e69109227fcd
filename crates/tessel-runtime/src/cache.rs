//! Versioned template cache.
//!
//! Templates live in the local store under `tessel:template:<name>`, one per
//! component name. A version index (`tessel:template-versions`, name to
//! version) is loaded lazily on first use and written back by a single
//! coalesced flush per scheduling window, however many templates arrive.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap};
use std::rc::{Rc, Weak};
use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tessel_core::{ExchangeRequest, Mode, TemplatePayload, TemplateProbe};
use tessel_store::LocalStore;
use tessel_transport::Transport;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::errors::{RenderError, Result, RuntimeError};

/// Store key of the version index.
pub const INDEX_KEY: &str = "tessel:template-versions";

/// Store key of a template body.
pub fn template_key(component: &str) -> String {
    format!("tessel:template:{component}")
}

static SHORTHAND: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\{\{\s*\$([A-Za-z_][A-Za-z0-9_]*)\s*\}\}"));

static RUNE_SLOT: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r#"<rune data-var="([^"]*)"></rune>"#));

static EXPRESSION: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\{\{(.*?)\}\}"));

static IDENTIFIER: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_$][A-Za-z0-9_$]*"));

pub(crate) fn pattern(
    cell: &'static LazyLock<std::result::Result<Regex, regex::Error>>,
) -> std::result::Result<&'static Regex, RenderError> {
    cell.as_ref()
        .map_err(|e| RenderError::Surface(format!("pattern: {e}")))
}

/// A component template.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
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
    /// Normalized markup.
    #[serde(default)]
    pub html_code: String,
    /// When this copy was installed.
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Template {
    /// Build from a transport payload, normalizing the markup.
    pub fn from_payload(payload: TemplatePayload) -> Result<Self> {
        Ok(Self {
            html_code: normalize_markup(&payload.html_code)?,
            component: payload.component,
            version: payload.version,
            js_code: payload.js_code,
            css_code: payload.css_code,
            last_updated: Some(Utc::now()),
        })
    }

    /// Rune keys among `keys` for this template's markup.
    pub fn rune_keys<'a>(&self, keys: impl IntoIterator<Item = &'a String>) -> Result<BTreeSet<String>> {
        rune_keys(&self.html_code, keys)
    }
}

/// Rewrite `{{$name}}` shorthand into `<rune data-var="name"></rune>` slots.
pub fn normalize_markup(html: &str) -> Result<String> {
    let shorthand = pattern(&SHORTHAND)?;
    Ok(shorthand
        .replace_all(html, r#"<rune data-var="$1"></rune>"#)
        .into_owned())
}

/// Keys bound to exactly one rune slot and referenced by no other expression.
pub fn rune_keys<'a>(
    html: &str,
    keys: impl IntoIterator<Item = &'a String>,
) -> Result<BTreeSet<String>> {
    let mut slots: HashMap<&str, usize> = HashMap::new();
    for caps in pattern(&RUNE_SLOT)?.captures_iter(html) {
        if let Some(name) = caps.get(1) {
            *slots.entry(name.as_str()).or_default() += 1;
        }
    }

    let identifier = pattern(&IDENTIFIER)?;
    let mut referenced: BTreeSet<&str> = BTreeSet::new();
    for caps in pattern(&EXPRESSION)?.captures_iter(html) {
        if let Some(body) = caps.get(1) {
            referenced.extend(
                identifier
                    .find_iter(body.as_str())
                    .map(|m| m.as_str().trim_start_matches('$')),
            );
        }
    }

    Ok(keys
        .into_iter()
        .filter(|key| slots.get(key.as_str()) == Some(&1) && !referenced.contains(key.as_str()))
        .cloned()
        .collect())
}

/// Template cache backed by a [`LocalStore`] and a [`Transport`].
pub struct TemplateCache {
    me: Weak<TemplateCache>,
    store: Rc<dyn LocalStore>,
    transport: Rc<dyn Transport>,
    templates: RefCell<HashMap<String, Template>>,
    index: RefCell<Option<HashMap<String, String>>>,
    flush_pending: Cell<bool>,
    flush_delay: Duration,
    flush_task: RefCell<Option<JoinHandle<()>>>,
}

impl TemplateCache {
    /// Create a cache. A zero `flush_delay` flushes on the next scheduler turn.
    pub fn new(
        store: Rc<dyn LocalStore>,
        transport: Rc<dyn Transport>,
        flush_delay: Duration,
    ) -> Rc<Self> {
        Rc::new_cyclic(|me| Self {
            me: me.clone(),
            store,
            transport,
            templates: RefCell::new(HashMap::new()),
            index: RefCell::new(None),
            flush_pending: Cell::new(false),
            flush_delay,
            flush_task: RefCell::new(None),
        })
    }

    /// Cache-only lookup.
    pub fn get(&self, component: &str) -> Result<Template> {
        self.load(component)?
            .ok_or_else(|| RuntimeError::TemplateNotFound(component.to_owned()))
    }

    /// Version recorded in the index for `component`.
    pub fn local_version(&self, component: &str) -> Result<Option<String>> {
        self.ensure_index()?;
        Ok(self
            .index
            .borrow()
            .as_ref()
            .and_then(|index| index.get(component).cloned()))
    }

    /// Return the template at `version`, fetching it when the cache disagrees.
    ///
    /// Under [`Mode::CsrOnly`] the fetch goes to the static location only.
    #[instrument(skip(self))]
    pub async fn get_or_fetch(&self, component: &str, version: &str, mode: Mode) -> Result<Template> {
        let indexed = self.local_version(component)?;
        if let Some(stored) = self.load(component)? {
            if !version.is_empty() && stored.version == version {
                if indexed.as_deref() != Some(version) {
                    debug!(component, version, "version index out of sync, healing");
                    self.record_version(component, version)?;
                }
                return Ok(stored);
            }
            if indexed.as_deref() == Some(version) {
                warn!(
                    component,
                    version,
                    stored = %stored.version,
                    "stored template disagrees with version index, refetching"
                );
            }
        }

        if mode == Mode::CsrOnly {
            let payload = self.transport.fetch_static_template(component).await?;
            return self.set_from_template_response(payload);
        }

        debug!(component, version, "fetching template");
        let probe = TemplateProbe {
            component: component.to_owned(),
            version: String::new(),
        };
        let response = self
            .transport
            .exchange(&ExchangeRequest::templates_only(vec![probe]))
            .await?;
        let payload = response
            .templates
            .into_iter()
            .find(|t| t.component == component)
            .ok_or_else(|| RuntimeError::TemplateNotFound(component.to_owned()))?;
        self.set_from_template_response(payload)
    }

    /// Install a template delivered by the transport.
    pub fn set_from_template_response(&self, payload: TemplatePayload) -> Result<Template> {
        let template = Template::from_payload(payload)?;
        self.store.set(
            &template_key(&template.component),
            &serde_json::to_string(&template)?,
        )?;
        let _ = self
            .templates
            .borrow_mut()
            .insert(template.component.clone(), template.clone());
        self.record_version(&template.component, &template.version)?;
        debug!(component = %template.component, version = %template.version, "template installed");
        Ok(template)
    }

    /// Write the version index to the store now.
    pub fn flush_index(&self) -> Result<()> {
        self.flush_pending.set(false);
        let encoded = match self.index.borrow().as_ref() {
            Some(index) => serde_json::to_string(index)?,
            None => return Ok(()),
        };
        self.store.set(INDEX_KEY, &encoded)?;
        debug!("version index flushed");
        Ok(())
    }

    /// Whether a flush is scheduled.
    pub fn flush_pending(&self) -> bool {
        self.flush_pending.get()
    }

    /// Await the scheduled flush, if any.
    pub async fn settle(&self) {
        let task = self.flush_task.borrow_mut().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    fn load(&self, component: &str) -> Result<Option<Template>> {
        if let Some(template) = self.templates.borrow().get(component) {
            return Ok(Some(template.clone()));
        }
        let Some(raw) = self.store.get(&template_key(component))? else {
            return Ok(None);
        };
        let template: Template = serde_json::from_str(&raw)?;
        let _ = self
            .templates
            .borrow_mut()
            .insert(component.to_owned(), template.clone());
        Ok(Some(template))
    }

    fn ensure_index(&self) -> Result<()> {
        if self.index.borrow().is_some() {
            return Ok(());
        }
        let loaded = match self.store.get(INDEX_KEY)? {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(error = %e, "discarding unreadable version index");
                HashMap::new()
            }),
            None => HashMap::new(),
        };
        *self.index.borrow_mut() = Some(loaded);
        Ok(())
    }

    fn record_version(&self, component: &str, version: &str) -> Result<()> {
        self.ensure_index()?;
        if let Some(index) = self.index.borrow_mut().as_mut() {
            let _ = index.insert(component.to_owned(), version.to_owned());
        }
        self.schedule_flush();
        Ok(())
    }

    fn schedule_flush(&self) {
        if self.flush_pending.replace(true) {
            return;
        }
        let me = self.me.clone();
        let delay = self.flush_delay;
        let task = tokio::task::spawn_local(async move {
            if delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(delay).await;
            }
            if let Some(cache) = me.upgrade() {
                if let Err(e) = cache.flush_index() {
                    warn!(error = %e, "version index flush failed");
                }
            }
        });
        *self.flush_task.borrow_mut() = Some(task);
    }
}

impl std::fmt::Debug for TemplateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateCache")
            .field("templates", &self.templates.borrow().len())
            .field("flush_pending", &self.flush_pending.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use tessel_core::ExchangeResponse;
    use tessel_store::MemoryStore;
    use tokio::task::LocalSet;

    // ── fakes ───────────────────────────────────────────────────────

    #[derive(Default)]
    struct TemplateServer {
        templates: RefCell<HashMap<String, TemplatePayload>>,
        statics: RefCell<HashMap<String, TemplatePayload>>,
        exchanges: Cell<usize>,
        static_fetches: Cell<usize>,
    }

    impl TemplateServer {
        fn publish(&self, component: &str, version: &str, html: &str) {
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
    }

    #[async_trait(?Send)]
    impl Transport for TemplateServer {
        async fn exchange(
            &self,
            request: &ExchangeRequest,
        ) -> tessel_transport::Result<ExchangeResponse> {
            self.exchanges.set(self.exchanges.get() + 1);
            let templates = request
                .templates
                .iter()
                .filter_map(|probe| self.templates.borrow().get(&probe.component).cloned())
                .collect();
            Ok(ExchangeResponse::new(Vec::new(), templates))
        }

        async fn fetch_static_template(
            &self,
            component: &str,
        ) -> tessel_transport::Result<TemplatePayload> {
            self.static_fetches.set(self.static_fetches.get() + 1);
            self.statics
                .borrow()
                .get(component)
                .cloned()
                .ok_or(tessel_transport::TransportError::NoStaticLocation)
        }
    }

    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        writes: RefCell<Vec<String>>,
    }

    impl LocalStore for CountingStore {
        fn get(&self, key: &str) -> tessel_store::Result<Option<String>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> tessel_store::Result<()> {
            self.writes.borrow_mut().push(key.to_owned());
            self.inner.set(key, value)
        }
    }

    impl CountingStore {
        fn writes_to(&self, key: &str) -> usize {
            self.writes.borrow().iter().filter(|k| *k == key).count()
        }
    }

    fn fixture() -> (Rc<TemplateServer>, Rc<CountingStore>, Rc<TemplateCache>) {
        let server = Rc::new(TemplateServer::default());
        let store = Rc::new(CountingStore::default());
        let cache = TemplateCache::new(store.clone(), server.clone(), Duration::ZERO);
        (server, store, cache)
    }

    // ── markup ──────────────────────────────────────────────────────

    #[test]
    fn shorthand_becomes_rune_slot() {
        let html = normalize_markup("<p>{{$count}} / {{ $total }}</p>").unwrap();
        assert_eq!(
            html,
            r#"<p><rune data-var="count"></rune> / <rune data-var="total"></rune></p>"#
        );
    }

    #[test]
    fn rune_key_needs_a_single_slot_and_no_other_reference() {
        let html = normalize_markup(
            "<p>{{$count}}</p><p>{{$twice}}{{$twice}}</p><p>{{$step}} {{ step + 1 }}</p><p>{{ label }}</p>",
        )
        .unwrap();
        let keys: Vec<String> = ["count", "twice", "step", "label", "absent"]
            .iter()
            .map(|k| (*k).to_owned())
            .collect();
        let runes = rune_keys(&html, &keys).unwrap();
        assert_eq!(runes.into_iter().collect::<Vec<_>>(), vec!["count"]);
    }

    // ── get_or_fetch ────────────────────────────────────────────────

    #[tokio::test]
    async fn stale_version_triggers_exactly_one_fetch() {
        LocalSet::new()
            .run_until(async {
                let (server, store, cache) = fixture();
                server.publish("counter", "v1", "<p>{{$count}}</p>");
                let v1 = cache.get_or_fetch("counter", "", Mode::Server).await.unwrap();
                assert_eq!(v1.version, "v1");
                assert_eq!(server.exchanges.get(), 1);

                server.publish("counter", "v2", "<b>{{$count}}</b>");
                let v2 = cache.get_or_fetch("counter", "v2", Mode::Server).await.unwrap();
                assert_eq!(v2.version, "v2");
                assert_eq!(server.exchanges.get(), 2);
                assert_eq!(cache.get("counter").unwrap().version, "v2");
                assert_eq!(cache.local_version("counter").unwrap().as_deref(), Some("v2"));

                let again = cache.get_or_fetch("counter", "v2", Mode::Server).await.unwrap();
                assert_eq!(again.html_code, r#"<b><rune data-var="count"></rune></b>"#);
                assert_eq!(server.exchanges.get(), 2);

                cache.settle().await;
                assert!(store.inner.get(INDEX_KEY).unwrap().unwrap().contains("v2"));
            })
            .await;
    }

    #[tokio::test]
    async fn stored_copy_heals_a_stale_index() {
        LocalSet::new()
            .run_until(async {
                let (server, store, cache) = fixture();
                let template = Template {
                    component: "counter".into(),
                    version: "v3".into(),
                    ..Template::default()
                };
                store
                    .set(&template_key("counter"), &serde_json::to_string(&template).unwrap())
                    .unwrap();
                store.set(INDEX_KEY, r#"{"counter":"v1"}"#).unwrap();

                let got = cache.get_or_fetch("counter", "v3", Mode::Csr).await.unwrap();
                assert_eq!(got.version, "v3");
                assert_eq!(server.exchanges.get(), 0);
                assert_eq!(cache.local_version("counter").unwrap().as_deref(), Some("v3"));
            })
            .await;
    }

    #[tokio::test]
    async fn csr_only_uses_the_static_location() {
        LocalSet::new()
            .run_until(async {
                let (server, _store, cache) = fixture();
                let _ = server.statics.borrow_mut().insert(
                    "counter".into(),
                    TemplatePayload {
                        component: "counter".into(),
                        version: "s1".into(),
                        ..TemplatePayload::default()
                    },
                );
                let got = cache.get_or_fetch("counter", "", Mode::CsrOnly).await.unwrap();
                assert_eq!(got.version, "s1");
                assert_eq!(server.static_fetches.get(), 1);
                assert_eq!(server.exchanges.get(), 0);
            })
            .await;
    }

    #[tokio::test]
    async fn missing_template_in_response() {
        LocalSet::new()
            .run_until(async {
                let (_server, _store, cache) = fixture();
                assert_matches!(
                    cache.get_or_fetch("ghost", "", Mode::Server).await,
                    Err(RuntimeError::TemplateNotFound(name)) if name == "ghost"
                );
                assert_matches!(cache.get("ghost"), Err(RuntimeError::TemplateNotFound(_)));
            })
            .await;
    }

    // ── coalesced index flush ───────────────────────────────────────

    #[tokio::test]
    async fn many_templates_one_index_write() {
        LocalSet::new()
            .run_until(async {
                let (_server, store, cache) = fixture();
                for name in ["a", "b", "c"] {
                    let _ = cache
                        .set_from_template_response(TemplatePayload {
                            component: name.into(),
                            version: "v1".into(),
                            ..TemplatePayload::default()
                        })
                        .unwrap();
                }
                assert!(cache.flush_pending());
                assert_eq!(store.writes_to(INDEX_KEY), 0);

                cache.settle().await;
                assert!(!cache.flush_pending());
                assert_eq!(store.writes_to(INDEX_KEY), 1);
                let index: HashMap<String, String> =
                    serde_json::from_str(&store.inner.get(INDEX_KEY).unwrap().unwrap()).unwrap();
                assert_eq!(index.len(), 3);
            })
            .await;
    }

    #[tokio::test]
    async fn index_is_loaded_lazily_from_the_store() {
        LocalSet::new()
            .run_until(async {
                let (_server, store, cache) = fixture();
                store.set(INDEX_KEY, r#"{"counter":"v9"}"#).unwrap();
                assert_eq!(cache.local_version("counter").unwrap().as_deref(), Some("v9"));
                assert_eq!(cache.local_version("other").unwrap(), None);
            })
            .await;
    }
}
