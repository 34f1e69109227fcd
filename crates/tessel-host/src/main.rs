//! # tessel-host
//!
//! Headless host binary: wires settings, store, transport, and a session
//! together, mounts one component into an in-memory surface, and prints the
//! resulting markup.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{Map, Value};
use tessel_core::logging::init_subscriber;
use tessel_runtime::{
    ComponentFactories, MarkupRenderer, MemoryNode, Session, SessionDeps,
};
use tessel_settings::{TesselSettings, load_settings, load_settings_from_path};
use tessel_store::{ConnectionConfig, LocalStore, MemoryStore, SqliteStore};
use tessel_transport::HttpTransport;
use tokio::task::LocalSet;
use tracing::{info, warn};

/// Mount a component headlessly and print its markup.
#[derive(Parser, Debug)]
#[command(name = "tessel-host", about = "Mount a Tessel component and print its markup")]
struct Cli {
    /// Component name.
    component: String,

    /// Instance id.
    #[arg(long)]
    id: Option<String>,

    /// Initial variables as a JSON object.
    #[arg(long, default_value = "{}")]
    vars: String,

    /// Interaction mode (defaults to the configured one).
    #[arg(long)]
    mode: Option<String>,

    /// Interact once more after mounting, in this mode.
    #[arg(long)]
    react: Option<String>,

    /// Settings file (defaults to `~/.tessel/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// `SQLite` store path (overrides settings).
    #[arg(long)]
    db_path: Option<PathBuf>,
}

fn parse_vars(raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str(raw).context("--vars is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("--vars must be a JSON object, got {other}"),
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

fn open_store(settings: &TesselSettings, db_path: Option<&Path>) -> Result<Rc<dyn LocalStore>> {
    let path = db_path
        .map(Path::to_path_buf)
        .or_else(|| settings.store.path.as_ref().map(PathBuf::from));
    let Some(path) = path else {
        info!("no store path configured, state is kept in memory");
        return Ok(Rc::new(MemoryStore::new()));
    };
    ensure_parent_dir(&path)?;
    let config = ConnectionConfig {
        pool_size: settings.store.pool_size,
        ..ConnectionConfig::default()
    };
    let path_str = path.to_string_lossy();
    let store = SqliteStore::open(&path_str, &config)
        .with_context(|| format!("Failed to open store: {}", path.display()))?;
    info!(path = %path.display(), "store opened");
    Ok(Rc::new(store))
}

async fn run(cli: Cli, settings: TesselSettings, initial: Map<String, Value>) -> Result<String> {
    let store = open_store(&settings, cli.db_path.as_deref())?;
    let transport = HttpTransport::new(&settings.transport).context("Failed to build transport")?;
    info!(endpoint = transport.endpoint(), "transport ready");

    let session = Session::new(
        &settings,
        SessionDeps {
            transport: Rc::new(transport),
            store,
            renderer: Rc::new(MarkupRenderer::new()),
            factories: ComponentFactories::with_data_fallback(),
        },
    )
    .context("Failed to create session")?;

    let root = MemoryNode::root();
    let component_id = session
        .start(
            root.clone(),
            &cli.component,
            cli.id.as_deref(),
            initial,
            cli.mode.as_deref(),
        )
        .await
        .with_context(|| format!("Failed to start component {}", cli.component))?
        .with_context(|| format!("Component {} was created by another flow", cli.component))?;

    if let Some(mode) = cli.react.as_deref() {
        session
            .react_str(&component_id, Some(mode))
            .await
            .with_context(|| format!("Interaction on {component_id} failed"))?;
    }

    session.settle().await;
    let markup = root.compose();
    if let Err(e) = session.shutdown().await {
        warn!(error = %e, "shutdown incomplete");
    }
    Ok(markup)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match cli.settings.as_deref() {
        Some(path) => load_settings_from_path(path),
        None => load_settings(),
    }
    .context("Failed to load settings")?;
    settings.validate().context("Invalid settings")?;
    let _ = init_subscriber(settings.logging.level.directive(), settings.logging.json);

    let initial = parse_vars(&cli.vars)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")?;
    let markup = LocalSet::new().block_on(&runtime, run(cli, settings, initial))?;
    println!("{markup}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vars_must_be_an_object() {
        assert_eq!(parse_vars(r#"{"count": 1}"#).unwrap()["count"], 1);
        assert!(parse_vars("[1]").is_err());
        assert!(parse_vars("{").is_err());
    }

    #[test]
    fn cli_parses_flags() {
        let cli = Cli::try_parse_from([
            "tessel-host",
            "counter",
            "--id",
            "a",
            "--mode",
            "CSR_ONLY",
            "--vars",
            r#"{"count": 2}"#,
        ])
        .unwrap();
        assert_eq!(cli.component, "counter");
        assert_eq!(cli.id.as_deref(), Some("a"));
        assert_eq!(cli.mode.as_deref(), Some("CSR_ONLY"));
        assert!(cli.react.is_none());
    }

    #[test]
    fn store_defaults_to_memory() {
        let settings = TesselSettings::default();
        assert!(open_store(&settings, None).is_ok());
    }

    #[test]
    fn store_opens_sqlite_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tessel.db");
        let store = open_store(&TesselSettings::default(), Some(&path)).unwrap();
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        assert!(path.exists());
    }
}
