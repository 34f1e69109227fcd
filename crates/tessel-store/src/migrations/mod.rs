//! Embedded schema steps.
//!
//! Each step is a SQL file compiled into the binary. Applied steps are
//! recorded in `schema_version`; a step runs at most once, inside its own
//! transaction.

use rusqlite::{Connection, params};
use tracing::{debug, info};

use crate::errors::{Result, StoreError};

/// One schema change.
#[derive(Debug)]
pub struct Step {
    /// Monotonic step number.
    pub version: u32,
    /// Human-readable label stored alongside the version.
    pub name: &'static str,
    sql: &'static str,
}

/// Every step, oldest first.
pub const STEPS: &[Step] = &[Step {
    version: 1,
    name: "kv entries",
    sql: include_str!("v001_kv.sql"),
}];

const BOOKKEEPING: &str = "CREATE TABLE IF NOT EXISTS schema_version (
    version    INTEGER PRIMARY KEY,
    name       TEXT NOT NULL,
    applied_at TEXT NOT NULL
);";

/// Apply every step newer than the database and return their versions.
pub fn migrate(conn: &Connection) -> Result<Vec<u32>> {
    conn.execute_batch(BOOKKEEPING).map_err(|source| StoreError::Schema {
        version: 0,
        stage: "creating schema_version",
        source,
    })?;
    let from = schema_version(conn)?;
    let pending: Vec<&Step> = STEPS.iter().filter(|step| step.version > from).collect();
    if pending.is_empty() {
        debug!(version = from, "schema current");
    }
    pending
        .into_iter()
        .map(|step| apply(conn, step).map(|()| step.version))
        .collect()
}

/// Highest applied step, 0 on a fresh database.
pub fn schema_version(conn: &Connection) -> Result<u32> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| {
        row.get(0)
    })
    .map_err(|source| StoreError::Schema {
        version: 0,
        stage: "reading schema_version",
        source,
    })
}

fn apply(conn: &Connection, step: &Step) -> Result<()> {
    info!(version = step.version, name = step.name, "applying schema step");
    let at = |stage: &'static str| {
        move |source| StoreError::Schema {
            version: step.version,
            stage,
            source,
        }
    };
    let tx = conn.unchecked_transaction().map_err(at("opening a transaction"))?;
    tx.execute_batch(step.sql).map_err(at("running its SQL"))?;
    let _ = tx
        .execute(
            "INSERT INTO schema_version (version, name, applied_at) VALUES (?1, ?2, datetime('now'))",
            params![step.version, step.name],
        )
        .map_err(at("recording it"))?;
    tx.commit().map_err(at("committing"))
}
