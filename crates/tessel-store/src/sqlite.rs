//! `SQLite`-backed store.

use rusqlite::{OptionalExtension, params};
use tracing::{debug, instrument};

use crate::LocalStore;
use crate::connection::{ConnectionConfig, ConnectionPool, Location};
use crate::errors::Result;
use crate::migrations::migrate;

/// A [`LocalStore`] persisted in a single `kv` table.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: ConnectionPool,
}

impl SqliteStore {
    /// Open (or create) a store at `path` and apply pending migrations.
    #[instrument(skip(config))]
    pub fn open(path: &str, config: &ConnectionConfig) -> Result<Self> {
        Self::from_pool(config.pool(Location::File(path))?)
    }

    /// Open a private in-memory store.
    pub fn in_memory(config: &ConnectionConfig) -> Result<Self> {
        Self::from_pool(config.pool(Location::Memory)?)
    }

    /// Wrap an existing pool and apply pending migrations.
    pub fn from_pool(pool: ConnectionPool) -> Result<Self> {
        let conn = pool.get()?;
        let applied = migrate(&conn)?;
        debug!(applied = applied.len(), "store ready");
        Ok(Self { pool })
    }

    /// The underlying pool.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }
}

impl LocalStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.pool.get()?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.pool.get()?;
        let _ = conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value],
        )?;
        Ok(())
    }

    fn has(&self, key: &str) -> Result<bool> {
        let conn = self.pool.get()?;
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(found.is_some())
    }
}
