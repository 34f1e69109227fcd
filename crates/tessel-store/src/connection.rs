//! Pooled `SQLite` connections.
//!
//! Every connection the pool hands out has WAL journaling, `NORMAL` sync and
//! the configured busy timeout applied on first acquire.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use r2d2::{CustomizeConnection, Pool};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::errors::Result;

/// Pool of store connections.
pub type ConnectionPool = Pool<SqliteConnectionManager>;

/// Where a pool's database lives.
#[derive(Clone, Copy, Debug)]
pub enum Location<'a> {
    /// A database file, created if missing.
    File(&'a str),
    /// A fresh in-memory database private to this pool.
    Memory,
}

/// Pool sizing and lock behaviour.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Upper bound on open connections.
    pub pool_size: u32,
    /// How long a statement waits on a locked database.
    pub busy_timeout: Duration,
    /// How long `get()` waits for a free connection.
    pub acquire_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            busy_timeout: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl ConnectionConfig {
    /// Build a pool for `location`.
    pub fn pool(&self, location: Location<'_>) -> Result<ConnectionPool> {
        let manager = match location {
            Location::File(path) => SqliteConnectionManager::file(path),
            // Pooled connections only see one another through a named
            // shared-cache URI, so each pool gets its own name.
            Location::Memory => SqliteConnectionManager::file(format!(
                "file:tessel-mem-{}?mode=memory&cache=shared",
                next_memory_id()
            )),
        };
        Ok(Pool::builder()
            .max_size(self.pool_size)
            .connection_timeout(self.acquire_timeout)
            .connection_customizer(Box::new(Pragmas {
                busy_timeout: self.busy_timeout,
            }))
            .build(manager)?)
    }
}

fn next_memory_id() -> usize {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug)]
struct Pragmas {
    busy_timeout: Duration,
}

impl CustomizeConnection<Connection, rusqlite::Error> for Pragmas {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        // In-memory databases answer "memory" here and stay that way.
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(self.busy_timeout)
    }
}
