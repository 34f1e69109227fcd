//! # tessel-store
//!
//! Durable local key-value storage used by the Tessel runtime for template
//! bodies, the template version index, and per-component variable snapshots.
//!
//! - [`LocalStore`]: string key to string value `get`/`set`/`has`
//! - [`MemoryStore`]: process-local map, used in tests and ephemeral hosts
//! - [`SqliteStore`]: `SQLite` backend over an `r2d2` pool with embedded migrations
//!
//! Last-writer-wins per key; no transactions span keys, no expiry.

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod memory;
pub mod migrations;
pub mod sqlite;

pub use connection::{ConnectionConfig, ConnectionPool, Location};
pub use errors::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// String-keyed durable store.
///
/// Implementations must be usable from synchronous code: the render path
/// reads and writes snapshots between suspension points.
pub trait LocalStore {
    /// Read the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Whether a value is stored under `key`.
    fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}
