//! TTL key/value caches used for analytics memoization.
//!
//! [`SqliteCache`] is shared by every engine process pointing at the same
//! database file. [`MemoryCache`] only suits a single process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::RwLock;

use super::migrations;
use super::traits::CacheStore;
use crate::error::StoreError;

fn expiry(ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// In-process cache. Expired entries are dropped when read and swept on
/// every write.
#[derive(Default)]
pub struct MemoryCache {
    data: RwLock<HashMap<String, (Vec<u8>, DateTime<Utc>)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries held, expired or not.
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut map = self.data.write().await;
        let Some((value, expires)) = map.get(key).cloned() else {
            return Ok(None);
        };
        if Utc::now() >= expires {
            map.remove(key);
            return Ok(None);
        }
        Ok(Some(value))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut map = self.data.write().await;
        map.retain(|_, (_, expires)| *expires > now);
        map.insert(key.to_string(), (value, expiry(ttl)));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.data.write().await.remove(key).is_some())
    }
}

/// Cache stored in the `cache_entries` table.
pub struct SqliteCache {
    conn: Mutex<Connection>,
}

impl SqliteCache {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|source| StoreError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_connection(conn)
    }

    pub fn open_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        migrations::migrate(&conn).map_err(|e| StoreError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM cache_entries WHERE expires_at <= ?1",
            params![Utc::now().timestamp_millis()],
        )?;
        Ok(removed)
    }
}

#[async_trait]
impl CacheStore for SqliteCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let conn = self.lock()?;
        let value = conn
            .query_row(
                "SELECT value FROM cache_entries WHERE key = ?1 AND expires_at > ?2",
                params![key, Utc::now().timestamp_millis()],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO cache_entries (key, value, expires_at) VALUES (?1, ?2, ?3)",
            params![key, value, expiry(ttl).timestamp_millis()],
        )?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
        Ok(removed > 0)
    }
}
