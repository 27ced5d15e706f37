// Token persistence
// Key/value stores plus the helpers that keep the token pair consistent

use anyhow::{Context, Result as AnyResult};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::OptionalExtension;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::types::TokenPair;
use crate::error::{Result, SessionError};

pub const ACCESS_TOKEN_KEY: &str = "accessToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Durable key/value capability holding the token pair
///
/// Every call is independently atomic. Nothing spans multiple keys.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Read the persisted pair
///
/// An access token without a refresh token is a torn write; it is cleaned up
/// and reported as no session.
pub async fn load_pair(store: &dyn TokenStore) -> Result<Option<TokenPair>> {
    let access = store.get(ACCESS_TOKEN_KEY).await?;
    let Some(access_token) = access else {
        return Ok(None);
    };

    match store.get(REFRESH_TOKEN_KEY).await? {
        Some(refresh_token) => Ok(Some(TokenPair {
            access_token,
            refresh_token,
        })),
        None => {
            tracing::warn!("Stored access token has no refresh token, discarding it");
            clear_pair(store).await?;
            Ok(None)
        }
    }
}

/// Persist both tokens, refresh first
///
/// If the access token write fails the previous refresh token is restored
/// (or removed when there was none), so a reader never sees an access token
/// without its partner and an existing pair survives a failed replacement.
pub async fn save_pair(store: &dyn TokenStore, pair: &TokenPair) -> Result<()> {
    let previous_refresh = store.get(REFRESH_TOKEN_KEY).await?;
    store.set(REFRESH_TOKEN_KEY, &pair.refresh_token).await?;

    if let Err(e) = store.set(ACCESS_TOKEN_KEY, &pair.access_token).await {
        tracing::error!("Failed to persist access token: {}", e);
        let rollback = match previous_refresh.as_deref() {
            Some(refresh) => store.set(REFRESH_TOKEN_KEY, refresh).await,
            None => store.remove(REFRESH_TOKEN_KEY).await,
        };
        if let Err(rollback) = rollback {
            tracing::error!("Failed to roll back refresh token: {}", rollback);
        }
        return Err(e);
    }

    Ok(())
}

/// Remove both tokens, access first
pub async fn clear_pair(store: &dyn TokenStore) -> Result<()> {
    store.remove(ACCESS_TOKEN_KEY).await?;
    store.remove(REFRESH_TOKEN_KEY).await?;
    Ok(())
}

/// In-process store, lost on exit
#[derive(Default)]
pub struct MemoryTokenStore {
    entries: tokio::sync::Mutex<HashMap<String, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a pair, as if a previous run had logged in
    pub fn with_pair(pair: &TokenPair) -> Self {
        let mut entries = HashMap::new();
        entries.insert(ACCESS_TOKEN_KEY.to_string(), pair.access_token.clone());
        entries.insert(REFRESH_TOKEN_KEY.to_string(), pair.refresh_token.clone());
        Self {
            entries: tokio::sync::Mutex::new(entries),
        }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

/// SQLite-backed store using a single `auth_kv` table
pub struct SqliteTokenStore {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl SqliteTokenStore {
    /// Open (or create) the database file
    pub fn open(path: &Path) -> AnyResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create directory: {}", parent.display())
                })?;
            }
        }

        let conn = rusqlite::Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> AnyResult<Self> {
        let conn = rusqlite::Connection::open_in_memory()
            .context("Failed to open in-memory SQLite database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: rusqlite::Connection) -> AnyResult<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS auth_kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )
        .context("Failed to create auth_kv table")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool
    async fn with_conn<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> AnyResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| anyhow::anyhow!("SQLite connection lock poisoned"))?;
            op(&*guard)
        })
        .await
        .map_err(|e| SessionError::StorageFailure(format!("Storage task failed: {}", e)))?
        .map_err(SessionError::storage)
    }
}

#[async_trait]
impl TokenStore for SqliteTokenStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT value FROM auth_kv WHERE key = ?",
                [&key],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("Failed to read {} from SQLite", key))
        })
        .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO auth_kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                [&key, &value, &Utc::now().to_rfc3339()],
            )
            .with_context(|| format!("Failed to write {} to SQLite", key))?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM auth_kv WHERE key = ?", [&key])
                .with_context(|| format!("Failed to delete {} from SQLite", key))?;
            Ok(())
        })
        .await
    }
}
