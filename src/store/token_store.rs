use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::Storage;
use crate::errors::{SessionError, SessionResult};
use crate::models::Session;

/// In-memory view of the persisted session.
enum Cache {
    /// Nothing read from durable storage yet (first access after start).
    Cold,
    Warm(Option<Session>),
}

/// Single source of truth for one app's token pair.
///
/// Reads are served from memory once warm. `set` and `clear` hold the write
/// lock across both the durable write and the memory update, so no reader
/// ever observes a half-replaced pair.
pub struct TokenStore {
    key: String,
    storage: Arc<dyn Storage>,
    cache: RwLock<Cache>,
}

impl TokenStore {
    pub fn new(key: impl Into<String>, storage: Arc<dyn Storage>) -> Self {
        TokenStore {
            key: key.into(),
            storage,
            cache: RwLock::new(Cache::Cold),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the last stored pair, loading it from durable storage on first use.
    pub async fn get(&self) -> Option<Session> {
        if let Cache::Warm(session) = &*self.cache.read().await {
            return session.clone();
        }

        let mut cache = self.cache.write().await;
        // Another caller may have warmed the cache while we waited.
        if let Cache::Warm(session) = &*cache {
            return session.clone();
        }

        let session = self.load().await;
        *cache = Cache::Warm(session.clone());
        session
    }

    /// Current access token, if any.
    pub async fn access_token(&self) -> Option<String> {
        self.get().await.map(|session| session.access_token)
    }

    /// Replaces the stored pair.
    ///
    /// The in-memory copy is updated even when persisting fails, so the running
    /// process keeps a usable session; the error is still reported.
    pub async fn set(&self, session: Session) -> SessionResult<()> {
        let mut cache = self.cache.write().await;
        self.write(&mut cache, Some(session)).await
    }

    /// Removes both the in-memory and the durable copy.
    pub async fn clear(&self) -> SessionResult<()> {
        let mut cache = self.cache.write().await;
        self.write(&mut cache, None).await
    }

    /// Replaces the pair only if the stored access token is still `expected`.
    ///
    /// Returns `Ok(false)` without touching anything when a login, logout or
    /// other writer changed the session in the meantime.
    pub async fn replace_if_current(
        &self,
        expected: Option<&str>,
        next: Option<Session>,
    ) -> SessionResult<bool> {
        let mut cache = self.cache.write().await;
        if let Cache::Cold = &*cache {
            *cache = Cache::Warm(self.load().await);
        }

        let unchanged = match &*cache {
            Cache::Warm(current) => current.as_ref().map(|s| s.access_token.as_str()) == expected,
            Cache::Cold => false,
        };
        if !unchanged {
            debug!(key = %self.key, "Session changed concurrently; replacement skipped");
            return Ok(false);
        }

        self.write(&mut cache, next).await?;
        Ok(true)
    }

    async fn write(&self, cache: &mut Cache, next: Option<Session>) -> SessionResult<()> {
        let persisted = match &next {
            Some(session) => match serde_json::to_string(session) {
                Ok(serialized) => self.storage.put(&self.key, &serialized).await,
                Err(e) => Err(e.to_string()),
            },
            None => self.storage.delete(&self.key).await,
        };
        let stored = next.is_some();
        *cache = Cache::Warm(next);

        persisted.map_err(|e| {
            warn!(key = %self.key, error = %e, "Failed to persist session change");
            SessionError::Storage(e)
        })?;
        if stored {
            debug!(key = %self.key, "Session stored");
        } else {
            debug!(key = %self.key, "Session cleared");
        }
        Ok(())
    }

    async fn load(&self) -> Option<Session> {
        let raw = match self.storage.get(&self.key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key = %self.key, error = %e, "Failed to read persisted session");
                return None;
            }
        };

        match serde_json::from_str::<Session>(&raw) {
            Ok(session) => {
                debug!(key = %self.key, "Session restored from storage");
                Some(session)
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "Discarding unreadable persisted session");
                None
            }
        }
    }
}
