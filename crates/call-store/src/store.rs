//! In-memory call session storage with TTL expiration.

use crate::error::CallStoreError;
use crate::types::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

struct SessionEntry {
    state: CallState,
    expires_at: Instant,
}

/// Session store keyed by room and sender.
///
/// Entries expire `ttl` after their last write. A background task sweeps
/// expired entries once a minute; reads never return an expired entry.
#[derive(Clone)]
pub struct CallStore {
    sessions: Arc<RwLock<HashMap<SessionKey, SessionEntry>>>,
    ttl: Duration,
}

impl CallStore {
    /// Create a store and spawn its cleanup task.
    pub fn new(ttl: Duration) -> Self {
        let store = Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        };

        let cleanup_store = store.clone();
        tokio::spawn(async move {
            cleanup_store.cleanup_loop().await;
        });

        info!("Call session store initialized (ttl={:?})", ttl);

        store
    }

    async fn cleanup_loop(&self) {
        let cleanup_interval = Duration::from_secs(60);

        loop {
            tokio::time::sleep(cleanup_interval).await;

            let now = Instant::now();
            let mut sessions = self.sessions.write().await;
            let before_count = sessions.len();

            sessions.retain(|_, entry| entry.expires_at > now);

            let removed = before_count - sessions.len();
            if removed > 0 {
                debug!("Cleaned up {} expired call sessions", removed);
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn get(&self, key: &SessionKey) -> Option<CallState> {
        let sessions = self.sessions.read().await;
        let now = Instant::now();

        sessions
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.state.clone())
    }

    /// Store `state`, returning any live session it replaced.
    #[instrument(skip(self, state))]
    pub async fn insert(&self, key: SessionKey, state: CallState) -> Option<CallState> {
        let mut sessions = self.sessions.write().await;
        let now = Instant::now();

        let previous = sessions
            .insert(
                key.clone(),
                SessionEntry {
                    state,
                    expires_at: now + self.ttl,
                },
            )
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.state);

        if previous.is_some() {
            info!("Replaced call session for {}", key);
        }

        previous
    }

    /// Apply `f` to the live session under the write lock.
    ///
    /// The session's expiry is refreshed.
    pub async fn update<F, R>(&self, key: &SessionKey, f: F) -> Result<R, CallStoreError>
    where
        F: FnOnce(&mut CallState) -> R,
    {
        let mut sessions = self.sessions.write().await;
        let now = Instant::now();

        let entry = sessions
            .get_mut(key)
            .filter(|entry| entry.expires_at > now)
            .ok_or_else(|| CallStoreError::NotFound(key.to_string()))?;

        let result = f(&mut entry.state);
        entry.expires_at = now + self.ttl;

        Ok(result)
    }

    #[instrument(skip(self))]
    pub async fn remove(&self, key: &SessionKey) -> Option<CallState> {
        let mut sessions = self.sessions.write().await;
        let now = Instant::now();

        let removed = sessions
            .remove(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.state);

        if removed.is_some() {
            debug!("Removed call session for {}", key);
        }

        removed
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        let sessions = self.sessions.read().await;
        let now = Instant::now();
        sessions
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
