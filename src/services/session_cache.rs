//! Revocation cache
//!
//! Short-lived memory of access tokens the store has already confirmed to
//! belong to a live session. It only saves point lookups; the session table
//! stays the source of truth. Sign-out revokes a session id and rotation
//! revokes the superseded access token; revoked keys are refused until well
//! after any entry cached before the revocation has expired.

use moka::future::Cache;
use std::time::Duration;

use crate::config::SessionCacheConfig;

/// What the cache remembers about a confirmed access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedSession {
    pub user_id: i64,
    pub session_id: String,
}

/// Something revoked since a request may have read it as live
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Revoked {
    Session(String),
    Token(String),
}

#[derive(Clone)]
struct Inner {
    live: Cache<String, CachedSession>,
    // Outlives any live entry so a late `remember` cannot resurrect a revocation
    revoked: Cache<Revoked, ()>,
}

/// Access-token keyed cache of live sessions. Cheap to clone.
#[derive(Clone)]
pub struct SessionCache {
    inner: Option<Inner>,
}

impl std::fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCache")
            .field("enabled", &self.inner.is_some())
            .field(
                "entry_count",
                &self.inner.as_ref().map(|c| c.live.entry_count()).unwrap_or(0),
            )
            .finish()
    }
}

impl SessionCache {
    pub fn new(config: &SessionCacheConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }

        let ttl = Duration::from_secs(config.ttl_seconds);
        let live = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(ttl)
            .support_invalidation_closures()
            .build();
        // Unbounded so tombstones are never evicted before they expire
        let revoked = Cache::builder().time_to_live(ttl * 2).build();

        Self {
            inner: Some(Inner { live, revoked }),
        }
    }

    /// A cache that never remembers anything
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub async fn lookup(&self, access_token: &str) -> Option<CachedSession> {
        let inner = self.inner.as_ref()?;
        let hit = inner.live.get(access_token).await;

        if let Some(entry) = &hit {
            if inner.is_revoked(access_token, &entry.session_id) {
                inner.live.invalidate(access_token).await;
                tracing::debug!("session cache entry was revoked");
                return None;
            }
        }

        tracing::debug!(hit = hit.is_some(), "session cache lookup");
        hit
    }

    /// Remember a token the store just confirmed.
    ///
    /// The store read may predate a sign-out or rotation that already ran, so
    /// revocations are checked on both sides of the insert.
    pub async fn remember(&self, access_token: &str, entry: CachedSession) {
        let Some(inner) = &self.inner else {
            return;
        };

        if inner.is_revoked(access_token, &entry.session_id) {
            return;
        }
        let session_id = entry.session_id.clone();
        inner.live.insert(access_token.to_string(), entry).await;
        if inner.is_revoked(access_token, &session_id) {
            inner.live.invalidate(access_token).await;
        }
    }

    /// Forget every token of `session_id` and refuse to cache it again.
    pub async fn revoke_session(&self, session_id: &str) {
        let Some(inner) = &self.inner else {
            return;
        };

        inner
            .revoked
            .insert(Revoked::Session(session_id.to_string()), ())
            .await;

        let target = session_id.to_string();
        if let Err(e) = inner
            .live
            .invalidate_entries_if(move |_, entry| entry.session_id == target)
        {
            tracing::warn!("Session cache predicate rejected, clearing cache: {}", e);
            inner.live.invalidate_all();
        }
    }

    /// Forget one superseded access token and refuse to cache it again.
    pub async fn revoke_token(&self, access_token: &str) {
        let Some(inner) = &self.inner else {
            return;
        };

        inner
            .revoked
            .insert(Revoked::Token(access_token.to_string()), ())
            .await;
        inner.live.invalidate(access_token).await;
    }

    /// Apply pending maintenance (expiry, invalidation) right away
    #[cfg(test)]
    pub(crate) async fn sync(&self) {
        if let Some(inner) = &self.inner {
            inner.live.run_pending_tasks().await;
            inner.revoked.run_pending_tasks().await;
        }
    }
}

impl Inner {
    fn is_revoked(&self, access_token: &str, session_id: &str) -> bool {
        self.revoked
            .contains_key(&Revoked::Session(session_id.to_string()))
            || self
                .revoked
                .contains_key(&Revoked::Token(access_token.to_string()))
    }
}
