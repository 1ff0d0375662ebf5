//! Authorization gate
//!
//! Request-time checks, meant to be layered in front of handlers:
//!
//! - [`AuthorizationGate::authenticate`] verifies a bearer access token and
//!   requires a live session still holding it. A valid signature alone is not
//!   enough, which is what lets sign-out revoke an unexpired token.
//! - [`AuthorizationGate::authorize`] grants when the caller's role bit is
//!   among the allowed role bits.
//! - [`AuthorizationGate::params_check`] limits a caller to its own records
//!   unless it is an admin.
//!
//! Every denial is reported as `NoPermission` without saying which check
//! failed.

use std::sync::Arc;

use thiserror::Error;

use crate::db::repositories::{SessionRepository, StoreError, UserRepository};
use crate::error::ErrorKind;
use crate::models::RoleClass;
use crate::services::session_cache::{CachedSession, SessionCache};
use crate::services::token::{TokenCodec, TokenError, TokenKind};

/// Widest role table the mask can describe
const MAX_ROLE_BITS: u32 = 63;

/// Identity attached to an authenticated request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: i64,
    pub role_id: i64,
    pub session_id: String,
}

impl AuthContext {
    pub fn is_admin(&self) -> bool {
        self.role_id == RoleClass::Admin.id()
    }
}

/// Authorization gate errors
#[derive(Debug, Error)]
pub enum GateError {
    #[error("missing credentials")]
    MissingCredentials,

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("no permission")]
    NoPermission,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GateError::MissingCredentials => ErrorKind::InvalidToken,
            GateError::Token(e) => e.kind(),
            GateError::NoPermission => ErrorKind::NoPermission,
            GateError::Store(e) => e.kind(),
        }
    }
}

/// Bitmask with one bit per role id in `1..=role_count`.
///
/// Ids outside that range contribute nothing.
pub fn role_mask(role_count: u32, role_ids: &[i64]) -> u64 {
    let width = i64::from(role_count.min(MAX_ROLE_BITS));
    role_ids
        .iter()
        .filter(|&&id| id >= 1 && id <= width)
        .fold(0, |mask, &id| mask | (1u64 << id))
}

/// Whether `role_id` is one of `allowed` within a table of `role_count` roles
pub fn role_allowed(role_count: u32, allowed: &[i64], role_id: i64) -> bool {
    role_mask(role_count, allowed) & role_mask(role_count, &[role_id]) != 0
}

/// Request-time authentication and role checks.
#[derive(Clone)]
pub struct AuthorizationGate {
    codec: TokenCodec,
    users: Arc<dyn UserRepository>,
    sessions: Arc<dyn SessionRepository>,
    cache: SessionCache,
}

impl AuthorizationGate {
    pub fn new(
        codec: TokenCodec,
        users: Arc<dyn UserRepository>,
        sessions: Arc<dyn SessionRepository>,
        cache: SessionCache,
    ) -> Self {
        Self {
            codec,
            users,
            sessions,
            cache,
        }
    }

    /// Verify an access token and require a session that still holds it.
    pub async fn authenticate(&self, access_token: &str) -> Result<AuthContext, GateError> {
        let claims = self.codec.verify_claims(access_token, TokenKind::Access)?;

        if let Some(hit) = self.cache.lookup(access_token).await {
            if hit.user_id == claims.user_id {
                return Ok(AuthContext {
                    user_id: claims.user_id,
                    role_id: claims.role_id,
                    session_id: hit.session_id,
                });
            }
        }

        let Some(session_id) = self
            .sessions
            .session_id_for_access_token(claims.user_id, access_token)
            .await?
        else {
            tracing::warn!(user_id = claims.user_id, "access token has no live session");
            return Err(GateError::NoPermission);
        };

        self.cache
            .remember(
                access_token,
                CachedSession {
                    user_id: claims.user_id,
                    session_id: session_id.clone(),
                },
            )
            .await;

        Ok(AuthContext {
            user_id: claims.user_id,
            role_id: claims.role_id,
            session_id,
        })
    }

    /// Grant when the caller's role is one of `allowed`.
    pub async fn authorize(&self, ctx: &AuthContext, allowed: &[i64]) -> Result<(), GateError> {
        let role_count = self.users.count_roles().await?;

        if role_allowed(role_count, allowed, ctx.role_id) {
            Ok(())
        } else {
            tracing::warn!(
                user_id = ctx.user_id,
                role_id = ctx.role_id,
                "request denied by role check"
            );
            Err(GateError::NoPermission)
        }
    }

    /// A caller may act on `user_id` only if it is that user or an admin.
    pub fn params_check(&self, ctx: &AuthContext, user_id: i64) -> Result<(), GateError> {
        if ctx.user_id == user_id || ctx.is_admin() {
            Ok(())
        } else {
            Err(GateError::NoPermission)
        }
    }

    pub fn authenticate_admin_token(&self, token: &str) -> Result<(), GateError> {
        self.codec.verify(token, TokenKind::Admin)?;
        Ok(())
    }

    pub fn authenticate_api_key(&self, token: &str) -> Result<(), GateError> {
        self.codec.verify(token, TokenKind::ApiKey)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{JwtConfig, SessionCacheConfig};
    use crate::db::repositories::{SqlxSessionRepository, SqlxUserRepository};
    use crate::db::{create_test_pool, migrations, DynDatabasePool};
    use crate::models::UserClaims;
    use crate::services::session::{SessionService, SignUpInput};
    use crate::models::Session;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    struct Fixture {
        pool: DynDatabasePool,
        service: SessionService,
        gate: AuthorizationGate,
        codec: TokenCodec,
    }

    async fn setup(cache: SessionCache) -> Fixture {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let codec = TokenCodec::new(&JwtConfig {
            secret_key: "test-secret".to_string(),
            admin_key: "test-admin".to_string(),
            api_key: "test-api".to_string(),
            ..JwtConfig::default()
        });
        let timeout = Duration::from_secs(5);
        let users = SqlxUserRepository::boxed(pool.clone(), timeout);
        let sessions = SqlxSessionRepository::boxed(pool.clone(), timeout);

        let service = SessionService::new(
            users.clone(),
            sessions.clone(),
            codec.clone(),
            cache.clone(),
        );
        let gate = AuthorizationGate::new(codec.clone(), users, sessions, cache);

        Fixture {
            pool,
            service,
            gate,
            codec,
        }
    }

    async fn signed_in(fixture: &Fixture, role: RoleClass) -> crate::models::Passport {
        fixture
            .service
            .sign_up(SignUpInput::new("ada@example.com", "ada", "password123", role))
            .await
            .unwrap();
        fixture
            .service
            .sign_in("ada@example.com", "password123")
            .await
            .unwrap()
    }

    fn ctx(user_id: i64, role_id: i64) -> AuthContext {
        AuthContext {
            user_id,
            role_id,
            session_id: "s".to_string(),
        }
    }

    // ========================================================================
    // Role mask
    // ========================================================================

    #[test]
    fn test_role_mask_layout() {
        assert_eq!(role_mask(3, &[1]), 0b0010);
        assert_eq!(role_mask(3, &[2, 3]), 0b1100);
        assert_eq!(role_mask(3, &[0, 4, -1]), 0);
    }

    #[test]
    fn test_role_allowed_any_of() {
        // three roles, user holds role 2
        assert!(role_allowed(3, &[2, 3], 2));
        assert!(role_allowed(3, &[2], 2));
        assert!(!role_allowed(3, &[1], 2));
        assert!(!role_allowed(3, &[3], 2));
        assert!(!role_allowed(3, &[], 2));
    }

    #[test]
    fn test_three_roles_user_holds_role_two() {
        assert!(role_allowed(3, &[2, 4], 2));
        // 4 is outside a three-row role table and shares no bit with role 2
        assert!(!role_allowed(3, &[4], 2));
        assert!(!role_allowed(3, &[1], 2));
    }

    #[test]
    fn test_role_outside_table_never_allowed() {
        assert!(!role_allowed(2, &[3], 3));
        assert!(!role_allowed(2, &[1, 2], 0));
    }

    proptest! {
        #[test]
        fn prop_role_allowed_matches_membership(
            role_count in 1u32..16,
            allowed in proptest::collection::vec(-2i64..20, 0..6),
            role_id in -2i64..20,
        ) {
            let in_table = role_id >= 1 && role_id <= i64::from(role_count);
            let expected = in_table && allowed.contains(&role_id);
            prop_assert_eq!(role_allowed(role_count, &allowed, role_id), expected);
        }
    }

    // ========================================================================
    // Authentication
    // ========================================================================

    #[tokio::test]
    async fn test_authenticate_live_session() {
        let fixture = setup(SessionCache::disabled()).await;
        let passport = signed_in(&fixture, RoleClass::Customer).await;

        let auth = fixture
            .gate
            .authenticate(&passport.token.access_token)
            .await
            .expect("Failed to authenticate");
        assert_eq!(auth.user_id, passport.user.id);
        assert_eq!(auth.role_id, RoleClass::Customer.id());
        assert_eq!(auth.session_id, passport.token.id);
    }

    #[tokio::test]
    async fn test_signed_out_token_is_denied() {
        let fixture = setup(SessionCache::disabled()).await;
        let passport = signed_in(&fixture, RoleClass::Customer).await;
        let token = passport.token.access_token.clone();

        fixture.service.sign_out(&passport.token.id).await.unwrap();

        // the token itself is still well-formed and unexpired
        assert!(fixture.codec.verify(&token, TokenKind::Access).is_ok());

        let err = fixture.gate.authenticate(&token).await.unwrap_err();
        assert!(matches!(err, GateError::NoPermission));
        assert_eq!(err.kind(), ErrorKind::NoPermission);
    }

    #[tokio::test]
    async fn test_signed_out_token_is_denied_with_cache() {
        let cache = SessionCache::new(&SessionCacheConfig::default());
        let fixture = setup(cache.clone()).await;
        let passport = signed_in(&fixture, RoleClass::Customer).await;
        let token = passport.token.access_token.clone();

        // warm the cache
        fixture.gate.authenticate(&token).await.unwrap();
        assert!(cache.lookup(&token).await.is_some());

        fixture.service.sign_out(&passport.token.id).await.unwrap();
        cache.sync().await;

        assert!(matches!(
            fixture.gate.authenticate(&token).await,
            Err(GateError::NoPermission)
        ));
    }

    /// Session store whose first access-token lookup stalls after reading
    struct StalledLookup {
        inner: Arc<dyn SessionRepository>,
        armed: AtomicBool,
        read_done: Notify,
        resume: Notify,
    }

    #[async_trait]
    impl SessionRepository for StalledLookup {
        async fn create(
            &self,
            user_id: i64,
            access_token: &str,
            refresh_token: &str,
        ) -> Result<String, StoreError> {
            self.inner.create(user_id, access_token, refresh_token).await
        }

        async fn find_by_refresh_token(&self, refresh_token: &str) -> Result<Session, StoreError> {
            self.inner.find_by_refresh_token(refresh_token).await
        }

        async fn session_id_for_access_token(
            &self,
            user_id: i64,
            access_token: &str,
        ) -> Result<Option<String>, StoreError> {
            let found = self
                .inner
                .session_id_for_access_token(user_id, access_token)
                .await;
            if self.armed.swap(false, Ordering::SeqCst) {
                self.read_done.notify_one();
                self.resume.notified().await;
            }
            found
        }

        async fn update_tokens(
            &self,
            id: &str,
            access_token: &str,
            refresh_token: &str,
        ) -> Result<(), StoreError> {
            self.inner.update_tokens(id, access_token, refresh_token).await
        }

        async fn delete(&self, id: &str) -> Result<(), StoreError> {
            self.inner.delete(id).await
        }
    }

    #[tokio::test]
    async fn test_sign_out_during_session_lookup_is_not_cached() {
        let cache = SessionCache::new(&SessionCacheConfig::default());
        let fixture = setup(cache.clone()).await;
        let passport = signed_in(&fixture, RoleClass::Customer).await;
        let token = passport.token.access_token.clone();

        let timeout = Duration::from_secs(5);
        let stalled = Arc::new(StalledLookup {
            inner: SqlxSessionRepository::boxed(fixture.pool.clone(), timeout),
            armed: AtomicBool::new(true),
            read_done: Notify::new(),
            resume: Notify::new(),
        });
        let gate = Arc::new(AuthorizationGate::new(
            fixture.codec.clone(),
            SqlxUserRepository::boxed(fixture.pool.clone(), timeout),
            stalled.clone(),
            cache.clone(),
        ));

        let in_flight = tokio::spawn({
            let gate = gate.clone();
            let token = token.clone();
            async move { gate.authenticate(&token).await }
        });

        // the request has seen the session live; sign out before it caches that
        stalled.read_done.notified().await;
        fixture.service.sign_out(&passport.token.id).await.unwrap();
        cache.sync().await;
        stalled.resume.notify_one();

        assert!(in_flight.await.unwrap().is_ok());
        cache.sync().await;

        assert!(cache.lookup(&token).await.is_none());
        assert!(matches!(
            gate.authenticate(&token).await,
            Err(GateError::NoPermission)
        ));
    }

    #[tokio::test]
    async fn test_rotated_access_token_is_denied_with_cache() {
        let cache = SessionCache::new(&SessionCacheConfig::default());
        let fixture = setup(cache.clone()).await;
        let passport = signed_in(&fixture, RoleClass::Customer).await;
        fixture
            .gate
            .authenticate(&passport.token.access_token)
            .await
            .unwrap();

        let rotated = fixture
            .service
            .refresh_passport(&passport.token.refresh_token)
            .await
            .unwrap();
        cache.sync().await;

        assert!(fixture
            .gate
            .authenticate(&passport.token.access_token)
            .await
            .is_err());
        assert!(fixture
            .gate
            .authenticate(&rotated.token.access_token)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_authenticate_rejects_refresh_and_garbage() {
        let fixture = setup(SessionCache::disabled()).await;
        let passport = signed_in(&fixture, RoleClass::Customer).await;

        let err = fixture
            .gate
            .authenticate(&passport.token.refresh_token)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidToken);

        let err = fixture.gate.authenticate("garbage").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidToken);
    }

    #[tokio::test]
    async fn test_forged_claims_without_session_denied() {
        let fixture = setup(SessionCache::disabled()).await;
        signed_in(&fixture, RoleClass::Customer).await;

        let forged = fixture
            .codec
            .issue(
                TokenKind::Access,
                Some(UserClaims {
                    user_id: 1,
                    role_id: 2,
                }),
            )
            .unwrap();
        assert!(matches!(
            fixture.gate.authenticate(&forged.token).await,
            Err(GateError::NoPermission)
        ));
    }

    #[tokio::test]
    async fn test_store_down_is_unavailable_not_denied() {
        let fixture = setup(SessionCache::disabled()).await;
        let passport = signed_in(&fixture, RoleClass::Customer).await;
        fixture.pool.close().await;

        let err = fixture
            .gate
            .authenticate(&passport.token.access_token)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }

    // ========================================================================
    // Authorization
    // ========================================================================

    #[tokio::test]
    async fn test_authorize_against_role_table() {
        let fixture = setup(SessionCache::disabled()).await;
        let admin = ctx(1, RoleClass::Admin.id());
        let customer = ctx(2, RoleClass::Customer.id());

        assert!(fixture.gate.authorize(&admin, &[2]).await.is_ok());
        assert!(fixture.gate.authorize(&customer, &[1, 2]).await.is_ok());
        assert!(matches!(
            fixture.gate.authorize(&customer, &[2]).await,
            Err(GateError::NoPermission)
        ));
    }

    #[tokio::test]
    async fn test_params_check() {
        let fixture = setup(SessionCache::disabled()).await;

        assert!(fixture.gate.params_check(&ctx(5, 1), 5).is_ok());
        assert!(fixture.gate.params_check(&ctx(5, 1), 6).is_err());
        assert!(fixture.gate.params_check(&ctx(9, 2), 6).is_ok());
    }

    #[tokio::test]
    async fn test_admin_token_and_api_key_checks() {
        let fixture = setup(SessionCache::disabled()).await;

        let admin = fixture.service.issue_admin_token().unwrap();
        let api_key = fixture.service.issue_api_key().unwrap();

        assert!(fixture.gate.authenticate_admin_token(&admin.token).is_ok());
        assert!(fixture.gate.authenticate_api_key(&api_key.token).is_ok());
        assert!(fixture.gate.authenticate_admin_token(&api_key.token).is_err());
        assert!(fixture.gate.authenticate_api_key(&admin.token).is_err());
    }
}
