//! Session service
//!
//! Sign-up, sign-in, refresh rotation and sign-out. This is the only writer
//! of session rows.
//!
//! A session moves `Unauthenticated -> Active` on sign-in, stays `Active`
//! across refreshes, and ends when its row is deleted or its refresh token
//! expires. Refresh rotation reissues the refresh token with the expiry of the
//! token it replaces, so a session can never outlive its first grant.
//!
//! Sign-out and refresh on the same session are not fenced against each
//! other; whichever write reaches the store last wins.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::db::repositories::{SessionRepository, StoreError, UserRepository};
use crate::error::ErrorKind;
use crate::models::{Passport, PassportToken, RoleClass, User, UserProfile};
use crate::services::password::{hash_password, verify_password};
use crate::services::session_cache::SessionCache;
use crate::services::token::{SignedToken, TokenCodec, TokenError, TokenKind};

static EMAIL_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[\w.+-]+@([\w-]+\.)+[\w-]{2,}$").ok());

fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(email))
}

/// Error types for session service operations
#[derive(Debug, thiserror::Error)]
pub enum SessionServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Email is already registered")]
    EmailTaken,

    #[error("Username is already taken")]
    UsernameTaken,

    #[error("User not found")]
    UserNotFound,

    #[error("Invalid password")]
    InvalidPassword,

    #[error("Session not found")]
    SessionNotFound,

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl SessionServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionServiceError::ValidationError(_) => ErrorKind::Validation,
            SessionServiceError::EmailTaken | SessionServiceError::UsernameTaken => {
                ErrorKind::Conflict
            }
            SessionServiceError::UserNotFound | SessionServiceError::SessionNotFound => {
                ErrorKind::NotFound
            }
            SessionServiceError::InvalidPassword => ErrorKind::InvalidCredential,
            SessionServiceError::Token(e) => e.kind(),
            SessionServiceError::Store(e) => e.kind(),
            SessionServiceError::InternalError(_) => ErrorKind::Internal,
        }
    }
}

fn user_lookup(err: StoreError) -> SessionServiceError {
    match err {
        StoreError::NotFound => SessionServiceError::UserNotFound,
        other => SessionServiceError::Store(other),
    }
}

fn session_lookup(err: StoreError) -> SessionServiceError {
    match err {
        StoreError::NotFound => SessionServiceError::SessionNotFound,
        other => SessionServiceError::Store(other),
    }
}

/// Input for sign-up
#[derive(Debug, Clone)]
pub struct SignUpInput {
    pub email: String,
    pub username: String,
    pub password: String,
    pub role: RoleClass,
}

impl SignUpInput {
    pub fn new(
        email: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        role: RoleClass,
    ) -> Self {
        Self {
            email: email.into(),
            username: username.into(),
            password: password.into(),
            role,
        }
    }
}

/// Orchestrates the session lifecycle over the token codec and the store.
pub struct SessionService {
    users: Arc<dyn UserRepository>,
    sessions: Arc<dyn SessionRepository>,
    codec: TokenCodec,
    cache: SessionCache,
}

impl SessionService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        sessions: Arc<dyn SessionRepository>,
        codec: TokenCodec,
        cache: SessionCache,
    ) -> Self {
        Self {
            users,
            sessions,
            codec,
            cache,
        }
    }

    /// Register a user and return its public profile.
    ///
    /// Input is validated before the store is touched. No session is created.
    pub async fn sign_up(&self, input: SignUpInput) -> Result<UserProfile, SessionServiceError> {
        validate_sign_up(&input)?;

        let password_hash = hash_password(&input.password)?;

        let id = self
            .users
            .create(&input.email, &input.username, &password_hash, input.role.id())
            .await
            .map_err(|e| match e {
                StoreError::DuplicateEmail => SessionServiceError::EmailTaken,
                StoreError::DuplicateUsername => SessionServiceError::UsernameTaken,
                other => SessionServiceError::Store(other),
            })?;

        tracing::info!(user_id = id, role = %input.role, "user signed up");

        Ok(UserProfile {
            id,
            email: input.email,
            username: input.username,
            role_id: input.role.id(),
        })
    }

    /// Check credentials and open a new session.
    ///
    /// An unknown email is `UserNotFound` and a wrong password is
    /// `InvalidPassword`; callers facing the outside world should not tell
    /// the two apart.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Passport, SessionServiceError> {
        let user = self.users.find_by_email(email).await.map_err(user_lookup)?;

        if !verify_password(password, &user.password_hash)? {
            tracing::warn!(user_id = user.id, "sign-in rejected: wrong password");
            return Err(SessionServiceError::InvalidPassword);
        }

        let claims = user.claims();
        let access = self.codec.issue(TokenKind::Access, Some(claims))?;
        let refresh = self.codec.issue(TokenKind::Refresh, Some(claims))?;

        let session_id = self
            .sessions
            .create(user.id, &access.token, &refresh.token)
            .await?;

        tracing::info!(user_id = user.id, session_id = %session_id, "user signed in");

        Ok(passport(&user, session_id, access, refresh))
    }

    /// Rotate a session's token pair.
    ///
    /// The refresh token is verified before anything else; a bad token leaves
    /// the session untouched. The user is re-read so a changed role shows up
    /// in the new tokens.
    pub async fn refresh_passport(
        &self,
        refresh_token: &str,
    ) -> Result<Passport, SessionServiceError> {
        let payload = self.codec.verify(refresh_token, TokenKind::Refresh)?;

        let session = self
            .sessions
            .find_by_refresh_token(refresh_token)
            .await
            .map_err(session_lookup)?;

        let user = self
            .users
            .find_by_id(session.user_id)
            .await
            .map_err(user_lookup)?;

        let claims = user.claims();
        let access = self.codec.issue(TokenKind::Access, Some(claims))?;
        let refresh = self.codec.reissue(claims, payload.exp)?;

        self.sessions
            .update_tokens(&session.id, &access.token, &refresh.token)
            .await
            .map_err(session_lookup)?;
        self.cache.revoke_token(&session.access_token).await;

        tracing::info!(user_id = user.id, session_id = %session.id, "session refreshed");

        Ok(passport(&user, session.id, access, refresh))
    }

    /// End a session. Signing out twice is fine.
    pub async fn sign_out(&self, session_id: &str) -> Result<(), SessionServiceError> {
        self.sessions.delete(session_id).await?;
        self.cache.revoke_session(session_id).await;

        tracing::info!(session_id = %session_id, "session signed out");
        Ok(())
    }

    pub async fn get_profile(&self, user_id: i64) -> Result<UserProfile, SessionServiceError> {
        let user = self.users.find_by_id(user_id).await.map_err(user_lookup)?;
        Ok(user.profile())
    }

    /// Short-lived token signed with the admin key, required to create admins
    pub fn issue_admin_token(&self) -> Result<SignedToken, SessionServiceError> {
        Ok(self.codec.issue(TokenKind::Admin, None)?)
    }

    /// Long-lived key required for public sign-up
    pub fn issue_api_key(&self) -> Result<SignedToken, SessionServiceError> {
        Ok(self.codec.issue(TokenKind::ApiKey, None)?)
    }
}

fn validate_sign_up(input: &SignUpInput) -> Result<(), SessionServiceError> {
    if input.username.trim().is_empty() {
        return Err(SessionServiceError::ValidationError(
            "Username cannot be empty".to_string(),
        ));
    }

    if input.password.is_empty() {
        return Err(SessionServiceError::ValidationError(
            "Password cannot be empty".to_string(),
        ));
    }

    if !is_valid_email(&input.email) {
        return Err(SessionServiceError::ValidationError(
            "Invalid email format".to_string(),
        ));
    }

    Ok(())
}

fn passport(user: &User, session_id: String, access: SignedToken, refresh: SignedToken) -> Passport {
    Passport {
        user: user.profile(),
        token: PassportToken {
            id: session_id,
            access_token: access.token,
            refresh_token: refresh.token,
        },
    }
}
