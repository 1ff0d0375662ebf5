//! Token codec
//!
//! Issues and verifies the four token kinds as HS256 compact JWS strings.
//! Each kind fixes its subject, audience, lifetime and signing key:
//!
//! | kind    | key          | lifetime            | user claims |
//! |---------|--------------|---------------------|-------------|
//! | Access  | `secret_key` | configured          | required    |
//! | Refresh | `secret_key` | configured          | required    |
//! | Admin   | `admin_key`  | 300 s               | none        |
//! | ApiKey  | `api_key`    | 31 560 000 s        | none        |
//!
//! Verification only accepts HS256 and checks issuer, audience and subject
//! against the expected kind, so a refresh token is never taken for an access
//! token.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind as JwtErrorKind, Algorithm, DecodingKey, EncodingKey,
    Header, Validation,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::error::ErrorKind;
use crate::models::UserClaims;

/// Issuer stamped into, and required from, every token
pub const ISSUER: &str = "sessiongate";

/// Admin tokens are short-lived regardless of configuration
pub const ADMIN_TOKEN_TTL_SECONDS: i64 = 300;

/// Roughly one year
pub const API_KEY_TTL_SECONDS: i64 = 31_560_000;

const REQUIRED_CLAIMS: [&str; 6] = ["exp", "nbf", "iat", "iss", "sub", "aud"];

/// The token kinds this service understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Access,
    Refresh,
    Admin,
    ApiKey,
}

impl TokenKind {
    pub fn subject(self) -> &'static str {
        match self {
            TokenKind::Access => "access-token",
            TokenKind::Refresh => "refresh-token",
            TokenKind::Admin => "admin-token",
            TokenKind::ApiKey => "api-key",
        }
    }

    pub fn audience(self) -> &'static [&'static str] {
        match self {
            TokenKind::Access | TokenKind::Refresh => &["customer", "admin"],
            TokenKind::Admin => &["admin"],
            TokenKind::ApiKey => &["api"],
        }
    }

    /// Whether tokens of this kind embed [`UserClaims`]
    pub fn carries_claims(self) -> bool {
        matches!(self, TokenKind::Access | TokenKind::Refresh)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Access => write!(f, "access"),
            TokenKind::Refresh => write!(f, "refresh"),
            TokenKind::Admin => write!(f, "admin"),
            TokenKind::ApiKey => write!(f, "apiKey"),
        }
    }
}

/// Parse point for kind names arriving from outside the crate (`"access"`,
/// `"refresh"`, `"admin"`, `"apiKey"`, the same spelling `Display` writes).
/// Anything else is `UnsupportedKind`; inside the crate kinds are only ever
/// passed as the enum.
impl FromStr for TokenKind {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "access" => Ok(TokenKind::Access),
            "refresh" => Ok(TokenKind::Refresh),
            "admin" => Ok(TokenKind::Admin),
            "apiKey" => Ok(TokenKind::ApiKey),
            other => Err(TokenError::UnsupportedKind(other.to_string())),
        }
    }
}

/// Signed payload of every token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    pub iss: String,
    pub sub: String,
    pub aud: Vec<String>,
    pub exp: i64,
    pub nbf: i64,
    pub iat: i64,
    pub jti: String,
    /// Present on access and refresh tokens only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims: Option<UserClaims>,
}

/// An encoded token together with its expiry (unix seconds).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedToken {
    pub kind: TokenKind,
    pub token: String,
    pub expires_at: i64,
}

/// Token codec errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("unsupported token kind: {0}")]
    UnsupportedKind(String),

    #[error("{0} tokens require user claims")]
    MissingClaims(TokenKind),

    #[error("malformed token")]
    Malformed,

    #[error("token expired")]
    Expired,

    #[error("invalid token: {0}")]
    Invalid(String),

    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl TokenError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TokenError::UnsupportedKind(_) | TokenError::MissingClaims(_) => ErrorKind::Validation,
            TokenError::Malformed | TokenError::Invalid(_) => ErrorKind::InvalidToken,
            TokenError::Expired => ErrorKind::Expired,
            TokenError::Signing(_) => ErrorKind::Internal,
        }
    }
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            JwtErrorKind::ExpiredSignature => TokenError::Expired,
            JwtErrorKind::InvalidToken
            | JwtErrorKind::Base64(_)
            | JwtErrorKind::Json(_)
            | JwtErrorKind::Utf8(_) => TokenError::Malformed,
            _ => TokenError::Invalid(err.to_string()),
        }
    }
}

#[derive(Clone)]
struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl KeyPair {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// Creates and checks signed tokens.
#[derive(Clone)]
pub struct TokenCodec {
    secret: KeyPair,
    admin: KeyPair,
    api: KeyPair,
    access_ttl: i64,
    refresh_ttl: i64,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            secret: KeyPair::from_secret(&config.secret_key),
            admin: KeyPair::from_secret(&config.admin_key),
            api: KeyPair::from_secret(&config.api_key),
            access_ttl: config.access_expires_seconds,
            refresh_ttl: config.refresh_expires_seconds,
        }
    }

    fn keys(&self, kind: TokenKind) -> &KeyPair {
        match kind {
            TokenKind::Access | TokenKind::Refresh => &self.secret,
            TokenKind::Admin => &self.admin,
            TokenKind::ApiKey => &self.api,
        }
    }

    fn ttl(&self, kind: TokenKind) -> i64 {
        match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
            TokenKind::Admin => ADMIN_TOKEN_TTL_SECONDS,
            TokenKind::ApiKey => API_KEY_TTL_SECONDS,
        }
    }

    /// Issue a token of `kind`.
    ///
    /// `claims` must be present for access and refresh tokens and is dropped
    /// for admin tokens and API keys.
    pub fn issue(
        &self,
        kind: TokenKind,
        claims: Option<UserClaims>,
    ) -> Result<SignedToken, TokenError> {
        let now = Utc::now().timestamp();
        self.sign(kind, claims, now, now + self.ttl(kind))
    }

    /// Issue a refresh token whose expiry is pinned to `original_expiry`.
    ///
    /// Rotating a refresh token this way never extends the session past the
    /// first grant.
    pub fn reissue(
        &self,
        claims: UserClaims,
        original_expiry: i64,
    ) -> Result<SignedToken, TokenError> {
        let now = Utc::now().timestamp();
        self.sign(TokenKind::Refresh, Some(claims), now, original_expiry)
    }

    fn sign(
        &self,
        kind: TokenKind,
        claims: Option<UserClaims>,
        now: i64,
        expires_at: i64,
    ) -> Result<SignedToken, TokenError> {
        let claims = if kind.carries_claims() {
            Some(claims.ok_or(TokenError::MissingClaims(kind))?)
        } else {
            None
        };

        let payload = TokenPayload {
            iss: ISSUER.to_string(),
            sub: kind.subject().to_string(),
            aud: kind.audience().iter().map(|a| a.to_string()).collect(),
            exp: expires_at,
            nbf: now,
            iat: now,
            jti: Uuid::new_v4().to_string(),
            claims,
        };

        let token = encode(&Header::new(Algorithm::HS256), &payload, &self.keys(kind).encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        Ok(SignedToken {
            kind,
            token,
            expires_at,
        })
    }

    /// Verify `token` as a token of `kind` and return its payload.
    pub fn verify(&self, token: &str, kind: TokenKind) -> Result<TokenPayload, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_nbf = true;
        validation.set_required_spec_claims(&REQUIRED_CLAIMS);
        validation.set_issuer(&[ISSUER]);
        validation.set_audience(kind.audience());
        validation.sub = Some(kind.subject().to_string());

        let data = decode::<TokenPayload>(token, &self.keys(kind).decoding, &validation)?;
        let payload = data.claims;

        if kind.carries_claims() && payload.claims.is_none() {
            return Err(TokenError::Invalid("missing user claims".to_string()));
        }

        Ok(payload)
    }

    /// Verify an access or refresh token and return its user claims.
    pub fn verify_claims(&self, token: &str, kind: TokenKind) -> Result<UserClaims, TokenError> {
        self.verify(token, kind)?
            .claims
            .ok_or_else(|| TokenError::Invalid("missing user claims".to_string()))
    }
}
