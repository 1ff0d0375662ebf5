//! Session model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UserProfile;

/// Persisted refresh grant linking a user to its current token pair.
///
/// The row's existence is what keeps the access token usable; deleting it
/// revokes the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Session ID (uuid)
    pub id: String,
    pub user_id: i64,
    pub access_token: String,
    pub refresh_token: String,
    pub created_at: DateTime<Utc>,
}

/// What a caller gets back after signing in or refreshing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Passport {
    pub user: UserProfile,
    pub token: PassportToken,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassportToken {
    /// Session id, needed to sign out
    pub id: String,
    pub access_token: String,
    pub refresh_token: String,
}
