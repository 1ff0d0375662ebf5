//! User model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A registered user as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    /// Email address (unique)
    pub email: String,
    /// Username (unique)
    pub username: String,
    /// Password hash (argon2)
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Id of the role row this user belongs to
    pub role_id: i64,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// The public part of the record
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id,
            email: self.email.clone(),
            username: self.username.clone(),
            role_id: self.role_id,
        }
    }

    /// Claims embedded in this user's access and refresh tokens
    pub fn claims(&self) -> UserClaims {
        UserClaims {
            user_id: self.id,
            role_id: self.role_id,
        }
    }
}

/// User as exposed to callers (never carries the hash)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub role_id: i64,
}

/// Identity carried inside signed tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserClaims {
    pub user_id: i64,
    pub role_id: i64,
}

/// Permission class a user signs up into.
///
/// The discriminant is the id of the seeded row in the `roles` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleClass {
    Customer = 1,
    Admin = 2,
}

impl RoleClass {
    pub fn id(self) -> i64 {
        self as i64
    }
}

impl fmt::Display for RoleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleClass::Customer => write!(f, "customer"),
            RoleClass::Admin => write!(f, "admin"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        User {
            id: 42,
            email: "ada@example.com".to_string(),
            username: "ada".to_string(),
            password_hash: "$argon2id$secret".to_string(),
            role_id: RoleClass::Admin.id(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_profile_and_claims() {
        let user = sample_user();
        let profile = user.profile();
        assert_eq!(profile.id, 42);
        assert_eq!(profile.role_id, 2);
        assert_eq!(
            user.claims(),
            UserClaims {
                user_id: 42,
                role_id: 2
            }
        );
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let json = serde_json::to_string(&sample_user()).unwrap();
        assert!(!json.contains("password_hash"));
        assert!(!json.contains("argon2"));
    }

    #[test]
    fn test_role_class_ids() {
        assert_eq!(RoleClass::Customer.id(), 1);
        assert_eq!(RoleClass::Admin.id(), 2);
    }

    #[test]
    fn test_role_class_display() {
        assert_eq!(RoleClass::Customer.to_string(), "customer");
        assert_eq!(RoleClass::Admin.to_string(), "admin");
    }
}
