//! Data models
//!
//! Records persisted by the credential store and the values handed back to
//! callers after authentication.

mod session;
mod user;

pub use session::{Passport, PassportToken, Session};
pub use user::{RoleClass, User, UserClaims, UserProfile};
