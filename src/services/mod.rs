//! Services layer
//!
//! The credential and session core:
//! - `token` - signing and verifying the four token kinds
//! - `password` - salted one-way password hashing
//! - `session` - sign-up, sign-in, refresh rotation, sign-out
//! - `authorization` - request-time session and role checks
//! - `session_cache` - short-lived memory of confirmed sessions

pub mod authorization;
pub mod password;
pub mod session;
pub mod session_cache;
pub mod token;

pub use authorization::{role_allowed, role_mask, AuthContext, AuthorizationGate, GateError};
pub use password::{hash_password, verify_password};
pub use session::{SessionService, SessionServiceError, SignUpInput};
pub use session_cache::{CachedSession, SessionCache};
pub use token::{SignedToken, TokenCodec, TokenError, TokenKind, TokenPayload};
