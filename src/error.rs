//! Error kinds shared across the core
//!
//! Every component keeps its own error enum, but each one can be reduced to an
//! [`ErrorKind`]. Only the HTTP boundary turns a kind into a status code.

use serde::Serialize;
use std::fmt;

/// Failure classes reported to callers of the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Bad input (email syntax, empty fields, malformed request)
    Validation,
    /// Duplicate email or username
    Conflict,
    /// User or session absent
    NotFound,
    /// Password mismatch
    InvalidCredential,
    /// Bad signature, algorithm, encoding or claims
    InvalidToken,
    /// Time-bound check failed
    Expired,
    /// Authenticated but not allowed
    NoPermission,
    /// Storage timeout or connectivity failure
    Unavailable,
    /// Anything else (hashing backend, row decoding)
    Internal,
}

impl ErrorKind {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::InvalidCredential => "INVALID_CREDENTIAL",
            ErrorKind::InvalidToken => "INVALID_TOKEN",
            ErrorKind::Expired => "EXPIRED",
            ErrorKind::NoPermission => "NO_PERMISSION",
            ErrorKind::Unavailable => "UNAVAILABLE",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct() {
        let kinds = [
            ErrorKind::Validation,
            ErrorKind::Conflict,
            ErrorKind::NotFound,
            ErrorKind::InvalidCredential,
            ErrorKind::InvalidToken,
            ErrorKind::Expired,
            ErrorKind::NoPermission,
            ErrorKind::Unavailable,
            ErrorKind::Internal,
        ];
        let codes: std::collections::HashSet<_> = kinds.iter().map(|k| k.code()).collect();
        assert_eq!(codes.len(), kinds.len());
    }

    #[test]
    fn test_serializes_as_code() {
        let json = serde_json::to_string(&ErrorKind::NoPermission).unwrap();
        assert_eq!(json, "\"NO_PERMISSION\"");
    }
}
