//! Error types for store and object-model operations.

use thiserror::Error;

/// Result type alias for resource operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Store error types.
///
/// `NotFound` and `Conflict` are distinguishable so callers can special-case
/// them; everything else is either transient (`Unavailable`) or a programming
/// or data error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error("{kind} '{key}' not found")]
    NotFound { kind: String, key: String },

    #[error("conflict updating {kind} '{key}': {reason}")]
    Conflict {
        kind: String,
        key: String,
        reason: String,
    },

    #[error("{kind} '{key}' already exists")]
    AlreadyExists { kind: String, key: String },

    #[error("store unavailable during {operation}: {reason}")]
    Unavailable { operation: String, reason: String },

    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    #[error("invalid object: {reason}")]
    Invalid { reason: String },
}

impl Error {
    /// Create a not found error.
    pub fn not_found(kind: impl ToString, key: impl ToString) -> Self {
        Self::NotFound {
            kind: kind.to_string(),
            key: key.to_string(),
        }
    }

    /// Create a conflict error.
    pub fn conflict(kind: impl ToString, key: impl ToString, reason: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// Create an already exists error.
    pub fn already_exists(kind: impl ToString, key: impl ToString) -> Self {
        Self::AlreadyExists {
            kind: kind.to_string(),
            key: key.to_string(),
        }
    }

    /// Create a transient unavailability error.
    pub fn unavailable(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    /// Create an invalid object error.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }

    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

/// Treat a not-found error as success.
pub fn ignore_not_found(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

/// Treat an optimistic-concurrency conflict as success.
pub fn ignore_conflict(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_conflict() => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ignore_not_found() {
        assert!(ignore_not_found(Err(Error::not_found("Secret", "default/s"))).is_ok());
        assert!(ignore_not_found(Err(Error::conflict("Secret", "default/s", "stale"))).is_err());
    }

    #[test]
    fn test_ignore_conflict() {
        assert!(ignore_conflict(Err(Error::conflict("Secret", "default/s", "stale"))).is_ok());
        assert!(ignore_conflict(Err(Error::unavailable("update", "timeout"))).is_err());
    }

    #[test]
    fn test_error_display() {
        let err = Error::not_found("MySQLInstance", "default/c1");
        assert_eq!(err.to_string(), "MySQLInstance 'default/c1' not found");
    }
}
