//! Error types for the reconciler crate.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
///
/// Semantic refusals (`BindControlled`, `BindMismatch`, `UnbindMismatch`,
/// the propagation refusals and `SecretConflict`) are never retried blindly;
/// they need an operator or another object to change first.
#[derive(Debug, Error)]
pub enum Error {
    #[error("managed resource is controlled by another resource")]
    BindControlled,

    #[error("managed resource is bound to another claim")]
    BindMismatch,

    #[error("managed resource is not bound to this claim")]
    UnbindMismatch,

    #[error("connection secret is controlled by another resource")]
    SecretConflict,

    #[error("propagating secret has not allowed propagation to this secret")]
    PropagationNotAllowed,

    #[error("propagating secret uid does not match the recorded uid")]
    UnexpectedFromUid,

    #[error("propagating secret allows propagation to a different uid")]
    UnexpectedToUid,

    #[error("no resources matched the selector")]
    NoMatches,

    #[error("referenced field was empty (referenced resource may not yet be ready)")]
    EmptyValue,

    #[error("{reason}")]
    Configure { reason: String },

    #[error("reconcile did not finish within {after:?}")]
    Timeout { after: Duration },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// A failed step, wrapped with a stable message naming the step.
    #[error("{step}: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error(transparent)]
    Store(#[from] tether_resource::Error),
}

impl Error {
    /// Wrap `source` with the name of the step that failed.
    pub fn step(step: &'static str, source: impl Into<Self>) -> Self {
        Self::Step {
            step,
            source: Box::new(source.into()),
        }
    }

    /// Create a configure error.
    pub fn configure(reason: impl Into<String>) -> Self {
        Self::Configure {
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// The innermost error, looking through step wrappers.
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::Step { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// The outermost step message, if any.
    pub fn step_message(&self) -> Option<&'static str> {
        match self {
            Self::Step { step, .. } => Some(*step),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root_cause(), Self::Store(e) if e.is_not_found())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self.root_cause(), Self::Store(e) if e.is_conflict())
    }

    /// Whether this error needs something other than time to resolve.
    pub fn is_refusal(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::BindControlled
                | Self::BindMismatch
                | Self::UnbindMismatch
                | Self::SecretConflict
                | Self::PropagationNotAllowed
                | Self::UnexpectedFromUid
                | Self::UnexpectedToUid
        )
    }
}

/// Attach a stable step message to a fallible result.
pub trait StepExt<T> {
    fn step(self, step: &'static str) -> Result<T>;
}

impl<T, E: Into<Error>> StepExt<T> for std::result::Result<T, E> {
    fn step(self, step: &'static str) -> Result<T> {
        self.map_err(|e| Error::step(step, e))
    }
}
