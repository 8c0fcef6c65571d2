//! Error taxonomy of the resource store.

use std::fmt;

use octonode_core::{CoreError, Identity, Phase, Version};

/// Errors that can occur during store operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StateError {
    /// The identity is not present in the store.
    #[error("Resource not found: {identity}")]
    NotFound {
        /// The identity that was looked up.
        identity: Identity,
    },

    /// A create collided with a live resource.
    #[error("Resource already exists: {identity}")]
    AlreadyExists {
        /// The identity that already exists.
        identity: Identity,
    },

    /// The caller's expected version is stale.
    #[error("Version conflict on {identity}: expected {expected}, found {actual}")]
    Conflict {
        /// The resource being mutated.
        identity: Identity,
        /// The version the caller observed.
        expected: Version,
        /// The version currently stored.
        actual: Version,
    },

    /// The writer has no authority over the resource.
    #[error("Ownership violation on {identity}: owned by '{owner}', write attempted by '{writer}'")]
    OwnershipViolation {
        /// The resource being mutated.
        identity: Identity,
        /// The current owner (empty for unowned resources).
        owner: String,
        /// The writer that attempted the mutation.
        writer: String,
    },

    /// Destroy attempted while finalizers are still attached.
    #[error("Finalizers present on {identity}: {finalizers:?}")]
    FinalizersPresent {
        /// The resource being destroyed.
        identity: Identity,
        /// The finalizers blocking destruction.
        finalizers: Vec<String>,
    },

    /// The conflict-retry helper gave up.
    #[error("Retry exhausted on {identity} after {attempts} attempts")]
    RetryExhausted {
        /// The resource being mutated.
        identity: Identity,
        /// Number of attempts made.
        attempts: u32,
    },

    /// The mutation is not allowed in the resource's current phase.
    #[error("Resource {identity} is in phase {phase}")]
    InvalidPhase {
        /// The resource being mutated.
        identity: Identity,
        /// Its current phase.
        phase: Phase,
    },

    /// The resource failed identity or shape validation.
    #[error("Invalid resource {identity}: {message}")]
    InvalidResource {
        /// The offending identity.
        identity: Identity,
        /// Why it was rejected.
        message: String,
    },

    /// The operation was cancelled before it reached the store.
    #[error("Operation cancelled")]
    Cancelled,

    /// An internal store error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl StateError {
    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(identity: &Identity) -> Self {
        Self::NotFound {
            identity: identity.clone(),
        }
    }

    /// Creates a new `AlreadyExists` error.
    #[must_use]
    pub fn already_exists(identity: &Identity) -> Self {
        Self::AlreadyExists {
            identity: identity.clone(),
        }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict(identity: &Identity, expected: Version, actual: Version) -> Self {
        Self::Conflict {
            identity: identity.clone(),
            expected,
            actual,
        }
    }

    /// Creates a new `OwnershipViolation` error.
    #[must_use]
    pub fn ownership_violation(
        identity: &Identity,
        owner: impl Into<String>,
        writer: impl Into<String>,
    ) -> Self {
        Self::OwnershipViolation {
            identity: identity.clone(),
            owner: owner.into(),
            writer: writer.into(),
        }
    }

    /// Creates a new `FinalizersPresent` error.
    #[must_use]
    pub fn finalizers_present<'a>(
        identity: &Identity,
        finalizers: impl IntoIterator<Item = &'a String>,
    ) -> Self {
        Self::FinalizersPresent {
            identity: identity.clone(),
            finalizers: finalizers.into_iter().cloned().collect(),
        }
    }

    /// Creates a new `RetryExhausted` error.
    #[must_use]
    pub fn retry_exhausted(identity: &Identity, attempts: u32) -> Self {
        Self::RetryExhausted {
            identity: identity.clone(),
            attempts,
        }
    }

    /// Creates a new `InvalidPhase` error.
    #[must_use]
    pub fn invalid_phase(identity: &Identity, phase: Phase) -> Self {
        Self::InvalidPhase {
            identity: identity.clone(),
            phase,
        }
    }

    /// Creates a new `InvalidResource` error.
    #[must_use]
    pub fn invalid_resource(identity: &Identity, message: impl Into<String>) -> Self {
        Self::InvalidResource {
            identity: identity.clone(),
            message: message.into(),
        }
    }

    /// Wraps a core validation error for the given identity.
    #[must_use]
    pub fn from_core(identity: &Identity, err: CoreError) -> Self {
        Self::invalid_resource(identity, err.to_string())
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a not found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if this is an already exists error.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Returns `true` if this is a version conflict error.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns `true` if this is an ownership violation.
    #[must_use]
    pub fn is_ownership_violation(&self) -> bool {
        matches!(self, Self::OwnershipViolation { .. })
    }

    /// Returns `true` if destruction was blocked by finalizers.
    #[must_use]
    pub fn is_finalizers_present(&self) -> bool {
        matches!(self, Self::FinalizersPresent { .. })
    }

    /// Returns `true` if the operation was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns the error category for logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::AlreadyExists { .. } | Self::Conflict { .. } => ErrorCategory::Conflict,
            Self::OwnershipViolation { .. } | Self::FinalizersPresent { .. } => {
                ErrorCategory::Programming
            }
            Self::RetryExhausted { .. } => ErrorCategory::Degraded,
            Self::InvalidPhase { .. } | Self::InvalidResource { .. } => ErrorCategory::Validation,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

/// Categories of store errors for logging and propagation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Identity absent; transient during watch-driven reads.
    NotFound,
    /// Expected under concurrent writers; handled by retry.
    Conflict,
    /// Ownership or finalizer misuse; reported, pass retried later.
    Programming,
    /// Convergence degraded after retries ran out.
    Degraded,
    /// Shape or phase validation failure.
    Validation,
    /// Shutdown in progress.
    Cancelled,
    /// Internal error.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::Conflict => write!(f, "conflict"),
            Self::Programming => write!(f, "programming"),
            Self::Degraded => write!(f, "degraded"),
            Self::Validation => write!(f, "validation"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
