//! Runtime error types.

use std::time::Duration;

use octonode_state::{ErrorCategory, StateError};

/// Errors raised by the controller runtime and by reconcile passes.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// A controller could not be registered.
    #[error("Registration error: {0}")]
    Registration(String),

    /// Registration or start attempted on a running runtime.
    #[error("Runtime already started")]
    AlreadyStarted,

    /// The operation needs a started runtime.
    #[error("Runtime not started")]
    NotStarted,

    /// A reconcile pass failed for a controller-specific reason.
    #[error("Controller '{controller}' failed: {message}")]
    Controller {
        /// The controller name.
        controller: String,
        /// What went wrong.
        message: String,
    },

    /// A store operation failed.
    #[error(transparent)]
    State(#[from] StateError),

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// `settle` gave up before the runtime went quiet.
    #[error("Runtime did not settle within {0:?}")]
    SettleTimeout(Duration),

    /// A reconcile pass panicked.
    #[error("Controller '{controller}' panicked: {message}")]
    Panicked {
        /// The controller name.
        controller: String,
        /// The panic payload, when it was a string.
        message: String,
    },

    /// A reconcile pass ran past the configured timeout.
    #[error("Reconcile pass of '{controller}' exceeded {timeout:?}")]
    PassTimeout {
        /// The controller name.
        controller: String,
        /// The configured limit.
        timeout: Duration,
    },
}

impl RuntimeError {
    pub fn registration(message: impl Into<String>) -> Self {
        Self::Registration(message.into())
    }

    pub fn controller(controller: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Controller {
            controller: controller.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Returns `true` if the failure came from shutdown rather than a fault.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::State(e) if e.is_cancelled())
    }

    /// Logging category of the underlying store error, if any.
    #[must_use]
    pub fn state_category(&self) -> Option<ErrorCategory> {
        match self {
            Self::State(e) => Some(e.category()),
            _ => None,
        }
    }
}
