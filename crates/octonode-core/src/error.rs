use thiserror::Error;

/// Core error types for resource identity and definitions
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid identity component '{component}': {reason}")]
    InvalidIdentity { component: String, reason: String },

    #[error("Duplicate resource definition: {0}")]
    DuplicateDefinition(String),

    #[error("Invalid resource spec: {message}")]
    InvalidSpec { message: String },

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl CoreError {
    /// Create a new InvalidIdentity error
    pub fn invalid_identity(component: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidIdentity {
            component: component.into(),
            reason: reason.into(),
        }
    }

    /// Create a new DuplicateDefinition error
    pub fn duplicate_definition(name: impl Into<String>) -> Self {
        Self::DuplicateDefinition(name.into())
    }

    /// Create a new InvalidSpec error
    pub fn invalid_spec(message: impl Into<String>) -> Self {
        Self::InvalidSpec {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::invalid_identity("con/fig", "must not contain '/'");
        assert_eq!(
            err.to_string(),
            "Invalid identity component 'con/fig': must not contain '/'"
        );

        let err = CoreError::duplicate_definition("SeccompProfile");
        assert!(err.to_string().contains("SeccompProfile"));
    }

    #[test]
    fn test_json_error_conversion() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: CoreError = parse.unwrap_err().into();
        assert!(matches!(err, CoreError::JsonError(_)));
    }
}
