use thiserror::Error;

/// Unified error type for Jig.
#[derive(Error, Debug)]
pub enum JigError {
    #[error("Invalid deployment: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Secret not found: {0}")]
    SecretNotFound(String),

    #[error("Failed to read secret {name}: {reason}")]
    SecretStore { name: String, reason: String },

    #[error("Already exists: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Build failed: {0}")]
    Build(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Internal: {0}")]
    Internal(String),
}

impl JigError {
    /// Wrap a runtime failure with the step that produced it.
    pub fn runtime(step: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        JigError::Runtime(format!("{step}: {err}"))
    }

    /// Map to HTTP status code.
    pub fn status_code(&self) -> u16 {
        match self {
            JigError::Validation(_) => 400,
            JigError::NotFound(_) => 404,
            JigError::SecretNotFound(_) => 404,
            JigError::Conflict(_) => 409,
            JigError::Unauthorized(_) => 401,
            JigError::Forbidden(_) => 403,
            JigError::Serde(_) => 400,
            _ => 500,
        }
    }

    /// JSON error body.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.to_string(),
            "status": self.status_code(),
        })
    }
}
