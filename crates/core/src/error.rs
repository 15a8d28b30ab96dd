use thiserror::Error;

/// Errors surfaced by the convergence engine and its collaborators.
#[derive(Debug, Error)]
pub enum ConvergeError {
    /// Expected absence; drives a create and is never a top-level failure.
    #[error("not_found: {0}")]
    NotFound(String),
    /// Optimistic-lock conflict: the target changed since it was read.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("already_exists: {0}")]
    AlreadyExists(String),
    #[error("generator: {0}")]
    Generator(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("hook: {0}")]
    Hook(String),
    /// A resource reached a terminal state that will not become ready on its own.
    #[error("readiness: {0}")]
    ReadinessViolation(String),
    #[error("api ({code} {reason}): {message}")]
    Api { code: u16, reason: String, message: String },
    #[error("transport: {0}")]
    Transport(String),
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ConvergeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ConvergeError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ConvergeError::Conflict(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ConvergeError::AlreadyExists(_))
    }
}

pub type Result<T, E = ConvergeError> = std::result::Result<T, E>;
