use thiserror::Error;

/// Failure taxonomy shared by every chat operation.
///
/// Store-level write conflicts never appear here: they are retried inside the
/// message store and only surface as `Internal` once the attempt budget is spent.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type ChatResult<T> = Result<T, ChatError>;

impl ChatError {
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Message safe to hand back to a client. Internal details stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            Self::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}
