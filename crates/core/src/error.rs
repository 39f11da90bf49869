//! Error taxonomy for the progress engine.

/// Error type for progress operations.
pub type Result<T> = std::result::Result<T, ProgressError>;

/// Errors that can occur when mutating or querying progress.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProgressError {
    /// Non-finite or negative amount, or non-positive total
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown child key
    #[error("Not found: {0}")]
    NotFound(String),
}

impl ProgressError {
    /// Build an `InvalidArgument` error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Build a `NotFound` error for a child key.
    pub fn not_found(key: impl AsRef<str>) -> Self {
        Self::NotFound(format!("child '{}'", key.as_ref()))
    }
}
