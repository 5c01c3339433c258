//! Error types shared across the engine.

use std::fmt::{Display, Formatter};

/// Shared engine result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Engine error enumeration covering business and infrastructure failures.
///
/// `Db` and `Timeout` are infrastructure outcomes: the write may or may not
/// have happened, and every core write is conditioned or idempotent, so the
/// caller may retry. The remaining variants are definite business outcomes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Store unreachable or statement failure.
    Db(String),
    /// A bounded store operation exceeded its deadline.
    Timeout(String),
    /// Malformed or missing input, detected before any write.
    Validation {
        /// Offending input field.
        field: String,
        /// Human-readable reason.
        message: String,
    },
    /// Requested entity does not exist.
    NotFound(String),
    /// Duplicate identifier or unique-constraint violation.
    AlreadyExists(String),
    /// Cancellation requested on a session that is not `in_progress`.
    NotCancellable(String),
    /// Guarded lifecycle update found the row in a non-permitting state.
    InvalidTransition(String),
}

impl AppError {
    /// Build a [`AppError::Validation`] for `field`.
    #[must_use]
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether the failure leaves the outcome unknown and the call safe to retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Db(_) | Self::Timeout(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Validation { field, message } => write!(f, "validation: {field}: {message}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::AlreadyExists(msg) => write!(f, "already exists: {msg}"),
            Self::NotCancellable(msg) => write!(f, "not cancellable: {msg}"),
            Self::InvalidTransition(msg) => write!(f, "invalid transition: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        let unique = err
            .as_database_error()
            .is_some_and(|db_err| db_err.is_unique_violation());
        if unique {
            Self::AlreadyExists(err.to_string())
        } else {
            Self::Db(err.to_string())
        }
    }
}
