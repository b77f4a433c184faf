//! Crate-wide error types.

use thiserror::Error;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type.
///
/// Delivery failures use [`DeliveryError`] instead; they are handled inside the
/// engine and never reach the caller of the facade.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

/// Classification of a failed delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum DeliveryErrorKind {
    /// The channel does not exist on this runtime. Permanent.
    NotSupported,
    /// The user declined or revoked permission. Permanent until re-requested.
    PermissionDenied,
    /// Network or platform hiccup. Retried with backoff.
    TransientFailure,
}

/// Error raised by a platform channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("channel not supported: {0}")]
    NotSupported(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("transient delivery failure: {0}")]
    TransientFailure(String),
}

impl DeliveryError {
    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported(msg.into())
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientFailure(msg.into())
    }

    pub fn kind(&self) -> DeliveryErrorKind {
        match self {
            Self::NotSupported(_) => DeliveryErrorKind::NotSupported,
            Self::PermissionDenied(_) => DeliveryErrorKind::PermissionDenied,
            Self::TransientFailure(_) => DeliveryErrorKind::TransientFailure,
        }
    }

    /// Whether the retry controller should try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientFailure(_))
    }

    /// Whether the envelope should be parked in the delivery queue.
    pub fn is_queueable(&self) -> bool {
        matches!(self, Self::NotSupported(_) | Self::PermissionDenied(_))
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(e: reqwest::Error) -> Self {
        // Builder errors are misconfiguration; anything on the wire may succeed later.
        if e.is_builder() {
            Self::NotSupported(e.to_string())
        } else {
            Self::TransientFailure(e.to_string())
        }
    }
}
