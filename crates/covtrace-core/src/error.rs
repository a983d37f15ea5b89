// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Covtrace engine.

use strum::Display;
use thiserror::Error;

/// The primary error type used across all Covtrace collaborator traits and services.
#[derive(Debug, Error)]
pub enum CovtraceError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Missing or malformed caller input. Never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown user, device, message or operation. Never retried.
    #[error("{kind} not found: {key}")]
    NotFound { kind: String, key: String },

    /// The request is well formed but the system is not in a state that allows it.
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// Durable store failure (connection, query, migration, transaction).
    #[error("persistence error: {source}")]
    Persistence {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Ephemeral key/value store failure.
    #[error("ephemeral store error: {source}")]
    Ephemeral {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Push gateway failure. `transient` failures are eligible for retry.
    #[error("delivery error: {message}")]
    Delivery {
        message: String,
        transient: bool,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Status class reported to callers of the request/response surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ErrorCode {
    InvalidArgument,
    NotFound,
    FailedPrecondition,
    Internal,
}

impl CovtraceError {
    /// Shorthand for a [`CovtraceError::NotFound`].
    pub fn not_found(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            key: key.into(),
        }
    }

    /// Shorthand for a transient [`CovtraceError::Delivery`] without a source.
    pub fn transient_delivery(message: impl Into<String>) -> Self {
        Self::Delivery {
            message: message.into(),
            transient: true,
            source: None,
        }
    }

    /// Shorthand for a permanent [`CovtraceError::Delivery`] without a source.
    pub fn permanent_delivery(message: impl Into<String>) -> Self {
        Self::Delivery {
            message: message.into(),
            transient: false,
            source: None,
        }
    }

    /// Status class for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::FailedPrecondition(_) => ErrorCode::FailedPrecondition,
            Self::Config(_)
            | Self::Persistence { .. }
            | Self::Ephemeral { .. }
            | Self::Delivery { .. }
            | Self::Timeout { .. }
            | Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Whether a retry of the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Delivery { transient, .. } => *transient,
            Self::Timeout { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_taxonomy() {
        assert_eq!(
            CovtraceError::InvalidArgument("title".into()).code(),
            ErrorCode::InvalidArgument
        );
        assert_eq!(
            CovtraceError::not_found("user", "+100").code(),
            ErrorCode::NotFound
        );
        assert_eq!(
            CovtraceError::FailedPrecondition("not positive".into()).code(),
            ErrorCode::FailedPrecondition
        );
        assert_eq!(
            CovtraceError::Persistence {
                source: Box::new(std::io::Error::other("disk"))
            }
            .code(),
            ErrorCode::Internal
        );
        assert_eq!(
            CovtraceError::transient_delivery("503").code(),
            ErrorCode::Internal
        );
    }

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(CovtraceError::transient_delivery("503").is_transient());
        assert!(
            CovtraceError::Timeout {
                duration: std::time::Duration::from_secs(1)
            }
            .is_transient()
        );
        assert!(!CovtraceError::permanent_delivery("400").is_transient());
        assert!(!CovtraceError::InvalidArgument("x".into()).is_transient());
    }

    #[test]
    fn not_found_message_names_kind_and_key() {
        let err = CovtraceError::not_found("user", "+15550100");
        assert_eq!(err.to_string(), "user not found: +15550100");
    }
}
