//! Error taxonomy for the recap pipeline.
//!
//! Collaborator failures are isolated per source and per group, so these
//! errors are mostly recorded in the run report rather than propagated.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised by connectors, the language model and publishers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecapError {
    /// Network, auth, timeout or rate-limit exhaustion.
    #[error("{service} unavailable: {reason}")]
    UpstreamUnavailable {
        service: String,
        reason: String,
        /// Whether retrying may succeed (429, 5xx, connection errors).
        transient: bool,
    },

    /// The collaborator answered with something we could not interpret.
    #[error("malformed response from {service}: {reason}")]
    MalformedResponse { service: String, reason: String },

    /// The destination refused the write.
    #[error("{destination} rejected publish: {reason}")]
    PublishRejected { destination: String, reason: String },

    /// No connector produced any record.
    #[error("no activity found from any source")]
    NoActivity,
}

impl RecapError {
    /// Permanent upstream failure.
    pub fn upstream(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            service: service.into(),
            reason: reason.into(),
            transient: false,
        }
    }

    /// Upstream failure that is worth retrying.
    pub fn transient(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            service: service.into(),
            reason: reason.into(),
            transient: true,
        }
    }

    pub fn malformed(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            service: service.into(),
            reason: reason.into(),
        }
    }

    pub fn rejected(destination: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PublishRejected {
            destination: destination.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the retry policy should try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable { transient: true, .. })
    }

    /// Returns the report-level classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UpstreamUnavailable { .. } => ErrorKind::UpstreamUnavailable,
            Self::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            Self::PublishRejected { .. } => ErrorKind::PublishRejected,
            Self::NoActivity => ErrorKind::NoActivity,
        }
    }
}

/// Error classification shown in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    UpstreamUnavailable,
    MalformedResponse,
    PublishRejected,
    NoActivity,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::UpstreamUnavailable => write!(f, "UpstreamUnavailable"),
            ErrorKind::MalformedResponse => write!(f, "MalformedResponse"),
            ErrorKind::PublishRejected => write!(f, "PublishRejected"),
            ErrorKind::NoActivity => write!(f, "NoActivity"),
        }
    }
}
