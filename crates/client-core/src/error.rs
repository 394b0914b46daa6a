use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad failure category used for surfacing and retry behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid input or unsupported configuration.
    Config,
    /// Missing or rejected credential.
    Auth,
    /// Transport failure; the request could not complete.
    Network,
    /// Request completed but the backend refused it.
    Rejected,
    /// Response or event bytes could not be decoded.
    Serialization,
    /// Client bug or invariant break.
    Internal,
}

/// Stable error payload surfaced across the client boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct ClientError {
    /// High-level failure category.
    pub category: ErrorCategory,
    /// Stable machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional retry hint in milliseconds.
    pub retry_after_ms: Option<u64>,
}

impl ClientError {
    pub fn new(
        category: ErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Attach a retry hint to the error.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(retry_after.as_millis() as u64);
        self
    }

    /// Standard error for requests attempted without a stored credential.
    ///
    /// Raised before any network call is made.
    pub fn auth_missing() -> Self {
        Self::new(
            ErrorCategory::Auth,
            "credential_missing",
            "no credential available; request not attempted",
        )
    }

    /// Whether a retry (or later user action) can plausibly succeed.
    ///
    /// Transport failures and backend rejections are local, recoverable
    /// conditions; nothing in this taxonomy is fatal to the process.
    pub fn is_retryable(&self) -> bool {
        matches!(self.category, ErrorCategory::Network | ErrorCategory::Rejected)
    }
}

/// Map HTTP status codes to failure categories.
pub fn classify_http_status(status: u16) -> ErrorCategory {
    match status {
        401 | 403 => ErrorCategory::Auth,
        400..=499 => ErrorCategory::Rejected,
        500..=599 => ErrorCategory::Network,
        _ => ErrorCategory::Internal,
    }
}
