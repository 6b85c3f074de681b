//! Typed application errors and the outcome alias used across Breakwater.
//!
//! `AppError` is the single error currency for expected failures: a closed
//! [`ErrorKind`] that drives control flow, a human-readable message for
//! display, the HTTP status that produced the failure (when one was
//! observed), and an optional opaque cause reachable through
//! [`std::error::Error::source`].
//!
//! The `kind` is the only field callers may branch on. Messages are for
//! humans and the status exists solely so retry policies can classify
//! transience; neither participates in control flow decisions.

use std::fmt;
use std::sync::Arc;

use crate::resilience::retry::TransientError;

/// Standard outcome type: success with a value or failure with an [`AppError`].
pub type AppResult<T> = Result<T, AppError>;

/// Closed set of failure categories.
///
/// The kind fully determines retry eligibility and user-facing labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller input was malformed (bad header, unserializable body, ...).
    Validation,
    /// Authentication missing or rejected, including post-refresh failure.
    Unauthorized,
    /// Transport-level failure; no response was obtained.
    Network,
    /// Semantic conflict reported by the server (HTTP 409).
    Conflict,
    /// Any other non-success status or unclassified failure.
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Validation => "Validation",
            Self::Unauthorized => "Unauthorized",
            Self::Network => "Network",
            Self::Conflict => "Conflict",
            Self::Unknown => "Unknown",
        };
        write!(f, "{label}")
    }
}

/// Structured application error.
///
/// Immutable once constructed; build one with the kind-specific constructors
/// and enrich it with [`AppError::with_status`] / [`AppError::with_cause`].
#[derive(Debug, Clone)]
pub struct AppError {
    kind: ErrorKind,
    message: String,
    status: Option<u16>,
    cause: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
}

impl AppError {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), status: None, cause: None }
    }

    /// Caller input malformed.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Authentication missing or rejected.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    /// Transport-level failure with no response.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    /// Semantic conflict.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    /// Unclassified failure.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    /// Attach the HTTP status that produced this failure.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach the underlying cause; exposed only through `Error::source`.
    #[must_use]
    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// The failure category.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The human-readable message (display only, never branch on it).
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The HTTP status observed when this failure was classified, if any.
    pub fn status(&self) -> Option<u16> {
        self.status
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl TransientError for AppError {
    fn is_connectivity(&self) -> bool {
        self.kind == ErrorKind::Network
    }

    fn status(&self) -> Option<u16> {
        self.status
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn display_uses_kind_and_message() {
        let error = AppError::unauthorized("token expired");
        assert_eq!(error.to_string(), "Unauthorized: token expired");

        let error = AppError::network("Network error");
        assert_eq!(error.to_string(), "Network: Network error");
    }

    #[test]
    fn kind_and_status_are_preserved() {
        let error = AppError::conflict("Conflict").with_status(409);
        assert_eq!(error.kind(), ErrorKind::Conflict);
        assert_eq!(error.status(), Some(409));
        assert_eq!(error.message(), "Conflict");
    }

    #[test]
    fn cause_is_reachable_through_source() {
        let io = std::io::Error::other("connection reset");
        let error = AppError::network("Network error").with_cause(io);

        let source = error.source().expect("cause should be chained");
        assert!(source.to_string().contains("connection reset"));

        let bare = AppError::unknown("no cause");
        assert!(bare.source().is_none());
    }

    #[test]
    fn network_errors_classify_as_connectivity() {
        let error = AppError::network("Network error");
        assert!(error.is_connectivity());
        assert_eq!(TransientError::status(&error), None);

        let error = AppError::unknown("Request failed with status 503").with_status(503);
        assert!(!error.is_connectivity());
        assert_eq!(TransientError::status(&error), Some(503));
    }
}
