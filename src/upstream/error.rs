//! Upstream failure classification.

use std::fmt;

use thiserror::Error;

use crate::retry::Retryable;

/// Socket-level error codes treated as transient.
pub const TRANSIENT_NETWORK_CODES: &[&str] = &["ECONNRESET", "ETIMEDOUT", "ECONNREFUSED", "EPIPE", "EHOSTUNREACH"];

/// HTTP statuses treated as transient.
pub const TRANSIENT_STATUSES: &[u16] = &[408, 429, 500, 502, 503, 504];

/// What went wrong talking to an upstream service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamErrorKind {
    /// The request never got an HTTP response (connection reset, timeout, ...)
    Network(String),
    /// The upstream answered with a non-success status
    Status(u16),
    /// The upstream answered successfully but without usable content
    EmptyResponse,
}

impl fmt::Display for UpstreamErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamErrorKind::Network(code) => write!(f, "network error {}", code),
            UpstreamErrorKind::Status(status) => write!(f, "status {}", status),
            UpstreamErrorKind::EmptyResponse => write!(f, "empty response"),
        }
    }
}

/// A failed call to the image store or the generation service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{service}: {kind}: {message}")]
pub struct UpstreamError {
    /// Which upstream produced the error
    pub service: String,
    /// Classification of the failure
    pub kind: UpstreamErrorKind,
    /// Message reported by the upstream or the client library
    pub message: String,
}

impl UpstreamError {
    /// Create an error of any kind.
    pub fn new(service: impl Into<String>, kind: UpstreamErrorKind, message: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            kind,
            message: message.into(),
        }
    }

    /// A transport failure identified by its error code.
    pub fn network(service: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(service, UpstreamErrorKind::Network(code.into()), message)
    }

    /// A non-success HTTP status.
    pub fn status(service: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self::new(service, UpstreamErrorKind::Status(status), message)
    }

    /// A successful response without content.
    pub fn empty(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(service, UpstreamErrorKind::EmptyResponse, message)
    }

    /// The HTTP status, if the upstream sent one.
    pub fn http_status(&self) -> Option<u16> {
        match self.kind {
            UpstreamErrorKind::Status(status) => Some(status),
            _ => None,
        }
    }
}

impl Retryable for UpstreamError {
    fn is_retryable(&self) -> bool {
        match &self.kind {
            UpstreamErrorKind::Network(code) => TRANSIENT_NETWORK_CODES.contains(&code.as_str()),
            UpstreamErrorKind::Status(status) => TRANSIENT_STATUSES.contains(status),
            UpstreamErrorKind::EmptyResponse => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_network_codes_are_retryable() {
        for code in TRANSIENT_NETWORK_CODES {
            assert!(UpstreamError::network("store", *code, "boom").is_retryable(), "{}", code);
        }
        assert!(!UpstreamError::network("store", "ENOTFOUND", "dns").is_retryable());
    }

    #[test]
    fn test_status_classification() {
        for status in [408, 429, 500, 502, 503, 504] {
            assert!(UpstreamError::status("llm", status, "").is_retryable(), "{}", status);
        }
        for status in [400, 401, 403, 404, 422] {
            assert!(!UpstreamError::status("llm", status, "").is_retryable(), "{}", status);
        }
    }

    #[test]
    fn test_empty_response_is_not_retryable() {
        assert!(!UpstreamError::empty("llm", "no choices").is_retryable());
    }

    #[test]
    fn test_display_and_accessors() {
        let err = UpstreamError::status("llm", 429, "slow down");
        assert_eq!(err.to_string(), "llm: status 429: slow down");
        assert_eq!(err.http_status(), Some(429));
        assert_eq!(UpstreamError::network("store", "EPIPE", "x").http_status(), None);
    }
}
