use std::fmt;

use thiserror::Error;

/// Why a dispatched turn produced an error reply instead of content.
///
/// Every variant becomes an `Error: <description>` message in the task's log.
/// Quota rejections never reach the dispatcher and have no variant here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error(
        "The AI assistant is still starting up. Please wait a moment and send your message again."
    )]
    BridgeNotReady,

    #[error("AI assistant request failed: {message}")]
    BridgeFailed { message: String },

    /// Backend failures carry the backend's own message verbatim.
    #[error("{message}")]
    BackendError { message: String },
}

impl DispatchError {
    pub fn bridge_failed(err: impl fmt::Display) -> Self {
        Self::BridgeFailed {
            message: err.to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::BridgeNotReady => "bridge_not_ready",
            Self::BridgeFailed { .. } => "bridge_failed",
            Self::BackendError { .. } => "backend_error",
        }
    }
}

/// Failure of a backend HTTP call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BackendFailure {
    pub status: Option<u16>,
    pub message: String,
}

impl BackendFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }
}

impl From<BackendFailure> for DispatchError {
    fn from(failure: BackendFailure) -> Self {
        Self::BackendError {
            message: failure.message,
        }
    }
}

pub type BackendResult<T> = Result<T, BackendFailure>;

#[cfg(test)]
mod tests {
    use super::{BackendFailure, DispatchError};

    #[test]
    fn backend_errors_surface_the_backend_message() {
        let err: DispatchError = BackendFailure::with_status(502, "Upstream model offline").into();
        assert_eq!(err.to_string(), "Upstream model offline");
        assert_eq!(err.kind(), "backend_error");
    }

    #[test]
    fn bridge_failures_are_prefixed() {
        let err = DispatchError::bridge_failed("rate limited");
        assert_eq!(err.to_string(), "AI assistant request failed: rate limited");
        assert!(DispatchError::BridgeNotReady
            .to_string()
            .contains("still starting up"));
    }
}
