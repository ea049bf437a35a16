//! Error types for the session lifecycle core.
//!
//! Errors fall into two worlds that must never be confused:
//!
//! - **Caller errors**: returned from [`SessionManager`](crate::manager::SessionManager)
//!   operations (`dial`, `answer`, `hold`, ...) to the code that invoked them.
//! - **Gateway stream errors**: failures reported asynchronously by the
//!   gateway. These never surface on a caller's stack; they are folded into
//!   the lifecycle state machine and become outward alert events instead.
//!
//! # Examples
//!
//! ```rust
//! use wephone_session_core::error::SessionError;
//!
//! let err = SessionError::Transport { reason: "websocket closed".to_string() };
//! assert!(err.is_recoverable());
//! assert_eq!(err.category(), "transport");
//!
//! let err = SessionError::Config {
//!     field: "extension".to_string(),
//!     reason: "must not be empty".to_string(),
//! };
//! assert!(!err.is_recoverable());
//! assert_eq!(err.category(), "configuration");
//! ```

use thiserror::Error;

/// Result type alias for session-core operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Error types for session lifecycle and call control operations
#[derive(Error, Debug, Clone)]
pub enum SessionError {
    /// Registration related errors
    #[error("Registration failed: {code} {reason}")]
    Registration { code: u16, reason: String },

    #[error("Not registered with gateway")]
    NotRegistered,

    /// Media negotiation errors. The offending call leg is declined with a
    /// standard rejection code; the session itself is unaffected.
    #[error("Media negotiation failed: {reason}")]
    Negotiation { reason: String },

    /// Transport layer failures (socket closed, gateway unreachable)
    #[error("Transport failure: {reason}")]
    Transport { reason: String },

    /// Errors reported by the gateway itself
    #[error("Gateway error: {reason}")]
    Gateway { reason: String },

    /// Configuration errors
    #[error("Invalid configuration: {field} - {reason}")]
    Config { field: String, reason: String },

    /// Operation attempted in a phase that does not admit it
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// The init safety timer expired before the session came up
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
}

impl SessionError {
    /// Create a transport error
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport { reason: reason.into() }
    }

    /// Create a gateway error
    pub fn gateway(reason: impl Into<String>) -> Self {
        Self::Gateway { reason: reason.into() }
    }

    /// Create a negotiation error
    pub fn negotiation(reason: impl Into<String>) -> Self {
        Self::Negotiation { reason: reason.into() }
    }

    /// Create a configuration error
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config { field: field.into(), reason: reason.into() }
    }

    /// Create an invalid-state error
    pub fn invalid_state(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::InvalidState { expected: expected.into(), actual: actual.into() }
    }

    /// Check if this error is recoverable by a later rebuild attempt.
    ///
    /// Recoverable errors leave the lifecycle in `Degraded`, where the
    /// periodic health check will eventually retry. Registration rejections
    /// are deliberately not retried inline; they also park in `Degraded` but
    /// usually need operator attention (bad credentials, banned extension).
    pub fn is_recoverable(&self) -> bool {
        match self {
            SessionError::Transport { .. }
            | SessionError::Gateway { .. }
            | SessionError::Timeout { .. } => true,

            SessionError::Registration { .. }
            | SessionError::NotRegistered
            | SessionError::Negotiation { .. }
            | SessionError::Config { .. }
            | SessionError::InvalidState { .. } => false,
        }
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            SessionError::Registration { .. } | SessionError::NotRegistered => "registration",
            SessionError::Negotiation { .. } => "media",
            SessionError::Transport { .. } => "transport",
            SessionError::Gateway { .. } => "gateway",
            SessionError::Config { .. } => "configuration",
            SessionError::InvalidState { .. } => "state",
            SessionError::Timeout { .. } => "timeout",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverability_split() {
        assert!(SessionError::transport("socket closed").is_recoverable());
        assert!(SessionError::gateway("internal error").is_recoverable());
        assert!(SessionError::Timeout { duration_ms: 30_000 }.is_recoverable());

        assert!(!SessionError::Registration { code: 401, reason: "unauthorized".into() }
            .is_recoverable());
        assert!(!SessionError::negotiation("no compatible codecs").is_recoverable());
        assert!(!SessionError::config("extension", "must not be empty").is_recoverable());
    }

    #[test]
    fn test_categories() {
        assert_eq!(SessionError::NotRegistered.category(), "registration");
        assert_eq!(SessionError::negotiation("x").category(), "media");
        assert_eq!(SessionError::transport("x").category(), "transport");
        assert_eq!(
            SessionError::invalid_state("Registered", "Connecting").category(),
            "state"
        );
    }

    #[test]
    fn test_display_includes_detail() {
        let err = SessionError::Registration { code: 403, reason: "forbidden".into() };
        assert_eq!(err.to_string(), "Registration failed: 403 forbidden");
    }
}
