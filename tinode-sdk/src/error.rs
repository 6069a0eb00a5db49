//! Error taxonomy for session attempts.
//!
//! Everything that can go wrong inside one attempt is a [`SessionError`] and
//! is retried by the supervisor. [`ConfigError`] is the only kind that stops
//! the supervisor. [`ParseError`] never leaves the receive loop.

use std::time::Duration;

/// Why a session attempt failed. All variants are retryable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The transport could not be opened (DNS, TCP, TLS or websocket upgrade).
    #[error("connect failed: {0}")]
    Connect(String),
    /// No successful login reply arrived in time.
    #[error("no authentication reply within {}s", .0.as_secs())]
    AuthTimeout(Duration),
    /// The server rejected a request with a 4xx code.
    #[error("request rejected ({code}): {text}")]
    ProtocolReject { code: u16, text: String },
    /// Too many consecutive 5xx replies.
    #[error("{count} consecutive server errors, last ({code}): {text}")]
    ServerError { count: u32, code: u16, text: String },
    /// Send or receive failed mid-stream, or the stream ended too early.
    #[error("transport error: {0}")]
    Transport(String),
}

impl SessionError {
    /// A 401/403 rejection: the credentials themselves are bad, so retrying
    /// cannot succeed.
    pub fn is_credential_reject(&self) -> bool {
        matches!(self, SessionError::ProtocolReject { code: 401 | 403, .. })
    }
}

/// Non-retryable configuration failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing credential: {0} is not set")]
    MissingCredential(&'static str),
    #[error("credentials rejected by server ({code}): {text}")]
    Rejected { code: u16, text: String },
}

/// An inbound frame that could not be decoded. Logged and skipped.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame carries no known message kind")]
    Empty,
    #[error("frame carries {0} message kinds, expected exactly one")]
    Ambiguous(usize),
}
