//! Error types for the debug bridge
//!
//! Errors fall into four groups: transport failures that end a session,
//! protocol errors that only discard one unit of input, request failures
//! that reject a single call, and local state errors.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the debug bridge
#[derive(Error, Debug)]
pub enum Error {
    // === Transport Errors ===
    #[error("Debug adapter failed to start: {0}")]
    AdapterStartFailed(String),

    #[error("Failed to connect to {target}: {reason}")]
    ConnectionFailed { target: String, reason: String },

    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),

    #[error("Transport closed: {0}")]
    TransportClosed(String),

    // === Protocol Errors ===
    #[error("DAP protocol error: {0}")]
    DapProtocol(String),

    #[error("WebSocket protocol error: {0}")]
    WebSocketProtocol(String),

    #[error("CDP protocol error: {0}")]
    CdpProtocol(String),

    // === Request Failures ===
    #[error("DAP request '{command}' failed: {message}")]
    DapRequestFailed { command: String, message: String },

    #[error("CDP command '{method}' failed: {message}")]
    CdpCommandFailed { method: String, message: String },

    #[error("Request '{command}' timed out after {secs} seconds")]
    Timeout { command: String, secs: u64 },

    #[error("Session stopped before '{0}' completed")]
    SessionStopped(String),

    // === State Errors ===
    #[error("Not connected to a debug target")]
    NotConnected,

    #[error("Cannot {action} while session is {state}")]
    InvalidState { action: String, state: String },

    #[error("Variable reference {0} is not valid (expired on resume or never issued)")]
    InvalidVariableReference(i64),

    #[error("Frame {0} not found")]
    FrameNotFound(i64),

    #[error("Operation not supported by this backend: {0}")]
    Unsupported(String),

    #[error("Invalid breakpoint location: {0}")]
    InvalidLocation(String),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Ambient Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL '{url}': {reason}")]
    Url { url: String, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a DAP request failed error
    pub fn dap_request_failed(command: &str, message: &str) -> Self {
        Self::DapRequestFailed {
            command: command.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a CDP command failed error
    pub fn cdp_command_failed(method: &str, message: &str) -> Self {
        Self::CdpCommandFailed {
            method: method.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a timeout error for a named request
    pub fn timeout(command: &str, timeout: std::time::Duration) -> Self {
        Self::Timeout {
            command: command.to_string(),
            secs: timeout.as_secs(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(action: &str, state: &str) -> Self {
        Self::InvalidState {
            action: action.to_string(),
            state: state.to_string(),
        }
    }

    /// Create a connection failed error
    pub fn connection_failed(target: &str, reason: impl std::fmt::Display) -> Self {
        Self::ConnectionFailed {
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create an invalid URL error
    pub fn invalid_url(url: &str, reason: impl std::fmt::Display) -> Self {
        Self::Url {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Explicitly discard the error of a teardown-path operation.
///
/// Used for `disconnect`, breakpoint cleanup and similar calls whose failure
/// must not stop the surrounding teardown. The error is logged at debug level.
pub trait BestEffort {
    fn best_effort(self, what: &str);
}

impl<T> BestEffort for Result<T> {
    fn best_effort(self, what: &str) {
        if let Err(e) = self {
            tracing::debug!(operation = what, error = %e, "Ignoring best-effort failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_failed_message() {
        let err = Error::dap_request_failed("launch", "program not found");
        assert_eq!(
            err.to_string(),
            "DAP request 'launch' failed: program not found"
        );
    }

    #[test]
    fn test_best_effort_discards_error() {
        let failed: Result<()> = Err(Error::NotConnected);
        failed.best_effort("disconnect");
        let ok: Result<u32> = Ok(1);
        ok.best_effort("disconnect");
    }
}
