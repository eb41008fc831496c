//! Centralized error types for the Chatterbox core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to machine-readable codes for logs and tool results
//! - Keeps cancellation distinct from failure (see [`ChatterboxError::Cancelled`])

use thiserror::Error;

/// Application-wide error type for the Chatterbox assistant.
#[derive(Debug, Error)]
pub enum ChatterboxError {
    /// Audio device failed to open, start, or produce/consume samples.
    #[error("Audio device error: {0}")]
    Device(String),

    /// Configuration is missing or invalid at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network-level failure (connection reset, refused, timeout, bad status).
    #[error("Network error: {0}")]
    Network(String),

    /// The MP3 decoder failed on the compressed stream.
    #[error("Decoder error: {0}")]
    Decoder(String),

    /// The LLM endpoint failed to start or closed the stream abnormally.
    #[error("LLM error: {0}")]
    Llm(String),

    /// A tool rejected its arguments or failed during execution.
    #[error("Tool error: {0}")]
    Tool(String),

    /// Tool not present in the registry.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// The music cache index or its files are unusable.
    #[error("Cache error: {0}")]
    Cache(String),

    /// An operation was cancelled through its scope.
    ///
    /// This is a signal, not a failure: callers observing it clean up and
    /// return without logging at error level.
    #[error("Cancelled")]
    Cancelled,

    /// A dialogue state transition that the lifecycle does not allow.
    #[error("Illegal state transition: {from} -> {to}")]
    InvalidTransition {
        /// State the machine was in.
        from: &'static str,
        /// State the caller asked for.
        to: &'static str,
    },

    /// Filesystem failure (cache files, state files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal invariant failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatterboxError {
    /// Returns a machine-readable error code for logs and tool results.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Device(_) => "device_error",
            Self::Config(_) => "configuration_error",
            Self::Network(_) => "network_error",
            Self::Decoder(_) => "decoder_error",
            Self::Llm(_) => "llm_error",
            Self::Tool(_) => "tool_error",
            Self::UnknownTool(_) => "unknown_tool",
            Self::Cache(_) => "cache_error",
            Self::Cancelled => "cancelled",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Io(_) => "io_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// True if this value is the cancellation signal rather than a failure.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<reqwest::Error> for ChatterboxError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ChatterboxError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON error: {err}"))
    }
}

/// Convenient Result alias for application-wide operations.
pub type ChatterboxResult<T> = Result<T, ChatterboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_a_signal_not_a_failure() {
        let err = ChatterboxError::Cancelled;
        assert!(err.is_cancelled());
        assert_eq!(err.code(), "cancelled");
    }

    #[test]
    fn invalid_transition_formats_both_states() {
        let err = ChatterboxError::InvalidTransition {
            from: "Idle",
            to: "Speaking",
        };
        assert_eq!(err.code(), "invalid_transition");
        assert!(err.to_string().contains("Idle"));
        assert!(err.to_string().contains("Speaking"));
    }

    #[test]
    fn network_error_code() {
        let err = ChatterboxError::Network("connection reset by peer".into());
        assert_eq!(err.code(), "network_error");
    }
}
