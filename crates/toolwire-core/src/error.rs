//! Error types for the toolwire protocol engine.
//!
//! Parse-level and correlation-level anomalies (`MalformedMessage`,
//! `UnsolicitedReply`, `ProtocolViolation`) are contained by the reply
//! dispatch loop. Transport-level failures end the session.

use std::time::Duration;
use thiserror::Error;

/// Main error type for toolwire sessions.
#[derive(Debug, Error)]
pub enum ToolwireError {
    // Protocol errors
    #[error("Malformed message: {message}")]
    MalformedMessage { message: String },

    #[error("Unsolicited reply for id {id}")]
    UnsolicitedReply { id: u64 },

    #[error("Protocol violation: {message}")]
    ProtocolViolation { message: String },

    #[error("Peer error {code}: {message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    // Session errors
    #[error("Peer disconnected: {reason}")]
    PeerDisconnected { reason: String },

    #[error("Call to {method} timed out after {after:?}")]
    Timeout { method: String, after: Duration },

    // Transport errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Inbound line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Process errors
    #[error("Failed to launch {program}: {message}")]
    Launch { program: String, message: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for toolwire operations.
pub type Result<T> = std::result::Result<T, ToolwireError>;

impl From<std::io::Error> for ToolwireError {
    fn from(err: std::io::Error) -> Self {
        ToolwireError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for ToolwireError {
    fn from(err: serde_json::Error) -> Self {
        ToolwireError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl ToolwireError {
    pub fn malformed(message: impl Into<String>) -> Self {
        ToolwireError::MalformedMessage {
            message: message.into(),
        }
    }

    pub fn disconnected(reason: impl Into<String>) -> Self {
        ToolwireError::PeerDisconnected {
            reason: reason.into(),
        }
    }

    pub fn violation(message: impl Into<String>) -> Self {
        ToolwireError::ProtocolViolation {
            message: message.into(),
        }
    }

    /// Whether this error ends the session.
    ///
    /// Only whole-transport failures are fatal. Everything else is surfaced
    /// to a single caller or logged and discarded.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ToolwireError::PeerDisconnected { .. }
                | ToolwireError::Io { .. }
                | ToolwireError::LineTooLong { .. }
        )
    }

    /// Short, stable label for the error kind.
    ///
    /// Used by the operator console to print a kind-specific message.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolwireError::MalformedMessage { .. } => "malformed_message",
            ToolwireError::UnsolicitedReply { .. } => "unsolicited_reply",
            ToolwireError::ProtocolViolation { .. } => "protocol_violation",
            ToolwireError::Remote { .. } => "remote_error",
            ToolwireError::PeerDisconnected { .. } => "peer_disconnected",
            ToolwireError::Timeout { .. } => "timeout",
            ToolwireError::Io { .. } => "io",
            ToolwireError::LineTooLong { .. } => "line_too_long",
            ToolwireError::Json { .. } => "json",
            ToolwireError::Launch { .. } => "launch",
            ToolwireError::Config { .. } => "config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_failures_are_fatal() {
        assert!(ToolwireError::disconnected("eof").is_fatal());
        assert!(ToolwireError::LineTooLong { limit: 8 }.is_fatal());
        let io: ToolwireError =
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone").into();
        assert!(io.is_fatal());
    }

    #[test]
    fn test_contained_anomalies_are_not_fatal() {
        assert!(!ToolwireError::malformed("bad").is_fatal());
        assert!(!ToolwireError::UnsolicitedReply { id: 999 }.is_fatal());
        assert!(!ToolwireError::violation("dup").is_fatal());
        assert!(!ToolwireError::Remote {
            code: -32601,
            message: "Method not found".to_string(),
            data: None,
        }
        .is_fatal());
        assert!(!ToolwireError::Timeout {
            method: "tools/call".to_string(),
            after: Duration::from_secs(1),
        }
        .is_fatal());
    }

    #[test]
    fn test_kind_labels_distinguish_failures() {
        assert_eq!(ToolwireError::disconnected("x").kind(), "peer_disconnected");
        assert_eq!(
            ToolwireError::Remote {
                code: 1,
                message: "m".to_string(),
                data: None
            }
            .kind(),
            "remote_error"
        );
    }

    #[test]
    fn test_remote_error_display_includes_code() {
        let err = ToolwireError::Remote {
            code: -32602,
            message: "Invalid params".to_string(),
            data: None,
        };
        assert_eq!(err.to_string(), "Peer error -32602: Invalid params");
    }
}
