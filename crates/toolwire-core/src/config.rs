//! Centralized configuration for toolwire.
//!
//! Protocol constants live on unit structs; per-session knobs live on
//! [`SessionConfig`], which callers build with the `with_*` methods.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Wire protocol constants.
pub struct ProtocolConfig;

impl ProtocolConfig {
    pub const JSONRPC_VERSION: &'static str = "2.0";
    pub const PROTOCOL_VERSION: &'static str = "2025-03-26";
    pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024; // 4MB
    pub const DISCOVERY_PROGRESS_TOKEN: u64 = 1;
    pub const MAX_DISCOVERY_PAGES: usize = 64;
}

/// Client identity sent during `initialize`.
pub struct ClientConfig;

impl ClientConfig {
    pub const CLIENT_NAME: &'static str = "toolwire";
    pub const CLIENT_VERSION: &'static str = env!("CARGO_PKG_VERSION");
}

/// Session runtime limits.
pub struct RuntimeConfig;

impl RuntimeConfig {
    pub const NOTIFICATION_CHANNEL_CAPACITY: usize = 64;
    pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;
    pub const PEER_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
}

/// Name/version pair identifying either end of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

impl Default for Implementation {
    fn default() -> Self {
        Self {
            name: ClientConfig::CLIENT_NAME.to_string(),
            version: ClientConfig::CLIENT_VERSION.to_string(),
        }
    }
}

/// Per-session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Identity reported to the peer.
    pub client_info: Implementation,
    /// Protocol revision requested in `initialize`.
    pub protocol_version: String,
    /// Deadline applied to every call. `None` waits indefinitely.
    pub call_timeout: Option<Duration>,
    /// Opaque `_meta.progressToken` attached to discovery calls.
    pub discovery_progress_token: Option<u64>,
    /// Upper bound on `nextCursor` pages followed per catalog.
    pub max_discovery_pages: usize,
    /// Maximum accepted inbound line length.
    pub max_line_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            client_info: Implementation::default(),
            protocol_version: ProtocolConfig::PROTOCOL_VERSION.to_string(),
            call_timeout: None,
            discovery_progress_token: Some(ProtocolConfig::DISCOVERY_PROGRESS_TOKEN),
            max_discovery_pages: ProtocolConfig::MAX_DISCOVERY_PAGES,
            max_line_bytes: ProtocolConfig::MAX_LINE_BYTES,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the client identity.
    pub fn with_client_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.client_info = Implementation {
            name: name.into(),
            version: version.into(),
        };
        self
    }

    /// Set the requested protocol revision.
    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = version.into();
        self
    }

    /// Set the per-call deadline.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Set or clear the discovery progress token.
    pub fn with_discovery_progress_token(mut self, token: Option<u64>) -> Self {
        self.discovery_progress_token = token;
        self
    }

    /// Set the discovery page limit.
    pub fn with_max_discovery_pages(mut self, pages: usize) -> Self {
        self.max_discovery_pages = pages;
        self
    }

    /// Set the inbound line limit.
    pub fn with_max_line_bytes(mut self, limit: usize) -> Self {
        self.max_line_bytes = limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_session_config() {
        let config = SessionConfig::default();
        assert_eq!(config.client_info.name, "toolwire");
        assert_eq!(config.protocol_version, "2025-03-26");
        assert!(config.call_timeout.is_none());
        assert_eq!(config.discovery_progress_token, Some(1));
    }

    #[test]
    fn test_builder_overrides() {
        let config = SessionConfig::new()
            .with_client_info("diy-client", "0.1.0")
            .with_call_timeout(Duration::from_secs(5))
            .with_discovery_progress_token(None)
            .with_max_discovery_pages(2);

        assert_eq!(config.client_info.name, "diy-client");
        assert_eq!(config.client_info.version, "0.1.0");
        assert_eq!(config.call_timeout, Some(Duration::from_secs(5)));
        assert!(config.discovery_progress_token.is_none());
        assert_eq!(config.max_discovery_pages, 2);
    }
}
