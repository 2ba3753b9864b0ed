//! Fixed handshake sequence: initialize, acknowledge, gated discovery.
//!
//! ```text
//! Unstarted -> Initializing -> Initialized -> NotifiedReady
//!           -> DiscoveringTools -> DiscoveringResources -> Ready
//! ```
//!
//! Any failure moves to `Aborted` and aborts the correlator, so the session
//! cannot be used afterwards. Discovery for a capability the peer did not
//! advertise is skipped, never attempted.

use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::types::{
    Capabilities, Capability, InitializeResult, ResourceDescriptor, ToolDescriptor,
};
use crate::config::{Implementation, SessionConfig};
use crate::rpc::{methods, Correlator};
use crate::{Result, ToolwireError};

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Unstarted,
    Initializing,
    Initialized,
    NotifiedReady,
    DiscoveringTools,
    DiscoveringResources,
    Ready,
    Aborted,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakeState::Unstarted => "UNSTARTED",
            HandshakeState::Initializing => "INITIALIZING",
            HandshakeState::Initialized => "INITIALIZED",
            HandshakeState::NotifiedReady => "NOTIFIED_READY",
            HandshakeState::DiscoveringTools => "DISCOVERING_TOOLS",
            HandshakeState::DiscoveringResources => "DISCOVERING_RESOURCES",
            HandshakeState::Ready => "READY",
            HandshakeState::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}

/// Everything learned during the handshake. Frozen once built.
#[derive(Debug, Clone)]
pub struct Negotiated {
    pub server_info: Implementation,
    pub protocol_version: Option<String>,
    pub instructions: Option<String>,
    pub capabilities: Capabilities,
    pub tools: Vec<ToolDescriptor>,
    pub resources: Vec<ResourceDescriptor>,
}

/// Drives the handshake over a correlator.
pub struct Negotiator<'a> {
    correlator: &'a Correlator,
    config: &'a SessionConfig,
    state: HandshakeState,
    capabilities: Option<Capabilities>,
}

impl<'a> Negotiator<'a> {
    pub fn new(correlator: &'a Correlator, config: &'a SessionConfig) -> Self {
        Self {
            correlator,
            config,
            state: HandshakeState::Unstarted,
            capabilities: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Run the full handshake.
    pub async fn negotiate(&mut self) -> Result<Negotiated> {
        if self.state != HandshakeState::Unstarted {
            return Err(ToolwireError::violation(format!(
                "handshake already started (state {})",
                self.state
            )));
        }

        match self.run().await {
            Ok(negotiated) => Ok(negotiated),
            Err(e) => {
                warn!("Handshake failed in state {}: {}", self.state, e);
                self.transition(HandshakeState::Aborted);
                self.correlator.abort(format!("handshake failed: {}", e));
                Err(e)
            }
        }
    }

    async fn run(&mut self) -> Result<Negotiated> {
        self.transition(HandshakeState::Initializing);
        let result = self
            .correlator
            .call(
                methods::INITIALIZE,
                json!({
                    "protocolVersion": self.config.protocol_version,
                    "capabilities": {},
                    "clientInfo": self.config.client_info,
                }),
            )
            .await?;

        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| ToolwireError::malformed(format!("invalid initialize result: {}", e)))?;

        match &init.protocol_version {
            Some(version) if *version != self.config.protocol_version => warn!(
                "Peer answered with protocol version {} (requested {})",
                version, self.config.protocol_version
            ),
            None => warn!("Peer did not report a protocol version"),
            _ => {}
        }

        info!(
            "Connected to {} v{}",
            init.server_info.name, init.server_info.version
        );
        self.capabilities = Some(init.capabilities.clone());
        self.transition(HandshakeState::Initialized);

        self.correlator
            .notify(methods::INITIALIZED, json!({}))
            .await?;
        self.transition(HandshakeState::NotifiedReady);

        let tools = if init.capabilities.supports_tools() {
            self.transition(HandshakeState::DiscoveringTools);
            self.list_all::<ToolDescriptor>(Capability::Tools).await?
        } else {
            info!("Peer does not advertise tools, skipping discovery");
            Vec::new()
        };

        let resources = if init.capabilities.supports_resources() {
            self.transition(HandshakeState::DiscoveringResources);
            self.list_all::<ResourceDescriptor>(Capability::Resources)
                .await?
        } else {
            info!("Peer does not advertise resources, skipping discovery");
            Vec::new()
        };

        self.transition(HandshakeState::Ready);
        info!(
            "Session ready: {} tool(s), {} resource(s)",
            tools.len(),
            resources.len()
        );

        Ok(Negotiated {
            server_info: init.server_info,
            protocol_version: init.protocol_version,
            instructions: init.instructions,
            capabilities: init.capabilities,
            tools,
            resources,
        })
    }

    /// List every page of a catalog.
    ///
    /// Refuses with `ProtocolViolation` when the capability was not
    /// advertised.
    async fn list_all<T: DeserializeOwned>(&self, capability: Capability) -> Result<Vec<T>> {
        let advertised = self
            .capabilities
            .as_ref()
            .is_some_and(|caps| caps.supports(capability));
        if !advertised {
            return Err(ToolwireError::violation(format!(
                "discovery of {} without the capability being advertised",
                capability
            )));
        }

        let (method, field) = match capability {
            Capability::Tools => (methods::TOOLS_LIST, "tools"),
            Capability::Resources => (methods::RESOURCES_LIST, "resources"),
        };

        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        for page in 0..self.config.max_discovery_pages {
            let mut result = self
                .correlator
                .call(method, self.discovery_params(cursor.as_deref()))
                .await?;

            let page_items = result.get_mut(field).map(Value::take).ok_or_else(|| {
                ToolwireError::malformed(format!("{} result has no {} field", method, field))
            })?;
            let page_items: Vec<T> = serde_json::from_value(page_items).map_err(|e| {
                ToolwireError::malformed(format!("invalid {} in {} result: {}", field, method, e))
            })?;
            debug!("{} page {}: {} item(s)", method, page, page_items.len());
            items.extend(page_items);

            cursor = result
                .get("nextCursor")
                .and_then(Value::as_str)
                .map(str::to_string);
            if cursor.is_none() {
                return Ok(items);
            }
        }

        warn!(
            "Stopped {} after {} page(s); catalog may be incomplete",
            method, self.config.max_discovery_pages
        );
        Ok(items)
    }

    fn discovery_params(&self, cursor: Option<&str>) -> Value {
        let mut params = json!({});
        if let Some(token) = self.config.discovery_progress_token {
            params["_meta"] = json!({ "progressToken": token });
        }
        if let Some(cursor) = cursor {
            params["cursor"] = json!(cursor);
        }
        params
    }

    fn transition(&mut self, next: HandshakeState) {
        debug!("Handshake {} -> {}", self.state, next);
        self.state = next;
    }
}
