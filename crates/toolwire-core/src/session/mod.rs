//! Session: one peer, one transport, one negotiated catalog.
//!
//! A [`Session`] only exists once the handshake reached `Ready`. It owns the
//! correlator, the dispatch task and (when launched by us) the peer process.

mod facade;
mod negotiator;
mod types;

pub use negotiator::{HandshakeState, Negotiated, Negotiator};
pub use types::{
    Capabilities, Capability, ContentBlock, DisplayContent, InitializeResult, InputShape,
    ParamShape, ResourceDescriptor, ToolDescriptor, ToolOutput,
};

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{Implementation, RuntimeConfig, SessionConfig};
use crate::process::{PeerCommand, PeerExit, PeerProcess};
use crate::rpc::{Correlator, LineReader, PeerNotification};
use crate::Result;

/// A ready session with a single peer.
pub struct Session {
    correlator: Arc<Correlator>,
    negotiated: Negotiated,
    dispatch: JoinHandle<()>,
    exit_watch: Option<JoinHandle<()>>,
    peer: Option<PeerProcess>,
}

impl Session {
    /// Spawn the peer and negotiate a session over its stdio.
    pub async fn launch(command: &PeerCommand, config: SessionConfig) -> Result<Self> {
        let (peer, pipes) = PeerProcess::spawn(command)?;
        Self::establish(pipes.stdout, pipes.stdin, config, Some(peer)).await
    }

    /// Negotiate a session over an existing pair of streams.
    pub async fn over_streams<R, W>(reader: R, writer: W, config: SessionConfig) -> Result<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::establish(reader, writer, config, None).await
    }

    async fn establish<R, W>(
        reader: R,
        writer: W,
        config: SessionConfig,
        peer: Option<PeerProcess>,
    ) -> Result<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let correlator = Correlator::new(writer, config.call_timeout);
        let dispatch = correlator.spawn_dispatch(LineReader::new(reader, config.max_line_bytes));
        let exit_watch = peer
            .as_ref()
            .map(|peer| peer.abort_on_exit(Arc::clone(&correlator)));

        let mut negotiator = Negotiator::new(&correlator, &config);
        let negotiated = match negotiator.negotiate().await {
            Ok(negotiated) => negotiated,
            Err(e) => {
                dispatch.abort();
                if let Some(handle) = exit_watch {
                    handle.abort();
                }
                close_input(&correlator).await;
                if let Some(peer) = peer {
                    peer.shutdown(RuntimeConfig::PEER_SHUTDOWN_GRACE).await;
                }
                return Err(e);
            }
        };

        Ok(Self {
            correlator,
            negotiated,
            dispatch,
            exit_watch,
            peer,
        })
    }

    /// Handshake state as seen now: `Ready` until the session is aborted.
    pub fn state(&self) -> HandshakeState {
        if self.correlator.is_closed() {
            HandshakeState::Aborted
        } else {
            HandshakeState::Ready
        }
    }

    pub fn server_info(&self) -> &Implementation {
        &self.negotiated.server_info
    }

    pub fn protocol_version(&self) -> Option<&str> {
        self.negotiated.protocol_version.as_deref()
    }

    pub fn instructions(&self) -> Option<&str> {
        self.negotiated.instructions.as_deref()
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.negotiated.capabilities
    }

    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.negotiated.tools
    }

    pub fn resources(&self) -> &[ResourceDescriptor] {
        &self.negotiated.resources
    }

    pub fn find_tool(&self, name: &str) -> Option<&ToolDescriptor> {
        self.negotiated.tools.iter().find(|tool| tool.name == name)
    }

    pub fn find_resource(&self, uri: &str) -> Option<&ResourceDescriptor> {
        self.negotiated
            .resources
            .iter()
            .find(|resource| resource.uri == uri)
    }

    /// The underlying correlator, for raw calls outside the façade.
    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<PeerNotification> {
        self.correlator.subscribe_notifications()
    }

    /// End the session and stop the peer, if we launched it.
    pub async fn close(mut self) -> Option<PeerExit> {
        info!("Closing session with {}", self.negotiated.server_info.name);
        self.correlator.abort("session closed");
        close_input(&self.correlator).await;

        let exit = match self.peer.take() {
            Some(peer) => peer.shutdown(RuntimeConfig::PEER_SHUTDOWN_GRACE).await,
            None => None,
        };
        self.dispatch.abort();
        exit
    }
}

/// Close the peer's input, giving up if the writer is stuck on a peer that
/// stopped reading.
async fn close_input(correlator: &Correlator) {
    match tokio::time::timeout(RuntimeConfig::PEER_SHUTDOWN_GRACE, correlator.close_writer()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Closing peer input failed: {}", e),
        Err(_) => warn!("Peer input still blocked after {:?}", RuntimeConfig::PEER_SHUTDOWN_GRACE),
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.correlator.abort("session dropped");
        self.dispatch.abort();
        if let Some(handle) = self.exit_watch.take() {
            handle.abort();
        }
    }
}
