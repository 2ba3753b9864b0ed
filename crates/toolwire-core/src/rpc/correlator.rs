//! Request/response correlation over a single peer transport.
//!
//! Each request gets the next id from a monotonically increasing counter and
//! a oneshot placeholder in the pending map. The reply dispatch loop reads
//! lines from the peer, decodes them, and resolves the placeholder whose id
//! matches. Replies may arrive in any order.
//!
//! # Thread Safety
//!
//! The id counter and pending map share one `std::sync::Mutex` that is never
//! held across an await. The write side is owned by a writer task fed over a
//! bounded channel: callers hand over whole encoded lines, so a caller that is
//! cancelled can never leave half a message on the wire.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::methods;
use super::protocol::{
    decode_inbound, encode_error_reply, encode_notification, encode_request, encode_result_reply,
    Inbound, Reply, RequestId, RpcError,
};
use super::transport::{LineReader, LineWriter};
use crate::config::RuntimeConfig;
use crate::{Result, ToolwireError};

/// Notification sent to us by the peer.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerNotification {
    pub method: String,
    pub params: Value,
}

/// In-flight request awaiting its reply.
struct PendingRequest {
    id: RequestId,
    method: String,
    issued_at: Instant,
    sender: oneshot::Sender<Result<Value>>,
}

/// Work for the writer task.
enum Outbound {
    Line(Vec<u8>),
    /// Close the write side, then report how that went.
    Close(oneshot::Sender<Result<()>>),
}

struct CorrelatorState {
    next_id: RequestId,
    pending: HashMap<RequestId, PendingRequest>,
    /// Set once the session is aborted; holds the reason.
    closed: Option<String>,
}

/// Drops the pending entry when its caller finishes, times out or is
/// cancelled. A no-op once the reply has been dispatched.
struct PendingGuard<'a> {
    correlator: &'a Correlator,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.correlator.forget(self.id);
    }
}

/// Owns the id counter, the pending-request map and the write side.
pub struct Correlator {
    state: Mutex<CorrelatorState>,
    outbound: mpsc::Sender<Outbound>,
    notifications: broadcast::Sender<PeerNotification>,
    default_timeout: Option<Duration>,
}

impl Correlator {
    /// Create a correlator writing to `writer`.
    ///
    /// Spawns the writer task, so this must run inside a tokio runtime.
    /// `default_timeout` applies to every [`call`](Self::call); `None` waits
    /// until the reply arrives or the session aborts.
    pub fn new<W>(writer: W, default_timeout: Option<Duration>) -> Arc<Self>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (notifications, _) = broadcast::channel(RuntimeConfig::NOTIFICATION_CHANNEL_CAPACITY);
        let (outbound, outbound_rx) = mpsc::channel(RuntimeConfig::OUTBOUND_QUEUE_CAPACITY);

        Arc::new_cyclic(|this| {
            tokio::spawn(Self::writer_loop(
                LineWriter::new(writer),
                outbound_rx,
                this.clone(),
            ));
            Self {
                state: Mutex::new(CorrelatorState {
                    next_id: 0,
                    pending: HashMap::new(),
                    closed: None,
                }),
                outbound,
                notifications,
                default_timeout,
            }
        })
    }

    /// Writer loop - sends queued lines to the peer, one at a time.
    ///
    /// Ends when every sender is gone, on `Close`, or on the first write
    /// failure, which aborts the session.
    async fn writer_loop<W: AsyncWrite + Unpin>(
        mut writer: LineWriter<W>,
        mut rx: mpsc::Receiver<Outbound>,
        correlator: Weak<Correlator>,
    ) {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Line(line) => {
                    if let Err(e) = writer.write(&line).await {
                        error!("Failed to write to peer: {}", e);
                        if let Some(correlator) = correlator.upgrade() {
                            correlator.abort(format!("write to peer failed: {}", e));
                        }
                        return;
                    }
                }
                Outbound::Close(done) => {
                    let _ = done.send(writer.shutdown().await);
                    return;
                }
            }
        }
    }

    /// Start the reply dispatch loop on the tokio runtime.
    pub fn spawn_dispatch<R>(self: &Arc<Self>, reader: LineReader<R>) -> JoinHandle<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_dispatch(reader).await })
    }

    /// Send a request and wait for its reply.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.call_with_timeout(method, params, self.default_timeout)
            .await
    }

    /// Send a request with an explicit deadline.
    ///
    /// The deadline covers queueing the request as well as waiting for the
    /// reply. On expiry, or if the caller drops this future, the pending
    /// entry is removed; other in-flight calls are untouched.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let (id, receiver) = self.register(method)?;
        let _pending = PendingGuard {
            correlator: self,
            id,
        };
        let line = encode_request(method, &params, id)?;

        let exchange = async {
            debug!("-> request {} {}", id, method);
            self.enqueue(line).await?;
            receiver
                .await
                .unwrap_or_else(|_| Err(ToolwireError::disconnected("reply channel dropped")))
        };

        match timeout {
            Some(after) => match tokio::time::timeout(after, exchange).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!("Request {} {} timed out after {:?}", id, method, after);
                    Err(ToolwireError::Timeout {
                        method: method.to_string(),
                        after,
                    })
                }
            },
            None => exchange.await,
        }
    }

    /// Send a notification. Never allocates an id and never waits for a reply.
    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        self.ensure_open()?;
        let line = encode_notification(method, &params)?;
        debug!("-> notification {}", method);
        self.enqueue(line).await
    }

    /// Id the next request will receive.
    pub fn next_id(&self) -> RequestId {
        self.lock_state().next_id
    }

    /// Number of requests awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.lock_state().pending.len()
    }

    /// Whether the session has been aborted.
    pub fn is_closed(&self) -> bool {
        self.lock_state().closed.is_some()
    }

    /// Subscribe to notifications sent by the peer.
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<PeerNotification> {
        self.notifications.subscribe()
    }

    /// Abort the session.
    ///
    /// Every pending request fails with `PeerDisconnected` exactly once and
    /// no further calls are accepted. Calling this again is a no-op.
    pub fn abort(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let drained: Vec<PendingRequest> = {
            let mut state = self.lock_state();
            if state.closed.is_some() {
                return;
            }
            state.closed = Some(reason.clone());
            state.pending.drain().map(|(_, pending)| pending).collect()
        };

        info!(
            "Session aborted ({}), failing {} pending request(s)",
            reason,
            drained.len()
        );
        for pending in drained {
            debug!("Failing request {} {}", pending.id, pending.method);
            let _ = pending
                .sender
                .send(Err(ToolwireError::disconnected(reason.clone())));
        }
    }

    /// Close the write side so the peer sees EOF on its input.
    ///
    /// Lines queued before this call are written first.
    pub async fn close_writer(&self) -> Result<()> {
        let (done, closed) = oneshot::channel();
        if self.outbound.send(Outbound::Close(done)).await.is_err() {
            // Writer task already gone, and its stream with it.
            return Ok(());
        }
        closed.await.unwrap_or(Ok(()))
    }

    /// Read and dispatch lines until the peer's stream ends or fails.
    ///
    /// Malformed lines, unsolicited replies and duplicate replies are logged
    /// and discarded. End-of-stream and transport errors abort the session.
    pub async fn run_dispatch<R: AsyncRead + Unpin>(&self, mut reader: LineReader<R>) {
        loop {
            let line = match reader.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    info!("Peer closed its output stream");
                    self.abort("peer closed its output stream");
                    return;
                }
                Err(e) if e.is_fatal() => {
                    error!("Peer transport failed: {}", e);
                    self.abort(e.to_string());
                    return;
                }
                Err(e) => {
                    warn!("Discarding inbound line: {}", e);
                    continue;
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            if let Err(e) = self.dispatch_line(&line).await {
                if e.is_fatal() {
                    error!("Peer transport failed: {}", e);
                    self.abort(e.to_string());
                    return;
                }
                warn!("Discarding inbound line: {}", e);
            }
        }
    }

    /// Handle one inbound line.
    ///
    /// Returns the contained anomaly, if any, so the caller can log it.
    pub async fn dispatch_line(&self, line: &str) -> Result<()> {
        match decode_inbound(line)? {
            Inbound::Reply(reply) => self.resolve(reply),
            Inbound::PeerRequest { id, method, params } => {
                self.answer_peer_request(id, &method, params).await
            }
            Inbound::PeerNotification { method, params } => {
                debug!("<- notification {}", method);
                // No subscribers is fine.
                let _ = self.notifications.send(PeerNotification { method, params });
                Ok(())
            }
            Inbound::OrphanError(err) => {
                warn!(
                    "Peer reported an error without a request id: {} ({})",
                    err.message, err.code
                );
                Ok(())
            }
        }
    }

    fn resolve(&self, reply: Reply) -> Result<()> {
        let (pending, next_id) = {
            let mut state = self.lock_state();
            (state.pending.remove(&reply.id), state.next_id)
        };

        match pending {
            Some(pending) => {
                debug!(
                    "<- reply {} {} after {:?}",
                    pending.id,
                    pending.method,
                    pending.issued_at.elapsed()
                );
                // The waiter may have timed out concurrently.
                let _ = pending.sender.send(reply.into_result());
                Ok(())
            }
            None if reply.id < next_id => Err(ToolwireError::violation(format!(
                "reply for id {} which is no longer pending",
                reply.id
            ))),
            None => Err(ToolwireError::UnsolicitedReply { id: reply.id }),
        }
    }

    async fn answer_peer_request(&self, id: Value, method: &str, params: Value) -> Result<()> {
        debug!("<- peer request {} {}", id, method);
        let line = if method == methods::PING {
            encode_result_reply(&id, &json!({}))?
        } else {
            warn!(
                "Peer sent unsupported request {} (params: {}), replying method-not-found",
                method, params
            );
            encode_error_reply(&id, &RpcError::method_not_found(method))?
        };
        self.enqueue(line).await
    }

    fn register(&self, method: &str) -> Result<(RequestId, oneshot::Receiver<Result<Value>>)> {
        let mut state = self.lock_state();
        if let Some(reason) = &state.closed {
            return Err(ToolwireError::disconnected(reason.clone()));
        }

        let id = state.next_id;
        state.next_id += 1;

        let (sender, receiver) = oneshot::channel();
        state.pending.insert(
            id,
            PendingRequest {
                id,
                method: method.to_string(),
                issued_at: Instant::now(),
                sender,
            },
        );
        Ok((id, receiver))
    }

    fn forget(&self, id: RequestId) {
        self.lock_state().pending.remove(&id);
    }

    fn ensure_open(&self) -> Result<()> {
        match &self.lock_state().closed {
            Some(reason) => Err(ToolwireError::disconnected(reason.clone())),
            None => Ok(()),
        }
    }

    /// Hand one encoded line to the writer task.
    async fn enqueue(&self, line: Vec<u8>) -> Result<()> {
        self.outbound
            .send(Outbound::Line(line))
            .await
            .map_err(|_| ToolwireError::disconnected("write side is closed"))
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, CorrelatorState> {
        self.state.lock().expect("correlator lock poisoned")
    }
}
