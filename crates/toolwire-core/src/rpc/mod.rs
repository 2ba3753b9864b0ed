//! JSON-RPC plumbing between this client and its peer.
//!
//! Uses newline-delimited JSON-RPC 2.0 over a pair of byte streams
//! (normally the peer's stdin and stdout).
//!
//! # Architecture
//!
//! - **Transport**: line framing over any `AsyncRead`/`AsyncWrite` pair
//! - **Protocol**: envelope encoding and strict reply decoding
//! - **Correlator**: id allocation, pending-request map and reply dispatch

pub mod correlator;
pub mod methods;
pub mod protocol;
pub mod transport;

pub use correlator::{Correlator, PeerNotification};
pub use protocol::{Inbound, Reply, ReplyOutcome, RequestId, RpcError};
pub use transport::{LineReader, LineWriter};
