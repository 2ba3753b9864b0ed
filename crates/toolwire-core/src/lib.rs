//! Toolwire - client-side protocol engine for tool/resource peers.
//!
//! Talks newline-delimited JSON-RPC 2.0 to a single long-lived peer process
//! over its stdio, negotiates capabilities, discovers the peer's tools and
//! resources, and exposes a small typed surface to invoke them.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::collections::BTreeMap;
//! use toolwire::{PeerCommand, Session, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> toolwire::Result<()> {
//!     let command = PeerCommand::new("node").with_arg("../server/dist/index.js");
//!     let session = Session::launch(&command, SessionConfig::default()).await?;
//!
//!     let info = session.server_info();
//!     println!("Connected to {} v{}", info.name, info.version);
//!
//!     if let Some(tool) = session.tools().first() {
//!         let mut args = BTreeMap::new();
//!         args.insert("city".to_string(), "Oslo".to_string());
//!         let output = session.call_tool(tool, args).await?;
//!         for block in &output.content {
//!             println!("{}", block.display());
//!         }
//!     }
//!
//!     session.close().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod process;
pub mod rpc;
pub mod session;

// Re-export commonly used types
pub use config::{Implementation, SessionConfig};
pub use error::{Result, ToolwireError};
pub use process::{PeerCommand, PeerExit, PeerProcess};
pub use rpc::{Correlator, PeerNotification, RequestId};
pub use session::{
    Capabilities, ContentBlock, DisplayContent, HandshakeState, ResourceDescriptor, Session,
    ToolDescriptor, ToolOutput,
};
