//! Peer process lifecycle: spawning, stdio wiring and exit handling.

mod supervisor;

pub use supervisor::{PeerCommand, PeerExit, PeerPipes, PeerProcess};
