//! Transport adapters implementing [`PeerConnection`](crate::replication::PeerConnection).
//!
//! Only an in-process transport ships with the crate. Network transports
//! (secret handshake, RPC framing) implement the same traits elsewhere.

pub mod memory;

pub use memory::{connect, MemoryConnection, MemoryEndpoint};
