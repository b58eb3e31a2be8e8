//! Scuttle Core Library
//!
//! Feed replication for Secure Scuttlebutt style networks.
//!
//! ## Overview
//!
//! Every participant owns an append-only, hash-chained feed of signed
//! messages. Peers replicate each other's feeds over authenticated
//! connections, limited to a trust scope: identities reachable through
//! follows within a number of hops, minus blocks and bans.
//!
//! ## Core Pieces
//!
//! - **Feeds**: hash-chained messages, validated by pluggable formats
//! - **Social graph**: hop-bounded, ban-filtered reachability
//! - **Want-list**: the feeds in scope, cached
//! - **Gossip**: pull replication over history streams
//! - **EBT**: note-based push replication
//! - **Negotiator**: picks EBT or gossip for each connection
//!
//! ## Quick Start
//!
//! ```ignore
//! use scuttle_core::{PrivateIdentity, ReplicationConfig, ReplicationEngine};
//! use scuttle_core::transport::memory;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let alice = ReplicationEngine::in_memory(PrivateIdentity::generate()?, ReplicationConfig::default()).await?;
//!     let bob = ReplicationEngine::in_memory(PrivateIdentity::generate()?, ReplicationConfig::default()).await?;
//!
//!     alice.follow(&bob.identity())?;
//!     bob.publish(serde_json::json!({"type": "post", "text": "hi"}))?;
//!
//!     let (to_bob, to_alice) = memory::connect(alice.endpoint(), bob.endpoint(), alice.connection_token());
//!     tokio::join!(
//!         alice.replicate(to_bob, alice.connection_token()),
//!         bob.replicate(to_alice, bob.connection_token()),
//!     );
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod feed;
pub mod formats;
pub mod graph;
pub mod identity;
pub mod logging;
pub mod pipeline;
pub mod replication;
pub mod storage;
pub mod transport;
pub mod wants;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-exports
pub use config::ReplicationConfig;
pub use engine::ReplicationEngine;
pub use error::{ErrorKind, ReplicationError, ReplicationResult};
pub use feed::{Message, RawMessage, Sequence};
pub use formats::{MessageHmac, RawMessageIdentifier, Scuttlebutt};
pub use graph::{Hops, SocialGraph, SocialGraphBuilder};
pub use identity::{FeedRef, IdentityRef, MessageRef, PrivateIdentity};
pub use pipeline::{FeedWriter, MessageBuffer, RawMessageHandler, ReplicationPipeline};
pub use replication::{Negotiator, PeerConnection, Protocol};
pub use storage::Storage;
pub use wants::{WantedFeeds, WantedFeedsCache};
