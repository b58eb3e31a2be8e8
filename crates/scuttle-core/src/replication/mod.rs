//! Feed replication between peers
//!
//! Each authenticated connection is handed to the [`Negotiator`], which
//! picks one of two protocols:
//!
//! ```text
//!                    ┌──────────────┐
//!  PeerConnection ──▶│  Negotiator  │
//!                    └──────┬───────┘
//!               EBT ok      │     rejected / not offered
//!          ┌────────────────┴────────────────┐
//!          ▼                                 ▼
//!   ┌─────────────┐                  ┌────────────────┐
//!   │ EbtSession  │ notes + push     │ GossipReplicator│ history streams
//!   └──────┬──────┘                  └───────┬────────┘
//!          └──────────────┬──────────────────┘
//!                         ▼
//!               RawMessageHandler (pipeline)
//! ```
//!
//! The traits in this module are the contract with the transport layer.
//! Framing, multiplexing and the handshake live behind them.

pub mod ebt;
pub mod gossip;
mod history;
mod negotiator;

pub use ebt::{EbtSession, MessageStreamer, Note, Notes};
pub use gossip::{GossipReplicator, GossipState};
pub use history::HistoryStreamServer;
pub use negotiator::{Negotiator, Protocol};

use crate::error::{ReplicationError, ReplicationResult};
use crate::feed::{RawMessage, Sequence};
use crate::identity::{FeedRef, IdentityRef};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Arguments of a `createHistoryStream` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryStreamRequest {
    pub feed: FeedRef,
    /// First sequence to send, the start of the feed if `None`
    pub seq: Option<Sequence>,
    pub limit: Option<usize>,
    /// Keep the stream open and send messages as they are appended
    pub live: bool,
}

impl HistoryStreamRequest {
    pub fn new(feed: FeedRef, seq: Option<Sequence>) -> Self {
        Self {
            feed,
            seq,
            limit: None,
            live: false,
        }
    }
}

/// Receiving side of a history stream.
pub type HistoryStream = mpsc::Receiver<ReplicationResult<RawMessage>>;

/// An authenticated connection to one remote peer.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    fn remote(&self) -> IdentityRef;

    fn role(&self) -> Role;

    /// Open an EBT session.
    ///
    /// Fails with [`ReplicationError::Rejected`] if the remote does not
    /// speak EBT.
    async fn open_ebt(&self) -> ReplicationResult<EbtDuplex>;

    /// Wait for the remote to open an EBT session.
    ///
    /// `None` if nothing arrived within `timeout`.
    async fn accept_ebt(&self, timeout: Duration) -> ReplicationResult<Option<EbtDuplex>>;

    async fn create_history_stream(
        &self,
        request: HistoryStreamRequest,
    ) -> ReplicationResult<HistoryStream>;
}

/// Outgoing half of an EBT session.
#[async_trait]
pub trait EbtStream: Send + Sync {
    async fn send_notes(&self, notes: Notes) -> ReplicationResult<()>;

    async fn send_message(&self, raw: RawMessage) -> ReplicationResult<()>;
}

/// Something the remote sent over an EBT session.
#[derive(Debug)]
pub enum IncomingMessage {
    Notes(Notes),
    Message(RawMessage),
    Error(ReplicationError),
}

/// Both halves of an EBT session.
pub struct EbtDuplex {
    pub outgoing: Arc<dyn EbtStream>,
    pub incoming: mpsc::Receiver<IncomingMessage>,
}

impl std::fmt::Debug for EbtDuplex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EbtDuplex").finish_non_exhaustive()
    }
}
