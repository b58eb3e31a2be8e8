//! ReplicationEngine - the primary entry point
//!
//! The engine wires storage, the social graph, the want-list, the
//! validation pipeline and both replication protocols together:
//!
//! ```text
//!   publish / follow / ban            PeerConnection
//!           │                               │
//!           ▼                               ▼
//!     ┌───────────┐   appended   ┌──────────────────┐
//!     │FeedWriter │◀─────────────│ MessageBuffer    │◀── pipeline ◀── Negotiator
//!     └─────┬─────┘              └──────────────────┘                (EBT/gossip)
//!           │ broadcast
//!           ├──▶ contact listener ──▶ invalidate graph + want-list
//!           └──▶ live history streams / EBT streamers
//! ```
//!
//! # Example
//!
//! ```ignore
//! use scuttle_core::{ReplicationConfig, ReplicationEngine, PrivateIdentity};
//!
//! let engine = ReplicationEngine::open("~/.scuttle/db", PrivateIdentity::generate()?, ReplicationConfig::default()).await?;
//! engine.publish(serde_json::json!({"type": "post", "text": "hello"}))?;
//! engine.follow(&friend)?;
//!
//! // for every authenticated connection
//! engine.replicate(connection, engine.connection_token()).await?;
//! ```

use crate::config::ReplicationConfig;
use crate::error::ReplicationResult;
use crate::feed::{ContactAction, ContactActions, ContactContent, KnownContent, Message, UnsignedMessage};
use crate::formats::{MessageHmac, RawMessageIdentifier, Scuttlebutt};
use crate::graph::{SocialGraph, SocialGraphBuilder};
use crate::identity::{FeedRef, IdentityRef, PrivateIdentity};
use crate::pipeline::{FeedWriter, MessageBuffer, ReplicationPipeline};
use crate::replication::{
    GossipReplicator, HistoryStreamServer, MessageStreamer, Negotiator, PeerConnection, Protocol,
};
use crate::storage::{FeedRepository, Storage};
use crate::transport::MemoryEndpoint;
use crate::wants::{SocialGraphWantedFeeds, WantedFeeds, WantedFeedsCache};
use chrono::Utc;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A replicating node for one local identity.
pub struct ReplicationEngine {
    config: ReplicationConfig,
    identity: PrivateIdentity,
    format: Scuttlebutt,
    storage: Arc<Storage>,
    graph: Arc<SocialGraphBuilder>,
    wants: Arc<WantedFeedsCache>,
    writer: Arc<FeedWriter>,
    pipeline: Arc<ReplicationPipeline>,
    negotiator: Negotiator,
    history: HistoryStreamServer,
    /// Serialises local publishing
    publish_lock: Mutex<()>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ReplicationEngine {
    /// Open (or create) a node backed by the database at `path`.
    pub async fn open(
        path: impl AsRef<Path>,
        identity: PrivateIdentity,
        config: ReplicationConfig,
    ) -> ReplicationResult<Self> {
        config.validate()?;
        let hmac = config.message_hmac()?;
        let storage = Storage::new(path, RawMessageIdentifier::scuttlebutt(hmac))?;
        Ok(Self::assemble(Arc::new(storage), hmac, identity, config))
    }

    /// A node that keeps everything in memory.
    pub async fn in_memory(
        identity: PrivateIdentity,
        config: ReplicationConfig,
    ) -> ReplicationResult<Self> {
        config.validate()?;
        let hmac = config.message_hmac()?;
        let storage = Storage::in_memory(RawMessageIdentifier::scuttlebutt(hmac))?;
        Ok(Self::assemble(Arc::new(storage), hmac, identity, config))
    }

    fn assemble(
        storage: Arc<Storage>,
        hmac: MessageHmac,
        identity: PrivateIdentity,
        config: ReplicationConfig,
    ) -> Self {
        let local = identity.identity();
        let identifier = storage.identifier().clone();
        let cancel = CancellationToken::new();

        let graph = Arc::new(SocialGraphBuilder::new(
            storage.clone(),
            storage.clone(),
            config.hops(),
            local,
        ));
        let wants = Arc::new(WantedFeedsCache::new(
            Arc::new(SocialGraphWantedFeeds::new(graph.clone())),
            config.want_list_refresh,
        ));
        let writer = Arc::new(FeedWriter::new(storage.clone()));
        let (buffer, buffer_task) = MessageBuffer::spawn(
            writer.clone(),
            config.message_buffer_capacity,
            config.message_buffer_flush_interval,
            cancel.clone(),
        );
        let pipeline = Arc::new(ReplicationPipeline::new(
            identifier,
            storage.clone(),
            wants.clone(),
            buffer.clone(),
        ));
        let gossip = Arc::new(GossipReplicator::new(
            wants.clone(),
            pipeline.clone(),
            config.gossip_fan_out,
            config.gossip_pass_interval,
        ));
        let negotiator = Negotiator::new(
            config.ebt_enabled,
            config.ebt_accept_timeout,
            wants.clone(),
            buffer,
            pipeline.clone(),
            MessageStreamer::new(writer.clone(), config.history_batch_size),
            gossip,
        );
        let history = HistoryStreamServer::new(writer.clone(), config.history_batch_size);

        let listener = spawn_contact_listener(
            writer.subscribe(),
            graph.clone(),
            wants.clone(),
            cancel.clone(),
        );

        info!(identity = %local, hops = config.hops, ebt = config.ebt_enabled, "Replication engine started");

        Self {
            config,
            identity,
            format: Scuttlebutt::new(hmac),
            storage,
            graph,
            wants,
            writer,
            pipeline,
            negotiator,
            history,
            publish_lock: Mutex::new(()),
            cancel,
            tasks: Mutex::new(vec![buffer_task, listener]),
        }
    }

    pub fn identity(&self) -> IdentityRef {
        self.identity.identity()
    }

    pub fn main_feed(&self) -> FeedRef {
        self.identity().main_feed()
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn writer(&self) -> &Arc<FeedWriter> {
        &self.writer
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Local feed
    // ═══════════════════════════════════════════════════════════════════════

    /// Sign `content` as the next message of the local main feed and store it.
    pub fn publish(&self, content: serde_json::Value) -> ReplicationResult<Message> {
        let _guard = self.publish_lock.lock();
        let feed = self.main_feed();

        let head = self.storage.get_feed(&feed)?.and_then(|f| f.head().cloned());
        let unsigned = UnsignedMessage::after(head.as_ref(), Utc::now(), content)?;
        let message = self.format.sign(&unsigned, &self.identity)?;
        let message = self.writer.append_one(message)?;

        debug!(feed = %feed, sequence = %message.sequence(), id = %message.id(), "Published message");
        Ok(message)
    }

    pub fn follow(&self, target: &IdentityRef) -> ReplicationResult<Message> {
        self.publish_contact(target, vec![ContactAction::Follow])
    }

    pub fn unfollow(&self, target: &IdentityRef) -> ReplicationResult<Message> {
        self.publish_contact(target, vec![ContactAction::Unfollow])
    }

    pub fn block(&self, target: &IdentityRef) -> ReplicationResult<Message> {
        self.publish_contact(target, vec![ContactAction::Unfollow, ContactAction::Block])
    }

    fn publish_contact(
        &self,
        target: &IdentityRef,
        actions: Vec<ContactAction>,
    ) -> ReplicationResult<Message> {
        let content = ContactContent::new(*target, ContactActions::new(actions)?);
        let message = self.publish(content.to_json())?;
        self.invalidate();
        info!(target = %target, "Published contact change");
        Ok(message)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Replication scope
    // ═══════════════════════════════════════════════════════════════════════

    pub fn ban(&self, feed: &FeedRef) -> ReplicationResult<()> {
        self.storage.ban_feed(feed)?;
        self.invalidate();
        Ok(())
    }

    pub fn unban(&self, feed: &FeedRef) -> ReplicationResult<()> {
        self.storage.unban_feed(feed)?;
        self.invalidate();
        Ok(())
    }

    pub fn social_graph(&self) -> ReplicationResult<SocialGraph> {
        self.graph.build()
    }

    pub fn wanted_feeds(&self) -> ReplicationResult<Arc<WantedFeeds>> {
        self.wants.get()
    }

    fn invalidate(&self) {
        self.graph.invalidate();
        self.wants.invalidate();
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Peers
    // ═══════════════════════════════════════════════════════════════════════

    /// This node as an in-memory transport endpoint.
    pub fn endpoint(&self) -> MemoryEndpoint {
        MemoryEndpoint {
            identity: self.identity(),
            history: self.history.clone(),
            ebt_enabled: self.config.ebt_enabled,
        }
    }

    pub fn history_server(&self) -> &HistoryStreamServer {
        &self.history
    }

    /// Token for one connection, also cancelled by [`shutdown`](Self::shutdown).
    pub fn connection_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Replicate with a newly connected peer until `cancel` fires or the
    /// connection fails.
    pub async fn replicate(
        &self,
        peer: Arc<dyn PeerConnection>,
        cancel: CancellationToken,
    ) -> ReplicationResult<Protocol> {
        let remote = peer.remote();

        // ends with either the caller's token or shutdown
        let session = self.cancel.child_token();
        let forward = {
            let session = session.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => session.cancel(),
                    _ = session.cancelled() => {}
                }
            })
        };

        let result = self.negotiator.replicate(session.clone(), peer).await;
        session.cancel();
        let _ = forward.await;

        match &result {
            Ok(protocol) => info!(peer = %remote, protocol = ?protocol, "Replication ended"),
            Err(e) => warn!(peer = %remote, error = %e, "Replication failed"),
        }
        result
    }

    /// Wait until every received message is in storage.
    pub async fn flush(&self) -> ReplicationResult<()> {
        self.pipeline.buffer().flush().await
    }

    /// Stop all replication and background tasks.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task failed");
            }
        }
        info!(identity = %self.identity(), "Replication engine stopped");
    }
}

impl Drop for ReplicationEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Invalidate the graph and want-list whenever a contact message lands.
fn spawn_contact_listener(
    mut appended: broadcast::Receiver<Message>,
    graph: Arc<SocialGraphBuilder>,
    wants: Arc<WantedFeedsCache>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = appended.recv() => received,
            };
            match received {
                Ok(message) => {
                    if let Some(KnownContent::Contact(contact)) = message.content().known() {
                        debug!(who = %message.author(), contact = %contact.contact(), "Contacts changed");
                        graph.invalidate();
                        wants.invalidate();
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Contact listener lagged, missed {} messages", n);
                    graph.invalidate();
                    wants.invalidate();
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("Contact listener stopped");
    })
}
