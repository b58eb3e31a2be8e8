//! Pull replication over history streams
//!
//! Every pass walks the want-list and asks the peer, feed by feed, for the
//! suffix we are missing:
//!
//! ```text
//!   Idle ──▶ RequestingFeed ──▶ StreamingMessages ──▶ Idle
//!     └──────────────── cancelled ─────────────────▶ Closed
//! ```
//!
//! A bad message only ends the stream of its own feed. Transport failures
//! end replication with the peer.

use crate::error::{ErrorKind, ReplicationError, ReplicationResult};
use crate::feed::{Message, Sequence};
use crate::identity::{FeedRef, IdentityRef};
use crate::pipeline::ReplicationPipeline;
use crate::replication::{HistoryStreamRequest, PeerConnection};
use crate::wants::{WantedFeed, WantedFeedsCache, WantedRange};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Replication state of one feed with one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GossipState {
    Idle,
    RequestingFeed,
    StreamingMessages,
    Closed,
}

pub struct GossipReplicator {
    wants: Arc<WantedFeedsCache>,
    pipeline: Arc<ReplicationPipeline>,
    fan_out: usize,
    pass_interval: Duration,
    states: Mutex<HashMap<IdentityRef, HashMap<FeedRef, GossipState>>>,
}

impl GossipReplicator {
    pub fn new(
        wants: Arc<WantedFeedsCache>,
        pipeline: Arc<ReplicationPipeline>,
        fan_out: usize,
        pass_interval: Duration,
    ) -> Self {
        Self {
            wants,
            pipeline,
            fan_out: fan_out.max(1),
            pass_interval,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Current state of `feed` with `peer`, `None` once the peer is closed.
    pub fn state(&self, peer: &IdentityRef, feed: &FeedRef) -> Option<GossipState> {
        self.states.lock().get(peer)?.get(feed).copied()
    }

    /// Run passes against `peer` until cancelled or the connection fails.
    pub async fn replicate(
        &self,
        peer: &dyn PeerConnection,
        cancel: &CancellationToken,
    ) -> ReplicationResult<()> {
        let remote = peer.remote();
        info!(peer = %remote, "Gossip replication started");

        let result = loop {
            let pass = tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                pass = self.run_pass(peer) => pass,
            };
            match pass {
                Ok(received) => debug!(peer = %remote, received, "Gossip pass finished"),
                Err(e) => break Err(e),
            }

            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                _ = tokio::time::sleep(self.pass_interval) => {}
            }
        };

        self.close(&remote);
        info!(peer = %remote, "Gossip replication stopped");
        result
    }

    /// Request every wanted feed once; returns the number of accepted
    /// messages.
    pub async fn run_pass(&self, peer: &dyn PeerConnection) -> ReplicationResult<usize> {
        let wants = self.wants.get()?;
        let remote = peer.remote();

        let mut results = stream::iter(wants.feeds().iter().cloned())
            .map(|wanted| self.replicate_feed(peer, wanted))
            .buffer_unordered(self.fan_out);

        let mut received = 0;
        while let Some((feed, result)) = results.next().await {
            match result {
                Ok(n) => received += n,
                Err(e) if matches!(e.kind(), ErrorKind::Transport | ErrorKind::Cancelled) => {
                    return Err(e)
                }
                Err(e) => {
                    warn!(peer = %remote, feed = %feed, error = %e, "Abandoned feed stream")
                }
            }
        }
        Ok(received)
    }

    async fn replicate_feed(
        &self,
        peer: &dyn PeerConnection,
        wanted: WantedFeed,
    ) -> (FeedRef, ReplicationResult<usize>) {
        let remote = peer.remote();
        let feed = wanted.feed;
        let result = self.request_feed(peer, &remote, &wanted).await;
        self.set_state(&remote, &feed, GossipState::Idle);
        (feed, result)
    }

    async fn request_feed(
        &self,
        peer: &dyn PeerConnection,
        remote: &IdentityRef,
        wanted: &WantedFeed,
    ) -> ReplicationResult<usize> {
        let feed = wanted.feed;
        self.set_state(remote, &feed, GossipState::RequestingFeed);

        let known = self.pipeline.buffer().known_sequence(&feed)?;
        let start = known.map(Sequence::next).unwrap_or_else(Sequence::first);
        let limit = match wanted.range {
            WantedRange::Full => None,
            WantedRange::UpTo(end) if end < start => return Ok(0),
            WantedRange::UpTo(end) => Some((end.get() - start.get() + 1) as usize),
        };

        let request = HistoryStreamRequest {
            limit,
            ..HistoryStreamRequest::new(feed, Some(start))
        };
        trace!(peer = %remote, feed = %feed, start = %start, "Requesting history stream");
        let mut stream = peer.create_history_stream(request).await?;
        self.set_state(remote, &feed, GossipState::StreamingMessages);

        let mut previous: Option<Message> = None;
        let mut received = 0;
        while let Some(raw) = stream.recv().await {
            let message = self.pipeline.identifier().verify_raw_message(&raw?)?;
            check_continues(&feed, start, previous.as_ref(), &message)?;
            self.pipeline.accept(message.clone()).await?;
            previous = Some(message);
            received += 1;
        }

        if received > 0 {
            debug!(peer = %remote, feed = %feed, received, "Received feed messages");
        }
        Ok(received)
    }

    fn set_state(&self, peer: &IdentityRef, feed: &FeedRef, state: GossipState) {
        self.states
            .lock()
            .entry(*peer)
            .or_default()
            .insert(*feed, state);
    }

    /// Move every feed of `peer` to `Closed` and forget the peer.
    fn close(&self, peer: &IdentityRef) {
        let feeds = self.states.lock().remove(peer).unwrap_or_default();
        for (feed, state) in feeds {
            trace!(peer = %peer, feed = %feed, from = ?state, to = ?GossipState::Closed, "Gossip state");
        }
    }

    /// Peers with replication state held.
    pub fn tracked_peers(&self) -> usize {
        self.states.lock().len()
    }
}

/// The next message of a stream must be the one after the last.
fn check_continues(
    feed: &FeedRef,
    start: Sequence,
    previous: Option<&Message>,
    message: &Message,
) -> ReplicationResult<()> {
    if message.feed() != feed {
        return Err(ReplicationError::ChainViolation(format!(
            "requested {} but received a message of {}",
            feed,
            message.feed()
        )));
    }
    let follows = match previous {
        Some(previous) => previous.comes_directly_before(message),
        None => message.sequence() == start,
    };
    if !follows {
        return Err(ReplicationError::ChainViolation(format!(
            "message {} of {} does not continue the stream",
            message.sequence(),
            feed
        )));
    }
    Ok(())
}
