//! Outbound per-feed message pushing for EBT sessions.

use crate::error::ReplicationResult;
use crate::feed::{Message, Sequence};
use crate::identity::FeedRef;
use crate::pipeline::FeedWriter;
use crate::replication::EbtStream;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Pushes one feed to a peer: stored history first, then new messages as
/// they are appended.
#[derive(Clone)]
pub struct MessageStreamer {
    writer: Arc<FeedWriter>,
    batch_size: usize,
}

impl MessageStreamer {
    pub fn new(writer: Arc<FeedWriter>, batch_size: usize) -> Self {
        Self {
            writer,
            batch_size: batch_size.max(1),
        }
    }

    /// Start streaming `feed` to `stream`, beginning at `from` (inclusive,
    /// the first message if `None`).
    ///
    /// The task stops when `cancel` fires or the stream fails.
    pub fn spawn(
        &self,
        feed: FeedRef,
        from: Option<Sequence>,
        stream: Arc<dyn EbtStream>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let streamer = self.clone();
        // subscribe before reading history so appends in between are not lost
        let live = self.writer.subscribe();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    trace!(feed = %feed, "Streamer cancelled");
                }
                result = streamer.stream(feed, from, stream.as_ref(), live) => {
                    if let Err(e) = result {
                        debug!(feed = %feed, error = %e, "Streamer stopped");
                    }
                }
            }
        })
    }

    async fn stream(
        &self,
        feed: FeedRef,
        from: Option<Sequence>,
        stream: &dyn EbtStream,
        mut live: broadcast::Receiver<Message>,
    ) -> ReplicationResult<()> {
        let mut next = from.unwrap_or_else(Sequence::first);
        self.catch_up(&feed, &mut next, stream).await?;

        loop {
            match live.recv().await {
                Ok(message) if message.feed() == &feed => {
                    if message.sequence() == next {
                        stream.send_message(message.raw().to_raw()).await?;
                        next = message.sequence().next();
                    } else if message.sequence() > next {
                        self.catch_up(&feed, &mut next, stream).await?;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(feed = %feed, missed = n, "Streamer lagged, reading from storage");
                    self.catch_up(&feed, &mut next, stream).await?;
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            }
        }
    }

    /// Send everything stored from `next` on, moving `next` past it.
    async fn catch_up(
        &self,
        feed: &FeedRef,
        next: &mut Sequence,
        stream: &dyn EbtStream,
    ) -> ReplicationResult<()> {
        loop {
            let batch = self
                .writer
                .repository()
                .get_messages(feed, Some(*next), Some(self.batch_size))?;
            if batch.is_empty() {
                return Ok(());
            }

            for message in &batch {
                stream.send_message(message.raw().to_raw()).await?;
                *next = message.sequence().next();
            }
            if batch.len() < self.batch_size {
                return Ok(());
            }
        }
    }
}
