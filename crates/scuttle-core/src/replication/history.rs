//! Serving `createHistoryStream` requests from local storage.

use crate::error::ReplicationResult;
use crate::feed::{Message, RawMessage, Sequence};
use crate::pipeline::FeedWriter;
use crate::replication::{HistoryStream, HistoryStreamRequest};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type Outgoing = mpsc::Sender<ReplicationResult<RawMessage>>;

/// Answers history stream requests made by peers.
#[derive(Clone)]
pub struct HistoryStreamServer {
    writer: Arc<FeedWriter>,
    batch_size: usize,
}

/// Progress of one stream.
struct Cursor {
    next: Option<Sequence>,
    remaining: Option<usize>,
}

impl Cursor {
    fn exhausted(&self) -> bool {
        self.remaining == Some(0)
    }
}

impl HistoryStreamServer {
    pub fn new(writer: Arc<FeedWriter>, batch_size: usize) -> Self {
        Self {
            writer,
            batch_size: batch_size.max(1),
        }
    }

    /// Start serving `request`.
    ///
    /// The stream ends after the stored messages unless the request is
    /// live, in which case it ends when `cancel` fires or the receiver is
    /// dropped.
    pub fn serve(&self, request: HistoryStreamRequest, cancel: CancellationToken) -> HistoryStream {
        let (tx, rx) = mpsc::channel(self.batch_size);
        let live = request.live.then(|| self.writer.subscribe());
        let server = self.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => Ok(()),
                result = server.stream(request, &tx, live) => result,
            };
            if let Err(e) = result {
                warn!(feed = %request.feed, error = %e, "History stream failed");
                let _ = tx.send(Err(e)).await;
            }
        });
        rx
    }

    async fn stream(
        &self,
        request: HistoryStreamRequest,
        tx: &Outgoing,
        live: Option<broadcast::Receiver<Message>>,
    ) -> ReplicationResult<()> {
        let mut cursor = Cursor {
            next: request.seq,
            remaining: request.limit,
        };
        debug!(feed = %request.feed, seq = ?request.seq, limit = ?request.limit, live = request.live, "Serving history stream");

        if !self.send_stored(&request, &mut cursor, tx).await? {
            return Ok(());
        }

        let Some(mut live) = live else {
            return Ok(());
        };
        while !cursor.exhausted() {
            match live.recv().await {
                Ok(message) if message.feed() == &request.feed => {
                    let expected = cursor.next.unwrap_or_else(Sequence::first);
                    if message.sequence() >= expected && !self.send_stored(&request, &mut cursor, tx).await? {
                        return Ok(());
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    if !self.send_stored(&request, &mut cursor, tx).await? {
                        return Ok(());
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        Ok(())
    }

    /// Send stored messages from the cursor on; `false` once the receiver is gone.
    async fn send_stored(
        &self,
        request: &HistoryStreamRequest,
        cursor: &mut Cursor,
        tx: &Outgoing,
    ) -> ReplicationResult<bool> {
        let repository = self.writer.repository();
        loop {
            if cursor.exhausted() {
                return Ok(true);
            }
            let take = cursor
                .remaining
                .map_or(self.batch_size, |r| r.min(self.batch_size));
            let batch = repository.get_messages(&request.feed, cursor.next, Some(take))?;

            for message in &batch {
                if tx.send(Ok(message.raw().to_raw())).await.is_err() {
                    return Ok(false);
                }
                cursor.next = Some(message.sequence().next());
                if let Some(remaining) = cursor.remaining.as_mut() {
                    *remaining -= 1;
                }
            }
            if batch.len() < take {
                return Ok(true);
            }
        }
    }
}
