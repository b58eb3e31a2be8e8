//! Bounded buffer between replication streams and storage
//!
//! ```text
//!  gossip / ebt ──push──▶ [ bounded mpsc ] ──▶ flush task ──▶ FeedWriter
//!                 │                │              (per feed batches,
//!          continuity     full: push waits         every interval or
//!            check                                 when the batch is full)
//! ```
//!
//! Receivers never write storage themselves. When storage is slow the
//! channel fills up and `push` waits, which in turn stops reading from the
//! peer.
//!
//! `push` only accepts the message that directly follows the feed's last
//! buffered message, or its stored head when nothing is buffered. Messages
//! enter the channel in the order they were accepted, so each batch is
//! already in feed order.

use crate::error::{ReplicationError, ReplicationResult};
use crate::feed::{Message, Sequence};
use crate::identity::FeedRef;
use crate::pipeline::FeedWriter;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

enum BufferCommand {
    Message(Message),
    Flush(oneshot::Sender<ReplicationResult<()>>),
}

/// Last accepted message per feed that has not reached storage yet.
type PendingHeads = Arc<Mutex<HashMap<FeedRef, Message>>>;

/// Handle for pushing verified messages towards storage.
#[derive(Clone)]
pub struct MessageBuffer {
    tx: mpsc::Sender<BufferCommand>,
    writer: Arc<FeedWriter>,
    pending: PendingHeads,
}

impl MessageBuffer {
    /// Start the flush task.
    ///
    /// The task runs until `cancel` fires or every handle is dropped, and
    /// flushes whatever is still buffered before it exits.
    pub fn spawn(
        writer: Arc<FeedWriter>,
        capacity: usize,
        flush_interval: Duration,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let pending = Arc::new(Mutex::new(HashMap::new()));

        let task = FlushTask {
            rx,
            writer: writer.clone(),
            pending: pending.clone(),
            batch: HashMap::new(),
            batch_len: 0,
            capacity: capacity.max(1),
            failure: None,
        };
        let handle = tokio::spawn(task.run(flush_interval, cancel));

        (
            Self {
                tx,
                writer,
                pending,
            },
            handle,
        )
    }

    /// Queue a message, waiting while the buffer is full.
    ///
    /// Fails with [`ReplicationError::ChainViolation`] unless the message
    /// directly continues what is buffered or stored for its feed.
    pub async fn push(&self, message: Message) -> ReplicationResult<()> {
        // reserve first so the channel order matches the order of the checks
        let permit = self
            .tx
            .reserve()
            .await
            .map_err(|_| ReplicationError::Cancelled)?;

        let feed = *message.feed();
        let mut pending = self.pending.lock();
        let head = match pending.get(&feed) {
            Some(head) => Some(head.clone()),
            None => self
                .writer
                .repository()
                .get_feed(&feed)?
                .and_then(|stored| stored.head().cloned()),
        };
        check_continues(head.as_ref(), &message)?;

        pending.insert(feed, message.clone());
        permit.send(BufferCommand::Message(message));
        Ok(())
    }

    /// Wait until everything pushed so far reached storage.
    ///
    /// Returns the first error hit while persisting since the previous
    /// flush, including batches flushed by the timer.
    pub async fn flush(&self) -> ReplicationResult<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(BufferCommand::Flush(ack_tx))
            .await
            .map_err(|_| ReplicationError::Cancelled)?;
        ack_rx.await.map_err(|_| ReplicationError::Cancelled)?
    }

    /// Highest sequence buffered for `feed` and not flushed yet.
    pub fn last_buffered(&self, feed: &FeedRef) -> Option<Sequence> {
        self.pending.lock().get(feed).map(Message::sequence)
    }

    /// Highest sequence stored or on its way to storage.
    pub fn known_sequence(&self, feed: &FeedRef) -> ReplicationResult<Option<Sequence>> {
        let stored = self.writer.repository().get_sequence(feed)?;
        Ok(stored.max(self.last_buffered(feed)))
    }

    pub fn writer(&self) -> &Arc<FeedWriter> {
        &self.writer
    }
}

fn check_continues(head: Option<&Message>, message: &Message) -> ReplicationResult<()> {
    let continues = match head {
        Some(head) => head.comes_directly_before(message),
        None => message.sequence().is_first() && message.previous().is_none(),
    };
    if continues {
        return Ok(());
    }
    let expected = head.map(|h| h.sequence().next()).unwrap_or_else(Sequence::first);
    Err(ReplicationError::ChainViolation(format!(
        "feed {} expected sequence {}, got {}",
        message.feed(),
        expected,
        message.sequence()
    )))
}

struct FlushTask {
    rx: mpsc::Receiver<BufferCommand>,
    writer: Arc<FeedWriter>,
    pending: PendingHeads,
    batch: HashMap<FeedRef, Vec<Message>>,
    batch_len: usize,
    capacity: usize,
    /// First persist error not yet reported to a flush caller
    failure: Option<ReplicationError>,
}

impl FlushTask {
    async fn run(mut self, flush_interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // drain what was already accepted
                    while let Ok(command) = self.rx.try_recv() {
                        self.handle(command);
                    }
                    break;
                }
                command = self.rx.recv() => {
                    match command {
                        Some(command) => self.handle(command),
                        None => break,
                    }
                }
                _ = ticker.tick() => self.flush(),
            }
        }

        self.flush();
        if let Some(e) = self.failure.take() {
            warn!(error = %e, "Message buffer stopped with unreported persist error");
        }
        info!("Message buffer stopped");
    }

    fn handle(&mut self, command: BufferCommand) {
        match command {
            BufferCommand::Message(message) => {
                self.batch.entry(*message.feed()).or_default().push(message);
                self.batch_len += 1;
                if self.batch_len >= self.capacity {
                    self.flush();
                }
            }
            BufferCommand::Flush(ack) => {
                self.flush();
                let _ = ack.send(self.failure.take().map_or(Ok(()), Err));
            }
        }
    }

    fn flush(&mut self) {
        if self.batch_len == 0 {
            return;
        }
        debug!(messages = self.batch_len, feeds = self.batch.len(), "Flushing message buffer");

        for (feed, messages) in std::mem::take(&mut self.batch) {
            let attempted = messages.last().map(Message::sequence);
            let failed = match self.writer.append(&feed, &messages) {
                Ok(appended) => appended.rejected,
                Err(e) => Some(e),
            };

            let mut pending = self.pending.lock();
            match failed {
                Some(e) => {
                    error!(feed = %feed, error = %e, "Failed to persist buffered messages");
                    // fall back to the stored head so the lost range is requested again
                    pending.remove(&feed);
                    self.failure.get_or_insert(e);
                }
                None => {
                    let flushed = pending
                        .get(&feed)
                        .is_some_and(|head| Some(head.sequence()) <= attempted);
                    if flushed {
                        pending.remove(&feed);
                    }
                }
            }
        }
        self.batch_len = 0;
    }
}
