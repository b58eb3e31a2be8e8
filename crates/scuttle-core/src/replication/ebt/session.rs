use crate::error::{ErrorKind, ReplicationError, ReplicationResult};
use crate::identity::{FeedRef, IdentityRef};
use crate::pipeline::RawMessageHandler;
use crate::replication::ebt::{MessageStreamer, Note, Notes};
use crate::replication::{EbtStream, IncomingMessage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Default)]
struct SessionState {
    remote_notes: HashMap<FeedRef, Note>,
    streamers: HashMap<FeedRef, CancellationToken>,
}

/// One EBT session with one peer.
///
/// Notes from the remote decide which feeds are pushed to it. Every note
/// replaces the streamer previously running for its feed.
pub struct EbtSession {
    remote: IdentityRef,
    outgoing: Arc<dyn EbtStream>,
    handler: Arc<dyn RawMessageHandler>,
    streamer: MessageStreamer,
    state: Mutex<SessionState>,
    cancel: CancellationToken,
}

impl EbtSession {
    pub fn new(
        remote: IdentityRef,
        outgoing: Arc<dyn EbtStream>,
        handler: Arc<dyn RawMessageHandler>,
        streamer: MessageStreamer,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            remote,
            outgoing,
            handler,
            streamer,
            state: Mutex::new(SessionState::default()),
            cancel,
        }
    }

    pub fn remote(&self) -> &IdentityRef {
        &self.remote
    }

    /// Last note the remote sent for `feed`.
    pub fn remote_note(&self, feed: &FeedRef) -> Option<Note> {
        self.state.lock().remote_notes.get(feed).copied()
    }

    /// Number of feeds currently streamed to the remote.
    pub fn active_streamers(&self) -> usize {
        self.state.lock().streamers.len()
    }

    /// Send `local_notes` and process incoming traffic until the remote
    /// closes the session or it is cancelled.
    pub async fn run(
        &self,
        mut incoming: mpsc::Receiver<IncomingMessage>,
        local_notes: Notes,
    ) -> ReplicationResult<()> {
        info!(peer = %self.remote, feeds = local_notes.len(), "EBT session started");

        let result = async {
            if !local_notes.is_empty() {
                self.outgoing.send_notes(local_notes).await?;
            }

            loop {
                let next = tokio::select! {
                    _ = self.cancel.cancelled() => return Ok(()),
                    next = incoming.recv() => next,
                };
                let Some(message) = next else {
                    return Ok(());
                };

                if let Err(e) = self.handle_incoming(message).await {
                    match e.kind() {
                        ErrorKind::Transport | ErrorKind::Cancelled => return Err(e),
                        ErrorKind::Validation => {
                            warn!(peer = %self.remote, error = %e, "Dropped message from EBT session")
                        }
                        _ => debug!(peer = %self.remote, error = %e, "Error processing incoming message"),
                    }
                }
            }
        }
        .await;

        self.stop_streamers();
        info!(peer = %self.remote, "EBT session ended");
        result
    }

    pub async fn handle_incoming(&self, incoming: IncomingMessage) -> ReplicationResult<()> {
        match incoming {
            IncomingMessage::Notes(notes) => {
                self.handle_notes(&notes);
                Ok(())
            }
            IncomingMessage::Message(raw) => self.handler.handle(raw).await.map(|_| ()),
            IncomingMessage::Error(e) => Err(e),
        }
    }

    /// Record remote notes and restart the affected streamers.
    pub fn handle_notes(&self, notes: &Notes) {
        let mut state = self.state.lock();
        for (feed, note) in notes.iter() {
            debug!(peer = %self.remote, feed = %feed, note = ?note, "Received note");
            state.remote_notes.insert(*feed, *note);

            if let Some(previous) = state.streamers.remove(feed) {
                previous.cancel();
            }

            if note.replicate() && note.receive() {
                let token = self.cancel.child_token();
                self.streamer
                    .spawn(*feed, note.sequence(), self.outgoing.clone(), token.clone());
                state.streamers.insert(*feed, token);
            }
        }
    }

    fn stop_streamers(&self) {
        for (_, token) in self.state.lock().streamers.drain() {
            token.cancel();
        }
    }
}
