//! Helpers shared by unit tests.

use crate::error::ReplicationResult;
use crate::feed::{Message, RawMessage, UnsignedMessage};
use crate::formats::{MessageHmac, RawMessageIdentifier, Scuttlebutt};
use crate::graph::Hops;
use crate::identity::{FeedRef, PrivateIdentity};
use crate::pipeline::{FeedWriter, MessageBuffer, RawMessageHandler, ReplicationPipeline};
use crate::replication::{EbtStream, Notes};
use crate::storage::Storage;
use crate::wants::{WantedFeed, WantedFeeds, WantedFeedsCache, WantedFeedsRepository, WantedRange};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// `n` signed posts by `author`, starting at sequence 1.
pub fn signed_chain(author: &PrivateIdentity, n: usize) -> Vec<Message> {
    let format = Scuttlebutt::default();
    let mut messages: Vec<Message> = Vec::new();
    for i in 0..n {
        let unsigned =
            UnsignedMessage::after(messages.last(), Utc::now(), json!({"type": "post", "n": i}))
                .unwrap();
        messages.push(format.sign(&unsigned, author).unwrap());
    }
    messages
}

pub fn identifier() -> RawMessageIdentifier {
    RawMessageIdentifier::scuttlebutt(MessageHmac::default())
}

pub fn memory_storage() -> Arc<Storage> {
    Arc::new(Storage::in_memory(identifier()).unwrap())
}

/// Poll `condition` until it holds or a few seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// EBT stream that records what was sent.
#[derive(Default)]
pub struct RecordingStream {
    pub notes: Mutex<Vec<Notes>>,
    pub messages: Mutex<Vec<RawMessage>>,
}

impl RecordingStream {
    pub fn sent_messages(&self) -> Vec<RawMessage> {
        self.messages.lock().clone()
    }
}

#[async_trait]
impl EbtStream for RecordingStream {
    async fn send_notes(&self, notes: Notes) -> ReplicationResult<()> {
        self.notes.lock().push(notes);
        Ok(())
    }

    async fn send_message(&self, raw: RawMessage) -> ReplicationResult<()> {
        self.messages.lock().push(raw);
        Ok(())
    }
}

/// Handler that verifies and records messages without storing them.
#[derive(Default)]
pub struct RecordingHandler {
    pub handled: Mutex<Vec<RawMessage>>,
}

#[async_trait]
impl RawMessageHandler for RecordingHandler {
    async fn handle(&self, raw: RawMessage) -> ReplicationResult<Message> {
        self.handled.lock().push(raw.clone());
        identifier().verify_raw_message(&raw)
    }
}

/// Want-list with a fixed set of fully wanted feeds.
pub struct FixedWants(pub Vec<FeedRef>);

impl WantedFeedsRepository for FixedWants {
    fn get_wanted_feeds(&self) -> ReplicationResult<WantedFeeds> {
        Ok(WantedFeeds::new(
            self.0
                .iter()
                .map(|feed| WantedFeed {
                    feed: *feed,
                    hops: Hops::from(1),
                    range: WantedRange::Full,
                })
                .collect(),
        ))
    }
}

/// A pipeline over in-memory storage; the buffer only flushes on demand.
pub struct PipelineFixture {
    pub storage: Arc<Storage>,
    pub writer: Arc<FeedWriter>,
    pub wants: Arc<WantedFeedsCache>,
    pub pipeline: Arc<ReplicationPipeline>,
    pub cancel: CancellationToken,
}

impl Drop for PipelineFixture {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub fn pipeline_fixture(wanted: Vec<FeedRef>) -> PipelineFixture {
    let storage = memory_storage();
    let writer = Arc::new(FeedWriter::new(storage.clone()));
    let cancel = CancellationToken::new();
    let (buffer, _) = MessageBuffer::spawn(writer.clone(), 64, Duration::from_secs(3600), cancel.clone());
    let wants = Arc::new(WantedFeedsCache::new(
        Arc::new(FixedWants(wanted)),
        Duration::from_secs(60),
    ));
    PipelineFixture {
        pipeline: Arc::new(ReplicationPipeline::new(
            identifier(),
            storage.clone(),
            wants.clone(),
            buffer,
        )),
        storage,
        writer,
        wants,
        cancel,
    }
}
