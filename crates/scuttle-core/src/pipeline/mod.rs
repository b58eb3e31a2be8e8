//! Validation and append pipeline
//!
//! Both replication protocols hand every raw message they receive to a
//! [`RawMessageHandler`]. The default handler, [`ReplicationPipeline`],
//! runs each message through the same steps:
//!
//! ```text
//! RawMessage ──verify──▶ Message ──ban list──▶ want-list ──▶ MessageBuffer ──▶ FeedWriter
//!              (formats)            (reject)     (reject)       (bounded)       (storage)
//! ```

mod buffer;
mod writer;

pub use buffer::MessageBuffer;
pub use writer::{Appended, FeedWriter};

use crate::error::{ReplicationError, ReplicationResult};
use crate::feed::{Message, RawMessage};
use crate::formats::RawMessageIdentifier;
use crate::graph::BanList;
use crate::wants::WantedFeedsCache;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::trace;

/// Consumer of raw messages received from peers.
#[async_trait]
pub trait RawMessageHandler: Send + Sync {
    /// Validate a message and queue it for storage.
    ///
    /// Returns the verified message once it is accepted.
    async fn handle(&self, raw: RawMessage) -> ReplicationResult<Message>;
}

pub struct ReplicationPipeline {
    identifier: RawMessageIdentifier,
    ban_list: Arc<dyn BanList>,
    wants: Arc<WantedFeedsCache>,
    buffer: MessageBuffer,
}

impl ReplicationPipeline {
    pub fn new(
        identifier: RawMessageIdentifier,
        ban_list: Arc<dyn BanList>,
        wants: Arc<WantedFeedsCache>,
        buffer: MessageBuffer,
    ) -> Self {
        Self {
            identifier,
            ban_list,
            wants,
            buffer,
        }
    }

    pub fn buffer(&self) -> &MessageBuffer {
        &self.buffer
    }

    pub fn identifier(&self) -> &RawMessageIdentifier {
        &self.identifier
    }

    /// Check a verified message against the ban list and want-list, then
    /// queue it for storage.
    ///
    /// The buffer only takes the message that directly continues the feed,
    /// anything else fails with [`ReplicationError::ChainViolation`].
    pub async fn accept(&self, message: Message) -> ReplicationResult<()> {
        let feed = *message.feed();

        if self.ban_list.contains_feed(&feed)? {
            return Err(ReplicationError::Banned(feed.to_string()));
        }

        let wants = self.wants.get()?;
        match wants.get(&feed) {
            Some(wanted) if wanted.range.covers(message.sequence()) => {}
            _ => {
                return Err(ReplicationError::NotWanted(format!(
                    "{} at sequence {}",
                    feed,
                    message.sequence()
                )))
            }
        }

        trace!(feed = %feed, sequence = %message.sequence(), "Accepted message");
        self.buffer.push(message).await
    }
}

#[async_trait]
impl RawMessageHandler for ReplicationPipeline {
    async fn handle(&self, raw: RawMessage) -> ReplicationResult<Message> {
        let message = self.identifier.verify_raw_message(&raw)?;
        self.accept(message.clone()).await?;
        Ok(message)
    }
}
