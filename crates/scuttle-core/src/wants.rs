//! Want-list: which feeds this node replicates
//!
//! The want-list is derived from the social graph: the main feed of every
//! graph member is wanted in full. Replication reads it constantly, so it
//! sits behind [`WantedFeedsCache`], which only goes back to the
//! repository when the cached list is older than the refresh interval or
//! was explicitly invalidated.

use crate::error::ReplicationResult;
use crate::feed::Sequence;
use crate::graph::{Hops, SocialGraphBuilder};
use crate::identity::FeedRef;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// How much of a feed is wanted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WantedRange {
    Full,
    UpTo(Sequence),
}

impl WantedRange {
    /// Whether a message at `sequence` falls inside the range.
    pub fn covers(&self, sequence: Sequence) -> bool {
        match self {
            WantedRange::Full => true,
            WantedRange::UpTo(last) => sequence <= *last,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WantedFeed {
    pub feed: FeedRef,
    pub hops: Hops,
    pub range: WantedRange,
}

/// The complete want-list.
#[derive(Debug, Clone, Default)]
pub struct WantedFeeds {
    feeds: Vec<WantedFeed>,
    index: HashMap<FeedRef, usize>,
}

impl WantedFeeds {
    pub fn new(feeds: Vec<WantedFeed>) -> Self {
        let index = feeds
            .iter()
            .enumerate()
            .map(|(i, wanted)| (wanted.feed, i))
            .collect();
        Self { feeds, index }
    }

    pub fn feeds(&self) -> &[WantedFeed] {
        &self.feeds
    }

    pub fn get(&self, feed: &FeedRef) -> Option<&WantedFeed> {
        self.index.get(feed).map(|&i| &self.feeds[i])
    }

    pub fn contains(&self, feed: &FeedRef) -> bool {
        self.index.contains_key(feed)
    }

    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }
}

/// Source of truth for the want-list.
pub trait WantedFeedsRepository: Send + Sync {
    fn get_wanted_feeds(&self) -> ReplicationResult<WantedFeeds>;
}

/// Wants the main feed of every social graph member, in full.
pub struct SocialGraphWantedFeeds {
    builder: Arc<SocialGraphBuilder>,
}

impl SocialGraphWantedFeeds {
    pub fn new(builder: Arc<SocialGraphBuilder>) -> Self {
        Self { builder }
    }
}

impl WantedFeedsRepository for SocialGraphWantedFeeds {
    fn get_wanted_feeds(&self) -> ReplicationResult<WantedFeeds> {
        let graph = self.builder.build()?;
        Ok(WantedFeeds::new(
            graph
                .contacts()
                .into_iter()
                .map(|contact| WantedFeed {
                    feed: contact.id.main_feed(),
                    hops: contact.hops,
                    range: WantedRange::Full,
                })
                .collect(),
        ))
    }
}

struct CachedFeeds {
    loaded_at: Instant,
    feeds: Arc<WantedFeeds>,
}

#[derive(Default)]
struct CacheState {
    /// Bumped by every invalidation
    generation: u64,
    current: Option<CachedFeeds>,
}

/// Read-through cache over a [`WantedFeedsRepository`].
pub struct WantedFeedsCache {
    repository: Arc<dyn WantedFeedsRepository>,
    refresh_interval: Duration,
    state: RwLock<CacheState>,
}

impl WantedFeedsCache {
    pub fn new(repository: Arc<dyn WantedFeedsRepository>, refresh_interval: Duration) -> Self {
        Self {
            repository,
            refresh_interval,
            state: RwLock::new(CacheState::default()),
        }
    }

    /// Current want-list, reloaded if stale.
    ///
    /// The list is built without holding the lock. A list built across an
    /// [`invalidate`](Self::invalidate) is returned but not cached.
    pub fn get(&self) -> ReplicationResult<Arc<WantedFeeds>> {
        let generation = {
            let state = self.state.read();
            if let Some(current) = state.current.as_ref() {
                if current.loaded_at.elapsed() < self.refresh_interval {
                    return Ok(current.feeds.clone());
                }
            }
            state.generation
        };

        let feeds = Arc::new(self.repository.get_wanted_feeds()?);
        debug!(feeds = feeds.len(), "Refreshed want-list");

        let mut state = self.state.write();
        if state.generation == generation {
            state.current = Some(CachedFeeds {
                loaded_at: Instant::now(),
                feeds: feeds.clone(),
            });
        }
        Ok(feeds)
    }

    pub fn contains(&self, feed: &FeedRef) -> ReplicationResult<bool> {
        Ok(self.get()?.contains(feed))
    }

    /// Drop the cached list so the next read goes to the repository.
    pub fn invalidate(&self) {
        let mut state = self.state.write();
        state.generation += 1;
        state.current = None;
    }
}
