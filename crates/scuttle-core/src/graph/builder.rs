//! Breadth-first construction of the social graph
//!
//! The traversal expands one hop level at a time. Every node is frozen at
//! the level it is first discovered at, so it always carries its smallest
//! hop count, and nodes on the last level are never expanded.
//!
//! [`SocialGraphBuilder::has_contact`] runs the same traversal lazily: it
//! only expands levels until the queried identity shows up, and keeps the
//! partial traversal for the next query.

use crate::error::ReplicationResult;
use crate::graph::{BanList, ContactsStorage, Hops, SocialGraph};
use crate::identity::IdentityRef;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

/// Builds social graphs rooted at the local identity.
pub struct SocialGraphBuilder {
    storage: Arc<dyn ContactsStorage>,
    ban_list: Arc<dyn BanList>,
    hops: Hops,
    local: IdentityRef,
    lazy: Mutex<Option<Traversal>>,
}

impl SocialGraphBuilder {
    pub fn new(
        storage: Arc<dyn ContactsStorage>,
        ban_list: Arc<dyn BanList>,
        hops: Hops,
        local: IdentityRef,
    ) -> Self {
        Self {
            storage,
            ban_list,
            hops,
            local,
            lazy: Mutex::new(None),
        }
    }

    pub fn local(&self) -> &IdentityRef {
        &self.local
    }

    pub fn hops(&self) -> Hops {
        self.hops
    }

    /// Build a complete graph from the current contacts.
    pub fn build(&self) -> ReplicationResult<SocialGraph> {
        let mut traversal = Traversal::start(self.local);
        while !traversal.is_complete(self.hops) {
            traversal.expand_level(self)?;
        }
        debug!(
            local = %self.local,
            hops = self.hops.get(),
            members = traversal.graph.len(),
            "Built social graph"
        );
        Ok(SocialGraph::from_map(traversal.graph))
    }

    /// Check membership, expanding the graph only as far as needed.
    pub fn has_contact(&self, id: &IdentityRef) -> ReplicationResult<bool> {
        let mut lazy = self.lazy.lock();
        let traversal = lazy.get_or_insert_with(|| Traversal::start(self.local));

        loop {
            if traversal.graph.contains_key(id) {
                return Ok(true);
            }
            if traversal.is_complete(self.hops) {
                return Ok(false);
            }
            if let Err(e) = traversal.expand_level(self) {
                *lazy = None;
                return Err(e);
            }
        }
    }

    /// Forget the lazy traversal used by [`has_contact`](Self::has_contact).
    ///
    /// Call after contacts or bans change.
    pub fn invalidate(&self) {
        *self.lazy.lock() = None;
    }
}

struct Traversal {
    graph: HashMap<IdentityRef, Hops>,
    frontier: Vec<IdentityRef>,
    depth: Hops,
    blocked_by_local: HashSet<IdentityRef>,
}

impl Traversal {
    fn start(local: IdentityRef) -> Self {
        Self {
            graph: HashMap::from([(local, Hops::zero())]),
            frontier: vec![local],
            depth: Hops::zero(),
            blocked_by_local: HashSet::new(),
        }
    }

    fn is_complete(&self, hops: Hops) -> bool {
        self.frontier.is_empty() || self.depth >= hops
    }

    fn expand_level(&mut self, builder: &SocialGraphBuilder) -> ReplicationResult<()> {
        let next_depth = self.depth.increment();
        let mut next = Vec::new();

        for node in std::mem::take(&mut self.frontier) {
            let contacts = builder.storage.get_contacts(&node)?;

            // Local is always the only node on level 0.
            if node == builder.local {
                self.blocked_by_local = contacts
                    .iter()
                    .filter(|c| c.blocking())
                    .map(|c| *c.target())
                    .collect();
            }

            for contact in contacts {
                if !contact.following() || contact.blocking() {
                    continue;
                }
                let target = *contact.target();
                if self.graph.contains_key(&target) || self.blocked_by_local.contains(&target) {
                    continue;
                }
                if builder.ban_list.contains_feed(&target.main_feed())? {
                    trace!(feed = %target, "Skipping banned feed");
                    continue;
                }
                self.graph.insert(target, next_depth);
                next.push(target);
            }
        }

        self.frontier = next;
        self.depth = next_depth;
        Ok(())
    }
}
