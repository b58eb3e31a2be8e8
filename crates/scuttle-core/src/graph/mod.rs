//! Trust-scoped social graph
//!
//! The graph records every identity reachable from the local identity by
//! following edges, together with the smallest number of hops needed to
//! reach it:
//!
//! ```text
//!   local (0) ──follows──▶ A (1) ──follows──▶ B (2) ──follows──▶ C (3)
//!       │                                     ▲
//!       └──────────────follows────────────────┘   B is recorded at 1
//! ```
//!
//! Identities the local node blocks, and feeds on the ban list, are cut
//! out of the graph together with everything only reachable through them.

mod builder;

pub use builder::SocialGraphBuilder;

use crate::error::{ReplicationError, ReplicationResult};
use crate::feed::Contact;
use crate::identity::{FeedRef, IdentityRef};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Source of the follow/block relation.
pub trait ContactsStorage: Send + Sync {
    /// Contacts of `node`, as set by messages in `node`'s own feed.
    fn get_contacts(&self, node: &IdentityRef) -> ReplicationResult<Vec<Contact>>;
}

/// Set of feeds excluded from replication.
pub trait BanList: Send + Sync {
    fn contains_feed(&self, feed: &FeedRef) -> ReplicationResult<bool>;
}

/// Number of follow edges between the local identity and a contact.
///
/// 0 is the local identity, 1 someone it follows, 2 someone followed by
/// someone it follows, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hops(u32);

impl Hops {
    pub fn new(n: i64) -> ReplicationResult<Self> {
        u32::try_from(n).map(Self).map_err(|_| {
            ReplicationError::InvalidValue(format!("hops must be a non-negative number, got {}", n))
        })
    }

    pub const fn zero() -> Self {
        Self(0)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    fn increment(self) -> Self {
        Self(self.0 + 1)
    }
}

impl From<u32> for Hops {
    fn from(n: u32) -> Self {
        Self(n)
    }
}

/// A graph member and its distance from the local identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphContact {
    pub id: IdentityRef,
    pub hops: Hops,
}

/// Snapshot of the social graph.
#[derive(Debug, Clone, Default)]
pub struct SocialGraph {
    graph: HashMap<IdentityRef, Hops>,
}

impl SocialGraph {
    pub(crate) fn from_map(graph: HashMap<IdentityRef, Hops>) -> Self {
        Self { graph }
    }

    /// Members ordered by hops (ties by identity).
    pub fn contacts(&self) -> Vec<GraphContact> {
        let mut contacts: Vec<_> = self
            .graph
            .iter()
            .map(|(id, hops)| GraphContact { id: *id, hops: *hops })
            .collect();
        contacts.sort_by(|a, b| a.hops.cmp(&b.hops).then_with(|| a.id.cmp(&b.id)));
        contacts
    }

    pub fn has_contact(&self, id: &IdentityRef) -> bool {
        self.graph.contains_key(id)
    }

    pub fn hops_of(&self, id: &IdentityRef) -> Option<Hops> {
        self.graph.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.graph.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hops_must_be_non_negative() {
        assert!(Hops::new(-1).is_err());
        assert_eq!(Hops::new(0).unwrap(), Hops::zero());
        assert_eq!(Hops::new(3).unwrap().get(), 3);
    }
}
