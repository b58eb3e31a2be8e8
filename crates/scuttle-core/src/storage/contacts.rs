//! Contact Storage - the follow/block relation the social graph is built from
//!
//! Contacts are normally written as a side effect of appending contact
//! messages (see [`super::FeedRepository::update_feed`]); the explicit
//! operations below apply the same actions directly.

use crate::error::ReplicationResult;
use crate::feed::{Contact, ContactAction, ContactActions};
use crate::graph::ContactsStorage;
use crate::identity::IdentityRef;
use redb::{ReadableTable, Table, TableDefinition};
use tracing::trace;

use super::Storage;

/// Table for contacts (key: "<who>|<target>", value: serialized Contact)
pub(crate) const CONTACTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("contacts");

fn contact_key(who: &IdentityRef, target: &IdentityRef) -> String {
    format!("{}|{}", who, target)
}

/// Apply actions to the stored relation between `who` and `target`.
///
/// Contact messages pointing at their own author are ignored.
pub(super) fn apply(
    table: &mut Table<&'static str, &'static [u8]>,
    who: &IdentityRef,
    target: &IdentityRef,
    actions: &ContactActions,
) -> ReplicationResult<()> {
    if who == target {
        trace!(who = %who, "Ignoring contact with self");
        return Ok(());
    }

    let key = contact_key(who, target);
    let mut contact = match table.get(key.as_str())? {
        Some(data) => postcard::from_bytes::<Contact>(data.value())?,
        None => Contact::new(*who, *target)?,
    };
    contact.update(actions);

    let serialized = postcard::to_allocvec(&contact)?;
    table.insert(key.as_str(), serialized.as_slice())?;
    Ok(())
}

impl Storage {
    // ═══════════════════════════════════════════════════════════════════════
    // Contact Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Apply contact actions outside of a feed append.
    pub fn update_contact(
        &self,
        who: &IdentityRef,
        target: &IdentityRef,
        actions: &ContactActions,
    ) -> ReplicationResult<()> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(CONTACTS_TABLE)?;
            apply(&mut table, who, target, actions)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn follow(&self, who: &IdentityRef, target: &IdentityRef) -> ReplicationResult<()> {
        self.update_contact(who, target, &ContactActions::new(vec![ContactAction::Follow])?)
    }

    pub fn unfollow(&self, who: &IdentityRef, target: &IdentityRef) -> ReplicationResult<()> {
        self.update_contact(who, target, &ContactActions::new(vec![ContactAction::Unfollow])?)
    }

    pub fn block(&self, who: &IdentityRef, target: &IdentityRef) -> ReplicationResult<()> {
        self.update_contact(who, target, &ContactActions::new(vec![ContactAction::Block])?)
    }

    pub fn unblock(&self, who: &IdentityRef, target: &IdentityRef) -> ReplicationResult<()> {
        self.update_contact(who, target, &ContactActions::new(vec![ContactAction::Unblock])?)
    }
}

impl ContactsStorage for Storage {
    fn get_contacts(&self, node: &IdentityRef) -> ReplicationResult<Vec<Contact>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(CONTACTS_TABLE)?;

        // '}' sorts right after '|'
        let start = format!("{}|", node);
        let end = format!("{}}}", node);

        let mut contacts = Vec::new();
        for entry in table.range(start.as_str()..end.as_str())? {
            let (_, value) = entry?;
            contacts.push(postcard::from_bytes::<Contact>(value.value())?);
        }
        Ok(contacts)
    }
}
