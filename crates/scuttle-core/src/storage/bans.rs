//! Ban list storage

use crate::error::ReplicationResult;
use crate::graph::BanList;
use crate::identity::FeedRef;
use redb::TableDefinition;
use tracing::info;

use super::Storage;

/// Table for banned feeds (key: feed ref, value: empty)
pub(crate) const BANS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("bans");

impl Storage {
    pub fn ban_feed(&self, feed: &FeedRef) -> ReplicationResult<()> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(BANS_TABLE)?;
            let key = feed.to_string();
            let empty: &[u8] = &[];
            table.insert(key.as_str(), empty)?;
        }
        write_txn.commit()?;
        info!(feed = %feed, "Banned feed");
        Ok(())
    }

    pub fn unban_feed(&self, feed: &FeedRef) -> ReplicationResult<()> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(BANS_TABLE)?;
            let key = feed.to_string();
            table.remove(key.as_str())?;
        }
        write_txn.commit()?;
        info!(feed = %feed, "Unbanned feed");
        Ok(())
    }
}

impl BanList for Storage {
    fn contains_feed(&self, feed: &FeedRef) -> ReplicationResult<bool> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(BANS_TABLE)?;
        let key = feed.to_string();
        Ok(table.get(key.as_str())?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use crate::formats::{MessageHmac, RawMessageIdentifier};
    use crate::graph::BanList;
    use crate::identity::PrivateIdentity;
    use crate::storage::Storage;

    #[test]
    fn test_ban_and_unban() {
        let storage =
            Storage::in_memory(RawMessageIdentifier::scuttlebutt(MessageHmac::default())).unwrap();
        let feed = PrivateIdentity::generate().unwrap().identity().main_feed();

        assert!(!storage.contains_feed(&feed).unwrap());
        storage.ban_feed(&feed).unwrap();
        assert!(storage.contains_feed(&feed).unwrap());
        storage.unban_feed(&feed).unwrap();
        assert!(!storage.contains_feed(&feed).unwrap());
    }
}
