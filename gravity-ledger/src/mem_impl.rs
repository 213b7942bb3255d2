//! In-memory database, for tests and for embedding the state machine into a
//! host engine that supplies its own durability.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::db::{IRawDatabase, IRawDatabaseTransaction, PrefixStream};

#[derive(Debug)]
enum DatabaseOperation {
    Insert { key: String, value: Vec<u8> },
    Delete { key: String },
}

#[derive(Debug, Clone, Default)]
pub struct MemDatabase {
    data: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemDatabase {
    pub fn new() -> MemDatabase {
        MemDatabase::default()
    }

    /// Read-only snapshot of the whole store, for fixtures and debugging.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.data.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl IRawDatabase for MemDatabase {
    async fn begin_transaction<'a>(&'a self) -> Box<dyn IRawDatabaseTransaction + 'a> {
        let snapshot = self.data.lock().expect("lock poisoned").clone();
        Box::new(MemTransaction {
            operations: Vec::new(),
            tx_data: snapshot,
            db: self,
        })
    }
}

/// Reads see the transaction's own pending writes; the operation log is
/// replayed onto the shared map on commit. Single-writer only, which is all
/// the consensus pipeline needs.
#[derive(Debug)]
pub struct MemTransaction<'a> {
    operations: Vec<DatabaseOperation>,
    tx_data: BTreeMap<String, Vec<u8>>,
    db: &'a MemDatabase,
}

#[async_trait]
impl IRawDatabaseTransaction for MemTransaction<'_> {
    async fn raw_insert_entry(
        &mut self,
        key: &str,
        value: Vec<u8>,
    ) -> anyhow::Result<Option<Vec<u8>>> {
        let previous = self.tx_data.insert(key.to_owned(), value.clone());
        self.operations.push(DatabaseOperation::Insert {
            key: key.to_owned(),
            value,
        });
        Ok(previous)
    }

    async fn raw_get_value(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.tx_data.get(key).cloned())
    }

    async fn raw_remove_entry(&mut self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let previous = self.tx_data.remove(key);
        self.operations.push(DatabaseOperation::Delete {
            key: key.to_owned(),
        });
        Ok(previous)
    }

    async fn raw_find_by_prefix(&self, prefix: &str) -> anyhow::Result<PrefixStream<'_>> {
        let entries: Vec<(String, Vec<u8>)> = self
            .tx_data
            .range(prefix.to_owned()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Ok(Box::pin(stream::iter(entries)))
    }

    async fn commit_tx(self: Box<Self>) -> anyhow::Result<()> {
        let this = *self;
        let mut data = this.db.data.lock().expect("lock poisoned");
        for operation in this.operations {
            match operation {
                DatabaseOperation::Insert { key, value } => {
                    data.insert(key, value);
                }
                DatabaseOperation::Delete { key } => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt as _;

    use super::*;

    #[tokio::test]
    async fn reads_see_pending_writes() {
        let db = MemDatabase::new();
        let mut dbtx = db.begin_transaction().await;

        dbtx.raw_insert_entry("a_1", b"one".to_vec()).await.unwrap();
        assert_eq!(
            dbtx.raw_get_value("a_1").await.unwrap(),
            Some(b"one".to_vec())
        );

        dbtx.raw_remove_entry("a_1").await.unwrap();
        assert_eq!(dbtx.raw_get_value("a_1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn uncommitted_writes_are_invisible() {
        let db = MemDatabase::new();
        let mut dbtx = db.begin_transaction().await;
        dbtx.raw_insert_entry("a_1", b"one".to_vec()).await.unwrap();
        drop(dbtx);

        let dbtx = db.begin_transaction().await;
        assert_eq!(dbtx.raw_get_value("a_1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn commit_publishes_operations_in_order() {
        let db = MemDatabase::new();
        let mut dbtx = db.begin_transaction().await;
        dbtx.raw_insert_entry("a_1", b"one".to_vec()).await.unwrap();
        dbtx.raw_insert_entry("a_2", b"two".to_vec()).await.unwrap();
        dbtx.raw_remove_entry("a_1").await.unwrap();
        dbtx.commit_tx().await.unwrap();

        let dbtx = db.begin_transaction().await;
        assert_eq!(dbtx.raw_get_value("a_1").await.unwrap(), None);
        assert_eq!(
            dbtx.raw_get_value("a_2").await.unwrap(),
            Some(b"two".to_vec())
        );
    }

    #[tokio::test]
    async fn prefix_scan_is_sorted_and_bounded() {
        let db = MemDatabase::new();
        let mut dbtx = db.begin_transaction().await;
        for key in ["b_2", "a_2", "a_10", "c_1"] {
            dbtx.raw_insert_entry(key, key.as_bytes().to_vec())
                .await
                .unwrap();
        }

        let keys: Vec<String> = dbtx
            .raw_find_by_prefix("a_")
            .await
            .unwrap()
            .map(|(key, _)| key)
            .collect()
            .await;
        assert_eq!(keys, vec!["a_10", "a_2"]);
    }
}
