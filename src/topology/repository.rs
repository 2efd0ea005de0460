//! Topology Repository
//!
//! Typed accessors over the raw key-value store: node records under
//! `nodes/`, the master pointer at `topology/master`, and informational
//! slave records under `topology/slaves/`. The master pointer is the
//! single compare-and-swap point; every other write is a plain put.

use tracing::warn;

use crate::error::Result;
use crate::store::{KvCompare, KvStore, KvTxn, KvWrite};

use super::record::{decode_record, NodeRecord, NodeRole, SlaveRecord};

/// Prefix for node registration records
pub const NODES_PREFIX: &str = "nodes/";
/// Key holding the current master's node id (plain UTF-8, not JSON)
pub const MASTER_KEY: &str = "topology/master";
/// Prefix for informational slave records
pub const SLAVES_PREFIX: &str = "topology/slaves/";

/// Domain layer over the consensus store
pub struct TopologyRepository<S> {
    store: S,
}

impl<S: KvStore> TopologyRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// List registered node ids, excluding sub-paths under `nodes/`
    pub async fn list_nodes(&self) -> Result<Vec<String>> {
        let keys = self.store.list_keys(NODES_PREFIX).await?;
        let mut ids: Vec<String> = keys
            .iter()
            .filter_map(|k| k.strip_prefix(NODES_PREFIX))
            .filter(|id| !id.is_empty() && !id.contains('/'))
            .map(str::to_string)
            .collect();
        ids.dedup();
        Ok(ids)
    }

    /// Read a node record. Missing or malformed values return `None`;
    /// a malformed value is logged so the sweep can prune it.
    pub async fn get_node(&self, id: &str) -> Result<Option<NodeRecord>> {
        let key = node_key(id);
        match self.store.get(&key).await? {
            Some(bytes) => {
                let record = decode_record::<NodeRecord>(&bytes);
                if record.is_none() {
                    warn!(node = id, key = %key, "Ignoring malformed node record");
                }
                Ok(record)
            }
            None => Ok(None),
        }
    }

    /// Overwrite a node record
    pub async fn put_node(&self, id: &str, record: &NodeRecord) -> Result<()> {
        self.store.put(&node_key(id), record.to_bytes()).await
    }

    /// Delete a node record
    pub async fn delete_node(&self, id: &str) -> Result<()> {
        self.store.delete(&node_key(id)).await
    }

    /// Read the master pointer
    pub async fn get_master(&self) -> Result<Option<String>> {
        let value = self.store.get(MASTER_KEY).await?;
        Ok(value.and_then(|bytes| {
            let id = String::from_utf8_lossy(&bytes).trim().to_string();
            if id.is_empty() {
                None
            } else {
                Some(id)
            }
        }))
    }

    /// Move the master pointer by compare-and-swap.
    ///
    /// With `expected_prev = Some(id)` the swap succeeds only while the
    /// pointer still names `id`; with `None` only while the pointer is
    /// absent. Returns whether the swap won.
    pub async fn set_master_cas(&self, expected_prev: Option<&str>, new: &str) -> Result<bool> {
        let compare = match expected_prev {
            Some(prev) => KvCompare::ValueEquals(MASTER_KEY.to_string(), prev.as_bytes().to_vec()),
            None => KvCompare::VersionEquals(MASTER_KEY.to_string(), 0),
        };
        let txn = KvTxn::new().when(compare).and_then(KvWrite::Put(
            MASTER_KEY.to_string(),
            new.as_bytes().to_vec(),
        ));
        self.store.txn(txn).await
    }

    /// Delete the master pointer
    pub async fn clear_master(&self) -> Result<()> {
        self.store.delete(MASTER_KEY).await
    }

    /// Read a slave record; missing or malformed returns `None`
    pub async fn get_slave(&self, id: &str) -> Result<Option<SlaveRecord>> {
        match self.store.get(&slave_key(id)).await? {
            Some(bytes) => Ok(decode_record(&bytes)),
            None => Ok(None),
        }
    }

    /// Overwrite a slave record
    pub async fn put_slave(&self, id: &str, record: &SlaveRecord) -> Result<()> {
        self.store.put(&slave_key(id), record.to_bytes()).await
    }

    /// Delete a slave record
    pub async fn delete_slave(&self, id: &str) -> Result<()> {
        self.store.delete(&slave_key(id)).await
    }

    /// Rewrite roles after a promotion: the new master gets
    /// `role=master`, every other listed node `role=slave`.
    ///
    /// Best-effort per key. The master pointer is the authoritative
    /// serialisation point, so a lost update here is repaired by a
    /// later sweep rather than wrapped in one transaction.
    pub async fn set_roles(&self, new_master: &str, others: &[String]) -> Result<()> {
        self.set_role(new_master, NodeRole::Master).await;
        for id in others {
            if id != new_master {
                self.set_role(id, NodeRole::Slave).await;
            }
        }
        Ok(())
    }

    async fn set_role(&self, id: &str, role: NodeRole) {
        match self.get_node(id).await {
            Ok(Some(mut record)) => {
                if record.role != role {
                    record.role = role;
                    if let Err(e) = self.put_node(id, &record).await {
                        warn!(node = id, error = %e, "Failed to update role");
                    }
                }
            }
            Ok(None) => {}
            Err(e) => warn!(node = id, error = %e, "Failed to read record for role update"),
        }
    }
}

fn node_key(id: &str) -> String {
    format!("{}{}", NODES_PREFIX, id)
}

fn slave_key(id: &str) -> String {
    format!("{}{}", SLAVES_PREFIX, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::topology::NodeStatus;
    use std::sync::Arc;

    fn repo() -> TopologyRepository<Arc<MemoryStore>> {
        TopologyRepository::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_node_round_trip() {
        let repo = repo();
        let mut record = NodeRecord::new("10.0.0.1", "3306");
        record.role = NodeRole::Slave;
        record.status = NodeStatus::Online;

        repo.put_node("a", &record).await.unwrap();
        let loaded = repo.get_node("a").await.unwrap().unwrap();
        assert_eq!(loaded.role, NodeRole::Slave);
        assert_eq!(loaded.status, NodeStatus::Online);

        repo.delete_node("a").await.unwrap();
        assert!(repo.get_node("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_nodes_skips_subpaths() {
        let store = Arc::new(MemoryStore::new());
        store.seed("nodes/a", r#"{"host":"h","port":"1"}"#).await;
        store.seed("nodes/b", r#"{"host":"h","port":"1"}"#).await;
        store.seed("nodes/b/meta", "x").await;

        let repo = TopologyRepository::new(store);
        assert_eq!(repo.list_nodes().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_malformed_record_reads_as_absent() {
        let store = Arc::new(MemoryStore::new());
        store.seed("nodes/bad", "{{{").await;

        let repo = TopologyRepository::new(store);
        assert!(repo.get_node("bad").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_master_cas_from_absent() {
        let repo = repo();
        assert!(repo.get_master().await.unwrap().is_none());

        // Only the absent-predicate path may create the pointer
        assert!(repo.set_master_cas(None, "a").await.unwrap());
        assert_eq!(repo.get_master().await.unwrap(), Some("a".to_string()));
        assert!(!repo.set_master_cas(None, "b").await.unwrap());
    }

    #[tokio::test]
    async fn test_master_cas_contention() {
        let repo = repo();
        repo.set_master_cas(None, "a").await.unwrap();

        // First mover wins, the stale precondition loses
        assert!(repo.set_master_cas(Some("a"), "b").await.unwrap());
        assert!(!repo.set_master_cas(Some("a"), "c").await.unwrap());
        assert_eq!(repo.get_master().await.unwrap(), Some("b".to_string()));
    }

    #[tokio::test]
    async fn test_set_roles() {
        let repo = repo();
        for id in ["a", "b", "c"] {
            let mut record = NodeRecord::new("h", "3306");
            record.role = if id == "a" {
                NodeRole::Master
            } else {
                NodeRole::Slave
            };
            repo.put_node(id, &record).await.unwrap();
        }

        repo.set_roles("c", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        assert_eq!(
            repo.get_node("c").await.unwrap().unwrap().role,
            NodeRole::Master
        );
        assert_eq!(
            repo.get_node("a").await.unwrap().unwrap().role,
            NodeRole::Slave
        );
        assert_eq!(
            repo.get_node("b").await.unwrap().unwrap().role,
            NodeRole::Slave
        );
    }
}
