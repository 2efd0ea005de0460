//! Consensus Store Client
//!
//! Typed wrapper over the consensus key-value store. The [`KvStore`]
//! trait exposes atomic get/put/delete and compare-and-swap transaction
//! operations scoped to a namespace; [`EtcdStore`] is the production
//! backend and [`MemoryStore`] a deterministic in-process backend for
//! tests. The client never retries writes itself; retry is the
//! reconciler's decision.

mod etcd;
mod memory;

pub use etcd::EtcdStore;
pub use memory::MemoryStore;

use std::sync::Arc;

use crate::error::Result;

/// Predicate evaluated atomically at the head of a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvCompare {
    /// The key's current value equals the given bytes
    ValueEquals(String, Vec<u8>),
    /// The key's modification count equals `n`; 0 means the key is absent
    VersionEquals(String, i64),
}

/// Write applied by a transaction branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvWrite {
    Put(String, Vec<u8>),
    Delete(String),
}

/// An atomic compare-and-swap transaction: if all predicates hold the
/// success branch runs, otherwise the failure branch.
#[derive(Debug, Clone, Default)]
pub struct KvTxn {
    pub compares: Vec<KvCompare>,
    pub on_success: Vec<KvWrite>,
    pub on_failure: Vec<KvWrite>,
}

impl KvTxn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn when(mut self, compare: KvCompare) -> Self {
        self.compares.push(compare);
        self
    }

    pub fn and_then(mut self, write: KvWrite) -> Self {
        self.on_success.push(write);
        self
    }

    pub fn or_else(mut self, write: KvWrite) -> Self {
        self.on_failure.push(write);
        self
    }
}

/// Typed client for the consensus key-value store.
///
/// All operations are linearizable through the backing store. Keys are
/// plain UTF-8 paths relative to the store's configured namespace.
#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    /// List keys under a prefix, in key order
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Read a single key; `None` when absent
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a single key
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Delete a single key; deleting an absent key is not an error
    async fn delete(&self, key: &str) -> Result<()>;

    /// Execute a compare-and-swap transaction; returns whether the
    /// success branch ran
    async fn txn(&self, txn: KvTxn) -> Result<bool>;
}

#[async_trait::async_trait]
impl<S: KvStore + ?Sized> KvStore for Arc<S> {
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        (**self).list_keys(prefix).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        (**self).put(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key).await
    }

    async fn txn(&self, txn: KvTxn) -> Result<bool> {
        (**self).txn(txn).await
    }
}
