//! In-Memory Store Backend
//!
//! Deterministic [`KvStore`] implementation backed by a BTreeMap, with
//! etcd-compatible version semantics (absent = version 0, each put
//! bumps the count, delete resets it). The test suite drives the
//! reconciler against this backend; the write counter lets tests assert
//! idempotence across ticks.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;

use crate::error::Result;

use super::{KvCompare, KvStore, KvTxn, KvWrite};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    version: i64,
}

/// In-process store with etcd-like transaction semantics
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Entry>>,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mutating operations (puts and deletes) applied so far
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Seed a key without counting it as a coordinator write
    pub async fn seed(&self, key: &str, value: impl Into<Vec<u8>>) {
        let mut entries = self.entries.lock().await;
        let version = entries.get(key).map(|e| e.version).unwrap_or(0) + 1;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.into(),
                version,
            },
        );
    }

    /// Read a key as a UTF-8 string, for test assertions
    pub async fn get_str(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .map(|e| String::from_utf8_lossy(&e.value).into_owned())
    }

    fn check(entries: &BTreeMap<String, Entry>, compare: &KvCompare) -> bool {
        match compare {
            KvCompare::ValueEquals(key, value) => entries
                .get(key)
                .map(|e| e.value == *value)
                .unwrap_or(false),
            KvCompare::VersionEquals(key, version) => {
                let current = entries.get(key).map(|e| e.version).unwrap_or(0);
                current == *version
            }
        }
    }

    fn apply(entries: &mut BTreeMap<String, Entry>, write: KvWrite) {
        match write {
            KvWrite::Put(key, value) => {
                let version = entries.get(&key).map(|e| e.version).unwrap_or(0) + 1;
                entries.insert(key, Entry { value, version });
            }
            KvWrite::Delete(key) => {
                entries.remove(&key);
            }
        }
    }
}

#[async_trait::async_trait]
impl KvStore for MemoryStore {
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.lock().await;
        Ok(entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.lock().await;
        Ok(entries.get(key).map(|e| e.value.clone()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut entries = self.entries.lock().await;
        Self::apply(&mut entries, KvWrite::Put(key.to_string(), value));
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(key) {
            Self::apply(&mut entries, KvWrite::Delete(key.to_string()));
            self.writes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn txn(&self, txn: KvTxn) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let succeeded = txn.compares.iter().all(|c| Self::check(&entries, c));
        let branch = if succeeded {
            txn.on_success
        } else {
            txn.on_failure
        };
        let mutated = !branch.is_empty();
        for write in branch {
            Self::apply(&mut entries, write);
        }
        if mutated {
            self.writes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(succeeded)
    }
}
