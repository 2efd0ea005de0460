//! etcd Store Backend
//!
//! Implements [`KvStore`] over the etcd v3 gRPC API. Every key is
//! prefixed with the configured namespace before it reaches the wire,
//! and stripped again on the way out.

use etcd_client::{
    Client, Compare, CompareOp, ConnectOptions, GetOptions, Txn, TxnOp,
};

use crate::config::StoreConfig;
use crate::error::Result;

use super::{KvCompare, KvStore, KvTxn, KvWrite};

/// etcd-backed store client
pub struct EtcdStore {
    client: Client,
    namespace: String,
}

impl EtcdStore {
    /// Connect to the configured etcd endpoints
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let mut options = ConnectOptions::new();
        if !config.user.is_empty() {
            options = options.with_user(config.user.clone(), config.password.clone());
        }

        let client = Client::connect(config.endpoints.clone(), Some(options)).await?;

        Ok(Self {
            client,
            namespace: config.namespace.clone(),
        })
    }

    fn scoped(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }

    fn unscoped<'a>(&self, key: &'a str) -> &'a str {
        key.strip_prefix(self.namespace.as_str()).unwrap_or(key)
    }

    fn map_compare(&self, compare: KvCompare) -> Compare {
        match compare {
            KvCompare::ValueEquals(key, value) => {
                Compare::value(self.scoped(&key), CompareOp::Equal, value)
            }
            KvCompare::VersionEquals(key, version) => {
                Compare::version(self.scoped(&key), CompareOp::Equal, version)
            }
        }
    }

    fn map_write(&self, write: KvWrite) -> TxnOp {
        match write {
            KvWrite::Put(key, value) => TxnOp::put(self.scoped(&key), value, None),
            KvWrite::Delete(key) => TxnOp::delete(self.scoped(&key), None),
        }
    }
}

#[async_trait::async_trait]
impl KvStore for EtcdStore {
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut kv = self.client.kv_client();
        let options = GetOptions::new().with_prefix().with_keys_only();
        let resp = kv.get(self.scoped(prefix), Some(options)).await?;

        let mut keys = Vec::with_capacity(resp.kvs().len());
        for entry in resp.kvs() {
            match entry.key_str() {
                Ok(key) => keys.push(self.unscoped(key).to_string()),
                Err(e) => tracing::warn!(error = %e, "Skipping non-UTF-8 store key"),
            }
        }
        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut kv = self.client.kv_client();
        let resp = kv.get(self.scoped(key), None).await?;
        Ok(resp.kvs().first().map(|entry| entry.value().to_vec()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut kv = self.client.kv_client();
        kv.put(self.scoped(key), value, None).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut kv = self.client.kv_client();
        kv.delete(self.scoped(key), None).await?;
        Ok(())
    }

    async fn txn(&self, txn: KvTxn) -> Result<bool> {
        let compares: Vec<Compare> = txn
            .compares
            .into_iter()
            .map(|c| self.map_compare(c))
            .collect();
        let on_success: Vec<TxnOp> = txn
            .on_success
            .into_iter()
            .map(|w| self.map_write(w))
            .collect();
        let on_failure: Vec<TxnOp> = txn
            .on_failure
            .into_iter()
            .map(|w| self.map_write(w))
            .collect();

        let wire_txn = Txn::new()
            .when(compares)
            .and_then(on_success)
            .or_else(on_failure);

        let mut kv = self.client.kv_client();
        let resp = kv.txn(wire_txn).await?;
        Ok(resp.succeeded())
    }
}
