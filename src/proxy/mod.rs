//! ProxySQL Admin
//!
//! Typed wrapper over ProxySQL's administrative SQL surface. Replaces
//! the contents of the writer and reader hostgroups, then commits to
//! runtime and persists to disk. The admin connection is reopened per
//! publish; no long-lived shared handle exists.

mod admin;
mod mock;

pub use admin::ProxySqlAdmin;
pub use mock::{MockProxyAdmin, PublishedRouting};

/// A backend server as published to a hostgroup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    pub host: String,
    pub port: u16,
}

impl Backend {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Administrative interface to the SQL proxy
#[async_trait::async_trait]
pub trait ProxyAdmin: Send + Sync {
    /// One-time startup programming: monitoring credentials, probe
    /// intervals, connection cap, and the SELECT routing rules
    async fn initialize(&self) -> crate::Result<()>;

    /// Replace both hostgroups: exactly one writer, one row per reader
    async fn publish_routing(&self, master: &Backend, readers: &[Backend]) -> crate::Result<()>;

    /// Clear both hostgroups; used while the cluster has no master
    async fn publish_empty(&self) -> crate::Result<()>;
}

#[async_trait::async_trait]
impl<A: ProxyAdmin + ?Sized> ProxyAdmin for std::sync::Arc<A> {
    async fn initialize(&self) -> crate::Result<()> {
        (**self).initialize().await
    }

    async fn publish_routing(&self, master: &Backend, readers: &[Backend]) -> crate::Result<()> {
        (**self).publish_routing(master, readers).await
    }

    async fn publish_empty(&self) -> crate::Result<()> {
        (**self).publish_empty().await
    }
}
