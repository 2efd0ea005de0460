//! Mock Proxy Admin
//!
//! Records every publish instead of talking to a proxy, so tests can
//! assert routing faithfulness and idempotence tick by tick.

use std::sync::Mutex;

use crate::error::Result;

use super::{Backend, ProxyAdmin};

/// One published routing state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishedRouting {
    Empty,
    Routing {
        writer: Backend,
        readers: Vec<Backend>,
    },
}

/// Proxy admin that records publishes in memory
#[derive(Default)]
pub struct MockProxyAdmin {
    published: Mutex<Vec<PublishedRouting>>,
    initialized: Mutex<bool>,
}

impl MockProxyAdmin {
    pub fn new() -> Self {
        Self::default()
    }

    /// All publishes in order
    pub fn published(&self) -> Vec<PublishedRouting> {
        self.published.lock().unwrap().clone()
    }

    /// The most recent publish, if any
    pub fn last_published(&self) -> Option<PublishedRouting> {
        self.published.lock().unwrap().last().cloned()
    }

    pub fn publish_count(&self) -> usize {
        self.published.lock().unwrap().len()
    }

    pub fn was_initialized(&self) -> bool {
        *self.initialized.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl ProxyAdmin for MockProxyAdmin {
    async fn initialize(&self) -> Result<()> {
        *self.initialized.lock().unwrap() = true;
        Ok(())
    }

    async fn publish_routing(&self, master: &Backend, readers: &[Backend]) -> Result<()> {
        let mut readers = readers.to_vec();
        readers.sort_by(|a, b| a.host.cmp(&b.host).then(a.port.cmp(&b.port)));
        self.published
            .lock()
            .unwrap()
            .push(PublishedRouting::Routing {
                writer: master.clone(),
                readers,
            });
        Ok(())
    }

    async fn publish_empty(&self) -> Result<()> {
        self.published
            .lock()
            .unwrap()
            .push(PublishedRouting::Empty);
        Ok(())
    }
}
