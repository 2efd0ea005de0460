//! Scripted Probe
//!
//! Probe fake for the test suite: each endpoint's health and
//! replication status is scripted ahead of a tick and can be reassigned
//! between ticks to simulate flapping nodes.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::Result;

use super::{HealthProbe, NodeProbe, ReplicaStatus};

#[derive(Clone)]
struct Script {
    health: HealthProbe,
    replica: ReplicaStatus,
}

/// Probe with predetermined answers per endpoint
#[derive(Default)]
pub struct ScriptedProbe {
    scripts: Mutex<HashMap<(String, u16), Script>>,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script an arbitrary health/replication pair for an endpoint
    pub fn set_status(&self, host: &str, port: u16, health: HealthProbe, replica: ReplicaStatus) {
        self.scripts
            .lock()
            .unwrap()
            .insert((host.to_string(), port), Script { health, replica });
    }

    /// Script a healthy replica with the given position and lag
    pub fn set_replica(&self, host: &str, port: u16, gtid: &str, lag: u64) {
        self.set_status(
            host,
            port,
            HealthProbe::Online,
            ReplicaStatus {
                is_replica: true,
                io_running: true,
                sql_running: true,
                lag_seconds: Some(lag),
                gtid: gtid.to_string(),
            },
        );
    }

    /// Script a healthy non-replica (master-style) node
    pub fn set_master(&self, host: &str, port: u16, gtid: &str) {
        self.set_status(
            host,
            port,
            HealthProbe::Online,
            ReplicaStatus {
                is_replica: false,
                io_running: false,
                sql_running: false,
                lag_seconds: None,
                gtid: gtid.to_string(),
            },
        );
    }

    /// Script a dead endpoint
    pub fn set_failed(&self, host: &str, port: u16, reason: &str) {
        self.set_status(
            host,
            port,
            HealthProbe::failed(reason),
            ReplicaStatus::default(),
        );
    }

    fn script_for(&self, host: &str, port: u16) -> Script {
        self.scripts
            .lock()
            .unwrap()
            .get(&(host.to_string(), port))
            .cloned()
            .unwrap_or(Script {
                health: HealthProbe::failed("unscripted endpoint"),
                replica: ReplicaStatus::default(),
            })
    }
}

#[async_trait::async_trait]
impl NodeProbe for ScriptedProbe {
    async fn probe_health(&self, host: &str, port: u16) -> HealthProbe {
        self.script_for(host, port).health
    }

    async fn probe_replication(&self, host: &str, port: u16) -> Result<ReplicaStatus> {
        Ok(self.script_for(host, port).replica)
    }
}
