//! Node Probe
//!
//! Opens short-lived SQL connections to database nodes to test
//! reachability and read replication status. Every probe carries a hard
//! deadline; any connection failure, auth failure, or timeout counts as
//! a failed probe rather than an error escaping the tick.

mod gtid;
mod mysql;
mod scripted;

pub use gtid::{compare_gtid, GtidOrder};
pub use mysql::MySqlProbe;
pub use scripted::ScriptedProbe;

use crate::topology::NodeRole;

/// Result of a liveness probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthProbe {
    Online,
    Failed { reason: String },
}

impl HealthProbe {
    pub fn failed(reason: impl Into<String>) -> Self {
        HealthProbe::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, HealthProbe::Online)
    }
}

/// Replication state read from a node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicaStatus {
    /// Whether the node is configured as a replica at all
    pub is_replica: bool,
    /// IO thread running
    pub io_running: bool,
    /// SQL thread running
    pub sql_running: bool,
    /// Seconds behind the source; `None` when the server reports NULL
    pub lag_seconds: Option<u64>,
    /// Executed GTID set
    pub gtid: String,
}

/// Combined observation of a node for one sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Online { gtid: String, lag: Option<u64> },
    Failed { reason: String },
}

impl ProbeOutcome {
    pub fn is_online(&self) -> bool {
        matches!(self, ProbeOutcome::Online { .. })
    }

    pub fn gtid(&self) -> &str {
        match self {
            ProbeOutcome::Online { gtid, .. } => gtid,
            ProbeOutcome::Failed { .. } => "",
        }
    }
}

/// Probe interface for a single database node
#[async_trait::async_trait]
pub trait NodeProbe: Send + Sync {
    /// Test reachability with a trivial query under the probe deadline
    async fn probe_health(&self, host: &str, port: u16) -> HealthProbe;

    /// Read the node's replication status
    async fn probe_replication(&self, host: &str, port: u16) -> crate::Result<ReplicaStatus>;
}

/// Evaluate a node's health for one sweep.
///
/// A replica is unhealthy when replication is not configured, when
/// either thread is stopped, or when lag exceeds the threshold; the
/// connection itself being healthy does not save it. Non-replica roles
/// only need the liveness probe, and the replication read supplies the
/// GTID position.
pub async fn assess<P: NodeProbe + ?Sized>(
    probe: &P,
    host: &str,
    port: u16,
    role: NodeRole,
    lag_threshold_secs: u64,
) -> ProbeOutcome {
    match probe.probe_health(host, port).await {
        HealthProbe::Failed { reason } => return ProbeOutcome::Failed { reason },
        HealthProbe::Online => {}
    }

    let status = match probe.probe_replication(host, port).await {
        Ok(status) => status,
        Err(e) => {
            return ProbeOutcome::Failed {
                reason: format!("replication status unreadable: {}", e),
            }
        }
    };

    if role == NodeRole::Slave {
        if !status.is_replica {
            return ProbeOutcome::Failed {
                reason: "replication not configured".to_string(),
            };
        }
        if !status.io_running || !status.sql_running {
            return ProbeOutcome::Failed {
                reason: format!(
                    "replica threads stopped (io={}, sql={})",
                    status.io_running, status.sql_running
                ),
            };
        }
        match status.lag_seconds {
            Some(lag) if lag <= lag_threshold_secs => {}
            Some(lag) => {
                return ProbeOutcome::Failed {
                    reason: format!("replication lag {}s over threshold", lag),
                }
            }
            None => {
                return ProbeOutcome::Failed {
                    reason: "replication lag unknown".to_string(),
                }
            }
        }
    }

    ProbeOutcome::Online {
        gtid: status.gtid,
        lag: status.lag_seconds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_assess_failed_health_short_circuits() {
        let probe = ScriptedProbe::new();
        probe.set_failed("db", 3306, "connection refused");

        let outcome = assess(&probe, "db", 3306, NodeRole::Slave, 300).await;
        assert_eq!(
            outcome,
            ProbeOutcome::Failed {
                reason: "connection refused".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_assess_healthy_replica() {
        let probe = ScriptedProbe::new();
        probe.set_replica("db", 3306, "x:1-100", 12);

        let outcome = assess(&probe, "db", 3306, NodeRole::Slave, 300).await;
        assert_eq!(
            outcome,
            ProbeOutcome::Online {
                gtid: "x:1-100".to_string(),
                lag: Some(12),
            }
        );
    }

    #[tokio::test]
    async fn test_assess_replica_with_stopped_threads() {
        let probe = ScriptedProbe::new();
        probe.set_status(
            "db",
            3306,
            HealthProbe::Online,
            ReplicaStatus {
                is_replica: true,
                io_running: false,
                sql_running: true,
                lag_seconds: Some(0),
                gtid: "x:1-100".to_string(),
            },
        );

        let outcome = assess(&probe, "db", 3306, NodeRole::Slave, 300).await;
        assert!(!outcome.is_online());
    }

    #[tokio::test]
    async fn test_assess_replica_over_lag_threshold() {
        let probe = ScriptedProbe::new();
        probe.set_replica("db", 3306, "x:1-100", 900);

        let outcome = assess(&probe, "db", 3306, NodeRole::Slave, 300).await;
        assert!(!outcome.is_online());

        // The same lag is fine for a master-role node
        let outcome = assess(&probe, "db", 3306, NodeRole::Master, 300).await;
        assert!(outcome.is_online());
    }

    #[tokio::test]
    async fn test_assess_master_without_replica_config() {
        let probe = ScriptedProbe::new();
        probe.set_master("db", 3306, "x:1-500");

        let outcome = assess(&probe, "db", 3306, NodeRole::Master, 300).await;
        assert_eq!(outcome.gtid(), "x:1-500");

        // A slave-role node without replication configured is unhealthy
        let outcome = assess(&probe, "db", 3306, NodeRole::Slave, 300).await;
        assert!(!outcome.is_online());
    }
}
