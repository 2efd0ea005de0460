//! Mastiff - MySQL Topology Coordinator
//!
//! A control-plane coordinator that maintains a single-master MySQL
//! replication topology behind ProxySQL, using etcd as the source of
//! truth. Database nodes register themselves in the store; mastiff
//! continuously observes node liveness, validates and repairs the
//! recorded topology, promotes a replacement when the master fails, and
//! reprograms ProxySQL's hostgroups so that writes flow to exactly one
//! server and reads fan out to healthy replicas.
//!
//! # Architecture
//!
//! Mastiff runs a single sequential reconciliation loop. Each tick reads
//! the declared topology from etcd, probes every registered node over
//! short-lived SQL connections, prunes stale records, validates the
//! master pointer, elects a replacement by GTID position when the master
//! has failed, and publishes the resulting routing tables to ProxySQL.
//! All mutable state relevant to correctness lives in etcd; the master
//! pointer only moves by compare-and-swap.
//!
//! # Features
//!
//! - Self-registering node records with tolerant schema parsing
//! - Stale-record pruning with a configurable age threshold
//! - GTID-ranked failover with deterministic tie-breaking
//! - Promotion grace period to suppress re-election churn
//! - Idempotent ProxySQL hostgroup reconciliation
//! - Bounded concurrent health probing with hard deadlines

pub mod config;
pub mod error;
pub mod store;
pub mod topology;
pub mod probe;
pub mod proxy;
pub mod reconciler;

pub use config::MastiffConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::MastiffConfig;
    pub use crate::error::{Error, Result};
    pub use crate::store::{KvStore, KvTxn};
    pub use crate::topology::{NodeRecord, NodeRole, NodeStatus, TopologyRepository};
    pub use crate::probe::{NodeProbe, ProbeOutcome};
    pub use crate::proxy::{Backend, ProxyAdmin};
    pub use crate::reconciler::Reconciler;
}
