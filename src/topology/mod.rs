//! Topology Model
//!
//! Domain layer over the consensus store: the node and slave record
//! schema, the master pointer, and the repository that reads and writes
//! them.

mod record;
mod repository;

pub use record::{decode_record, NodeRecord, NodeRole, NodeStatus, SlaveRecord};
pub use repository::{TopologyRepository, MASTER_KEY, NODES_PREFIX, SLAVES_PREFIX};
