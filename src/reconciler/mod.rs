//! Reconciliation Loop
//!
//! The control loop at the heart of mastiff. Each tick snapshots the
//! registered nodes, prunes stale records, validates the master
//! pointer, sweeps node health with bounded concurrent probes, elects a
//! replacement master when the current one has failed, and publishes
//! the resulting routing to the proxy. Stages run strictly in that
//! order: pruning must precede master validation, validation must
//! precede election, election must precede publishing.
//!
//! Every recoverable error abandons the tick; the next tick starts
//! fresh after the sleep. The only state carried across ticks is the
//! timestamp of the last successful promotion, which drives the grace
//! period and is safe to lose on restart.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::MastiffConfig;
use crate::error::{Error, Result};
use crate::probe::{self, compare_gtid, GtidOrder, NodeProbe, ProbeOutcome};
use crate::proxy::{Backend, ProxyAdmin};
use crate::store::KvStore;
use crate::topology::{
    NodeRecord, NodeRole, NodeStatus, SlaveRecord, TopologyRepository, MASTER_KEY,
};

/// One node as seen by the current tick: its record after any sweep
/// updates, and its probe outcome (`None` when the probe was cancelled
/// by the tick deadline).
struct Observation {
    id: String,
    record: NodeRecord,
    outcome: Option<ProbeOutcome>,
}

/// The control loop coordinator
pub struct Reconciler<S, P, A> {
    repo: TopologyRepository<S>,
    probe: Arc<P>,
    proxy: A,
    check_interval: Duration,
    promotion_grace: Duration,
    max_age: chrono::Duration,
    lag_threshold_secs: u64,
    probe_concurrency: usize,
    /// Set by the last successful promotion; `None` means no recent
    /// promotion, which is the safe state after a restart
    last_promotion: Option<Instant>,
}

impl<S, P, A> Reconciler<S, P, A>
where
    S: KvStore,
    P: NodeProbe + 'static,
    A: ProxyAdmin,
{
    pub fn new(store: S, probe: Arc<P>, proxy: A, config: &MastiffConfig) -> Self {
        Self {
            repo: TopologyRepository::new(store),
            probe,
            proxy,
            check_interval: config.check_interval(),
            promotion_grace: config.promotion_grace(),
            max_age: chrono::Duration::seconds(config.reconciler.max_age_secs as i64),
            lag_threshold_secs: config.probe.lag_threshold_secs,
            probe_concurrency: config.probe.concurrency,
            last_promotion: None,
        }
    }

    /// Run ticks until the shutdown signal fires. An in-flight tick is
    /// drained before returning.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut ticker = tokio::time::interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval = ?self.check_interval,
            grace = ?self.promotion_grace,
            "Reconciler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let started = Instant::now();
                    match self.tick().await {
                        Ok(()) => debug!(elapsed = ?started.elapsed(), "Tick complete"),
                        Err(e) => warn!(error = %e, "Tick abandoned"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("Shutdown signal received, draining");
                    break;
                }
            }
        }

        Ok(())
    }

    /// One reconciliation pass over the declared topology
    pub async fn tick(&mut self) -> Result<()> {
        let tick_deadline = tokio::time::Instant::now() + self.check_interval;

        // S1: snapshot
        let node_ids = self.repo.list_nodes().await?;
        if node_ids.is_empty() {
            debug!("No nodes registered");
            return Ok(());
        }

        // S2: prune stale records
        let survivors = self.prune_stale(&node_ids).await?;

        // S3: validate the master pointer
        self.validate_master().await?;

        // S4: health sweep
        let mut observations = self.health_sweep(survivors, tick_deadline).await?;

        // S5: failover decision
        self.decide_failover(&mut observations).await?;

        // S6: publish routing
        self.publish(&observations).await?;

        Ok(())
    }

    /// Delete records that are unparseable or older than the stale-age
    /// threshold, along with their slave records and, when the deleted
    /// node is the recorded master, the master pointer itself.
    async fn prune_stale(&self, node_ids: &[String]) -> Result<Vec<(String, NodeRecord)>> {
        let master = self.repo.get_master().await?;
        let now = Utc::now();
        let mut survivors = Vec::with_capacity(node_ids.len());

        for id in node_ids {
            match self.repo.get_node(id).await? {
                Some(record) if !record.is_stale(now, self.max_age) => {
                    survivors.push((id.clone(), record));
                }
                record => {
                    let reason = if record.is_some() { "stale" } else { "malformed" };
                    warn!(node = %id, stage = "prune", reason, "Pruning node record");
                    self.repo.delete_node(id).await?;
                    self.repo.delete_slave(id).await?;
                    if master.as_deref() == Some(id.as_str()) {
                        warn!(node = %id, stage = "prune", "Pruned node was master, clearing pointer");
                        self.repo.clear_master().await?;
                    }
                }
            }
        }

        Ok(survivors)
    }

    /// Check that the master pointer still names an online master.
    ///
    /// A missing record or a role mismatch clears the pointer
    /// unconditionally. A status mismatch clears only outside the
    /// promotion grace period, so a just-promoted master is not demoted
    /// while external agents are still catching up.
    async fn validate_master(&self) -> Result<()> {
        let Some(master_id) = self.repo.get_master().await? else {
            return Ok(());
        };

        match self.repo.get_node(&master_id).await? {
            None => {
                warn!(node = %master_id, stage = "validate", "Master record missing, clearing pointer");
                self.repo.clear_master().await?;
            }
            Some(record) => {
                if record.role != NodeRole::Master {
                    warn!(
                        node = %master_id,
                        stage = "validate",
                        role = %record.role,
                        "Master pointer names a non-master record, clearing pointer"
                    );
                    self.repo.clear_master().await?;
                } else if record.status != NodeStatus::Online {
                    if self.within_grace() {
                        debug!(node = %master_id, stage = "validate", "Master not online, within grace");
                    } else {
                        warn!(
                            node = %master_id,
                            stage = "validate",
                            status = %record.status,
                            "Master not online, clearing pointer"
                        );
                        self.repo.clear_master().await?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Probe every surviving node concurrently, bounded by the worker
    /// cap and the tick deadline, and write back status changes.
    async fn health_sweep(
        &self,
        survivors: Vec<(String, NodeRecord)>,
        tick_deadline: tokio::time::Instant,
    ) -> Result<Vec<Observation>> {
        let current_master = self.repo.get_master().await?.unwrap_or_default();
        let semaphore = Arc::new(Semaphore::new(self.probe_concurrency));
        let mut join: JoinSet<(String, ProbeOutcome)> = JoinSet::new();
        let mut entries = Vec::with_capacity(survivors.len());

        for (id, record) in survivors {
            let Some((host, port)) = record.endpoint() else {
                warn!(
                    node = %id,
                    host = %record.host,
                    stage = "sweep",
                    "Deleting record with malformed endpoint"
                );
                self.repo.delete_node(&id).await?;
                self.repo.delete_slave(&id).await?;
                if current_master == id {
                    warn!(node = %id, stage = "sweep", "Deleted node was master, clearing pointer");
                    self.repo.clear_master().await?;
                }
                continue;
            };

            let host = host.to_string();
            let role = record.role;
            let lag_threshold = self.lag_threshold_secs;
            let probe = Arc::clone(&self.probe);
            let permit_source = Arc::clone(&semaphore);
            let task_id = id.clone();
            join.spawn(async move {
                let _permit = permit_source.acquire_owned().await;
                let outcome = probe::assess(probe.as_ref(), &host, port, role, lag_threshold).await;
                (task_id, outcome)
            });
            entries.push((id, record));
        }

        let mut outcomes: HashMap<String, ProbeOutcome> = HashMap::new();
        loop {
            match tokio::time::timeout_at(tick_deadline, join.join_next()).await {
                Ok(Some(Ok((id, outcome)))) => {
                    outcomes.insert(id, outcome);
                }
                Ok(Some(Err(e))) => warn!(stage = "sweep", error = %e, "Probe task failed"),
                Ok(None) => break,
                Err(_) => {
                    warn!(stage = "sweep", "Tick deadline reached, cancelling outstanding probes");
                    join.abort_all();
                    break;
                }
            }
        }

        let now = Utc::now();
        let mut observations = Vec::with_capacity(entries.len());
        for (id, mut record) in entries {
            let outcome = outcomes.remove(&id);
            match &outcome {
                Some(outcome) => {
                    let new_status = if outcome.is_online() {
                        NodeStatus::Online
                    } else {
                        NodeStatus::Failed
                    };
                    if let ProbeOutcome::Failed { reason } = outcome {
                        warn!(
                            node = %id,
                            host = %record.host,
                            stage = "sweep",
                            error = %reason,
                            "Probe failed"
                        );
                    }

                    // Record writes carry fresh observations only:
                    // last_seen and gtid_position come from this probe,
                    // never from the previous record.
                    if record.status != new_status {
                        record.status = new_status;
                        record.last_seen = Some(now);
                        record.gtid_position = outcome.gtid().to_string();
                        self.repo.put_node(&id, &record).await?;
                    }

                    if let ProbeOutcome::Online { lag, .. } = outcome {
                        if record.role == NodeRole::Slave {
                            self.refresh_slave_record(&id, &current_master, lag.unwrap_or(0))
                                .await?;
                        }
                    }
                }
                None => {
                    debug!(node = %id, stage = "sweep", "Probe did not complete this tick");
                }
            }
            observations.push(Observation {
                id,
                record,
                outcome,
            });
        }

        Ok(observations)
    }

    /// Mirror observed replication state into the informational slave
    /// record, preserving foreign fields and skipping no-op writes.
    async fn refresh_slave_record(&self, id: &str, master: &str, lag: u64) -> Result<()> {
        let mut slave = self
            .repo
            .get_slave(id)
            .await?
            .unwrap_or_else(|| SlaveRecord::new("", 0));
        if slave.master_node_id != master || slave.replication_lag != lag {
            slave.master_node_id = master.to_string();
            slave.replication_lag = lag;
            self.repo.put_slave(id, &slave).await?;
        }
        Ok(())
    }

    /// Promote a replacement when the recorded master is gone or failed.
    ///
    /// The pointer moves by compare-and-swap against the value read at
    /// the start of this stage; losing the swap means another
    /// coordinator moved it first and this tick is abandoned.
    async fn decide_failover(&mut self, observations: &mut [Observation]) -> Result<()> {
        let master = self.repo.get_master().await?;

        if let Some(master_id) = &master {
            let outcome = observations
                .iter()
                .find(|o| &o.id == master_id)
                .and_then(|o| o.outcome.as_ref());
            match outcome {
                Some(ProbeOutcome::Online { .. }) => return Ok(()),
                None => {
                    warn!(node = %master_id, stage = "failover", "Master unobserved this tick, deferring");
                    return Ok(());
                }
                Some(ProbeOutcome::Failed { .. }) => {
                    if self.within_grace() {
                        debug!(node = %master_id, stage = "failover", "Master failed within grace, deferring");
                        return Ok(());
                    }
                }
            }
        }

        let Some(candidate) = elect(observations) else {
            info!(stage = "failover", "No promotable candidate, retrying next tick");
            return Ok(());
        };

        let won = self
            .repo
            .set_master_cas(master.as_deref(), &candidate)
            .await?;
        if !won {
            return Err(Error::StoreConflict {
                key: MASTER_KEY.to_string(),
            });
        }
        self.last_promotion = Some(Instant::now());
        info!(
            node = %candidate,
            previous = master.as_deref().unwrap_or("<none>"),
            stage = "failover",
            "Promoted new master"
        );

        // Role rewrites are best-effort; a later tick reconciles any
        // divergence against the pointer.
        let others: Vec<String> = observations
            .iter()
            .filter(|o| o.id != candidate)
            .map(|o| o.id.clone())
            .collect();
        self.repo.set_roles(&candidate, &others).await?;

        for obs in observations.iter_mut() {
            obs.record.role = if obs.id == candidate {
                NodeRole::Master
            } else {
                NodeRole::Slave
            };
        }

        Ok(())
    }

    /// Publish the writer and reader hostgroups from the tick's view
    async fn publish(&self, observations: &[Observation]) -> Result<()> {
        let Some(master_id) = self.repo.get_master().await? else {
            return self.proxy.publish_empty().await;
        };

        let Some(master_obs) = observations.iter().find(|o| o.id == master_id) else {
            warn!(node = %master_id, stage = "publish", "Master not in snapshot, publishing empty");
            return self.proxy.publish_empty().await;
        };
        let Some((host, port)) = master_obs.record.endpoint() else {
            warn!(node = %master_id, stage = "publish", "Master endpoint malformed, publishing empty");
            return self.proxy.publish_empty().await;
        };
        let writer = Backend::new(host, port);

        let readers: Vec<Backend> = observations
            .iter()
            .filter(|o| {
                o.id != master_id
                    && o.record.role == NodeRole::Slave
                    && o.outcome.as_ref().map(|p| p.is_online()).unwrap_or(false)
            })
            .filter_map(|o| {
                o.record
                    .endpoint()
                    .map(|(host, port)| Backend::new(host, port))
            })
            .collect();

        self.proxy.publish_routing(&writer, &readers).await
    }

    fn within_grace(&self) -> bool {
        match self.last_promotion {
            Some(at) => at.elapsed() <= self.promotion_grace,
            None => false,
        }
    }
}

/// Pick the promotion candidate: online slaves ranked by GTID position,
/// ties broken by lexicographic node id for determinism.
fn elect(observations: &[Observation]) -> Option<String> {
    let mut best: Option<(&str, &str)> = None;

    for obs in observations {
        if obs.record.role != NodeRole::Slave {
            continue;
        }
        let Some(ProbeOutcome::Online { gtid, .. }) = &obs.outcome else {
            continue;
        };

        let entry = (obs.id.as_str(), gtid.as_str());
        match best {
            None => best = Some(entry),
            Some((best_id, best_gtid)) => match compare_gtid(entry.1, best_gtid) {
                GtidOrder::Ahead => best = Some(entry),
                GtidOrder::Equal if entry.0 < best_id => best = Some(entry),
                _ => {}
            },
        }
    }

    best.map(|(id, _)| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{MockProxyAdmin, PublishedRouting};
    use crate::probe::ScriptedProbe;
    use crate::store::MemoryStore;

    struct Harness {
        store: Arc<MemoryStore>,
        probe: Arc<ScriptedProbe>,
        proxy: Arc<MockProxyAdmin>,
        reconciler: Reconciler<Arc<MemoryStore>, ScriptedProbe, Arc<MockProxyAdmin>>,
    }

    fn harness() -> Harness {
        let mut config = MastiffConfig::default();
        config.store.endpoints = vec!["http://etcd:2379".to_string()];
        let store = Arc::new(MemoryStore::new());
        let probe = Arc::new(ScriptedProbe::new());
        let proxy = Arc::new(MockProxyAdmin::new());
        let reconciler = Reconciler::new(
            Arc::clone(&store),
            Arc::clone(&probe),
            Arc::clone(&proxy),
            &config,
        );
        Harness {
            store,
            probe,
            proxy,
            reconciler,
        }
    }

    async fn seed_node(
        h: &Harness,
        id: &str,
        host: &str,
        role: NodeRole,
        status: NodeStatus,
        gtid: &str,
    ) {
        let mut record = NodeRecord::new(host, "3306");
        record.role = role;
        record.status = status;
        record.gtid_position = gtid.to_string();
        h.store
            .seed(&format!("nodes/{}", id), record.to_bytes())
            .await;
    }

    async fn node(h: &Harness, id: &str) -> Option<NodeRecord> {
        let raw = h.store.get_str(&format!("nodes/{}", id)).await?;
        serde_json::from_str(&raw).ok()
    }

    async fn master_pointer(h: &Harness) -> Option<String> {
        h.store.get_str(MASTER_KEY).await
    }

    fn backend(host: &str) -> Backend {
        Backend::new(host, 3306)
    }

    #[tokio::test]
    async fn test_fresh_store_does_nothing() {
        let mut h = harness();

        h.reconciler.tick().await.unwrap();

        assert_eq!(h.store.write_count(), 0);
        assert_eq!(h.proxy.publish_count(), 0);
    }

    #[tokio::test]
    async fn test_register_one_node() {
        let mut h = harness();
        seed_node(&h, "a", "10.0.0.1", NodeRole::Unset, NodeStatus::Unknown, "").await;
        h.probe.set_master("10.0.0.1", 3306, "x:1-10");

        h.reconciler.tick().await.unwrap();

        // Status flips online, but with no slave candidates there is no
        // election and the writer group stays empty
        assert_eq!(node(&h, "a").await.unwrap().status, NodeStatus::Online);
        assert!(master_pointer(&h).await.is_none());
        assert_eq!(h.proxy.last_published(), Some(PublishedRouting::Empty));

        // A slave registers and an operator declares a the master
        seed_node(&h, "b", "10.0.0.2", NodeRole::Slave, NodeStatus::Unknown, "").await;
        h.probe.set_replica("10.0.0.2", 3306, "x:1-10", 0);
        let mut a = node(&h, "a").await.unwrap();
        a.role = NodeRole::Master;
        h.store.seed("nodes/a", a.to_bytes()).await;
        h.store.seed(MASTER_KEY, "a").await;

        h.reconciler.tick().await.unwrap();

        assert_eq!(
            h.proxy.last_published(),
            Some(PublishedRouting::Routing {
                writer: backend("10.0.0.1"),
                readers: vec![backend("10.0.0.2")],
            })
        );
    }

    #[tokio::test]
    async fn test_failover_elects_most_advanced_replica() {
        let mut h = harness();
        seed_node(&h, "a", "10.0.0.1", NodeRole::Master, NodeStatus::Online, "x:1-130").await;
        seed_node(&h, "b", "10.0.0.2", NodeRole::Slave, NodeStatus::Online, "x:1-100").await;
        seed_node(&h, "c", "10.0.0.3", NodeRole::Slave, NodeStatus::Online, "x:1-120").await;
        h.store.seed(MASTER_KEY, "a").await;

        h.probe.set_failed("10.0.0.1", 3306, "connection refused");
        h.probe.set_replica("10.0.0.2", 3306, "x:1-100", 1);
        h.probe.set_replica("10.0.0.3", 3306, "x:1-120", 1);

        h.reconciler.tick().await.unwrap();

        // c wins on GTID position
        assert_eq!(master_pointer(&h).await, Some("c".to_string()));
        assert_eq!(node(&h, "c").await.unwrap().role, NodeRole::Master);
        assert_eq!(node(&h, "a").await.unwrap().role, NodeRole::Slave);
        assert_eq!(node(&h, "a").await.unwrap().status, NodeStatus::Failed);
        assert_eq!(node(&h, "b").await.unwrap().role, NodeRole::Slave);

        // a is still failed, so only b reads
        assert_eq!(
            h.proxy.last_published(),
            Some(PublishedRouting::Routing {
                writer: backend("10.0.0.3"),
                readers: vec![backend("10.0.0.2")],
            })
        );
    }

    #[tokio::test]
    async fn test_gtid_tie_breaks_on_node_id() {
        let mut h = harness();
        seed_node(&h, "d", "10.0.0.4", NodeRole::Slave, NodeStatus::Online, "x:1-50").await;
        seed_node(&h, "b", "10.0.0.2", NodeRole::Slave, NodeStatus::Online, "x:1-50").await;
        h.probe.set_replica("10.0.0.4", 3306, "x:1-50", 0);
        h.probe.set_replica("10.0.0.2", 3306, "x:1-50", 0);

        h.reconciler.tick().await.unwrap();

        assert_eq!(master_pointer(&h).await, Some("b".to_string()));
    }

    #[tokio::test]
    async fn test_grace_period_suppresses_demotion_and_reelection() {
        let mut h = harness();
        seed_node(&h, "a", "10.0.0.1", NodeRole::Master, NodeStatus::Online, "x:1-90").await;
        seed_node(&h, "b", "10.0.0.2", NodeRole::Slave, NodeStatus::Online, "x:1-80").await;
        seed_node(&h, "c", "10.0.0.3", NodeRole::Slave, NodeStatus::Online, "x:1-90").await;
        h.store.seed(MASTER_KEY, "a").await;

        h.probe.set_failed("10.0.0.1", 3306, "gone");
        h.probe.set_replica("10.0.0.2", 3306, "x:1-80", 0);
        h.probe.set_replica("10.0.0.3", 3306, "x:1-90", 0);

        // First tick promotes c and opens the grace window
        h.reconciler.tick().await.unwrap();
        assert_eq!(master_pointer(&h).await, Some("c".to_string()));

        // The fresh master flaps once; within grace nothing moves
        h.probe.set_failed("10.0.0.3", 3306, "transient");
        h.reconciler.tick().await.unwrap();
        assert_eq!(master_pointer(&h).await, Some("c".to_string()));
        assert_eq!(node(&h, "c").await.unwrap().status, NodeStatus::Failed);

        // Grace expires with c still down: demote and re-elect
        h.reconciler.last_promotion =
            Instant::now().checked_sub(Duration::from_secs(31));
        h.reconciler.tick().await.unwrap();
        assert_eq!(master_pointer(&h).await, Some("b".to_string()));
    }

    #[tokio::test]
    async fn test_role_mismatch_clears_even_within_grace() {
        let mut h = harness();
        seed_node(&h, "a", "10.0.0.1", NodeRole::Slave, NodeStatus::Online, "").await;
        h.store.seed(MASTER_KEY, "a").await;
        h.probe.set_replica("10.0.0.1", 3306, "x:1-5", 0);
        h.reconciler.last_promotion = Some(Instant::now());

        h.reconciler.tick().await.unwrap();

        // The pointer named a record whose role was never master; grace
        // does not protect it. The sole online slave is then elected.
        assert_eq!(master_pointer(&h).await, Some("a".to_string()));
        assert_eq!(node(&h, "a").await.unwrap().role, NodeRole::Master);
    }

    #[tokio::test]
    async fn test_stale_records_are_pruned() {
        let mut h = harness();
        let mut record = NodeRecord::new("10.0.0.9", "3306");
        record.role = NodeRole::Master;
        record.status = NodeStatus::Online;
        record.last_seen = Some(Utc::now() - chrono::Duration::minutes(10));
        h.store.seed("nodes/z", record.to_bytes()).await;
        h.store
            .seed(
                "topology/slaves/z",
                SlaveRecord::new("a", 3).to_bytes(),
            )
            .await;
        h.store.seed(MASTER_KEY, "z").await;

        h.reconciler.tick().await.unwrap();

        assert!(h.store.get_str("nodes/z").await.is_none());
        assert!(h.store.get_str("topology/slaves/z").await.is_none());
        assert!(master_pointer(&h).await.is_none());
    }

    #[tokio::test]
    async fn test_unparseable_record_is_pruned() {
        let mut h = harness();
        h.store.seed("nodes/bad", "{{not json").await;
        seed_node(&h, "a", "10.0.0.1", NodeRole::Slave, NodeStatus::Online, "").await;
        h.probe.set_replica("10.0.0.1", 3306, "x:1-5", 0);

        h.reconciler.tick().await.unwrap();

        assert!(h.store.get_str("nodes/bad").await.is_none());
        assert!(h.store.get_str("nodes/a").await.is_some());
    }

    #[tokio::test]
    async fn test_malformed_endpoint_is_deleted_in_sweep() {
        let mut h = harness();
        let mut record = NodeRecord::new("10.0.0.1", "notaport");
        record.role = NodeRole::Slave;
        h.store.seed("nodes/bad-port", record.to_bytes()).await;

        h.reconciler.tick().await.unwrap();

        assert!(h.store.get_str("nodes/bad-port").await.is_none());
    }

    #[tokio::test]
    async fn test_malformed_master_clears_pointer_and_publishes_empty() {
        let mut h = harness();
        let mut record = NodeRecord::new("10.0.0.1", "notaport");
        record.role = NodeRole::Master;
        record.status = NodeStatus::Online;
        h.store.seed("nodes/m", record.to_bytes()).await;
        h.store.seed(MASTER_KEY, "m").await;

        h.reconciler.tick().await.unwrap();

        // Deleting the master's record within the sweep must also clear
        // the pointer, and the same tick must publish an empty table
        // rather than leaving the proxy routing to the deleted node
        assert!(h.store.get_str("nodes/m").await.is_none());
        assert!(master_pointer(&h).await.is_none());
        assert_eq!(h.proxy.last_published(), Some(PublishedRouting::Empty));
    }

    #[tokio::test]
    async fn test_steady_state_is_idempotent() {
        let mut h = harness();
        seed_node(&h, "a", "10.0.0.1", NodeRole::Master, NodeStatus::Online, "x:1-90").await;
        seed_node(&h, "b", "10.0.0.2", NodeRole::Slave, NodeStatus::Online, "x:1-90").await;
        h.store.seed(MASTER_KEY, "a").await;
        h.store
            .seed("topology/slaves/b", SlaveRecord::new("a", 0).to_bytes())
            .await;

        h.probe.set_master("10.0.0.1", 3306, "x:1-90");
        h.probe.set_replica("10.0.0.2", 3306, "x:1-90", 0);

        h.reconciler.tick().await.unwrap();
        let writes_after_first = h.store.write_count();
        let first_publish = h.proxy.last_published();

        h.reconciler.tick().await.unwrap();

        // Unchanged input: no store writes, and the proxy sees the same
        // server table again
        assert_eq!(h.store.write_count(), writes_after_first);
        assert_eq!(h.proxy.last_published(), first_publish);
        assert_eq!(
            first_publish,
            Some(PublishedRouting::Routing {
                writer: backend("10.0.0.1"),
                readers: vec![backend("10.0.0.2")],
            })
        );
    }

    #[tokio::test]
    async fn test_single_master_invariant_after_failover() {
        let mut h = harness();
        seed_node(&h, "a", "10.0.0.1", NodeRole::Master, NodeStatus::Online, "x:1-10").await;
        seed_node(&h, "b", "10.0.0.2", NodeRole::Slave, NodeStatus::Online, "x:1-10").await;
        seed_node(&h, "c", "10.0.0.3", NodeRole::Slave, NodeStatus::Online, "x:1-9").await;
        h.store.seed(MASTER_KEY, "a").await;

        h.probe.set_failed("10.0.0.1", 3306, "dead");
        h.probe.set_replica("10.0.0.2", 3306, "x:1-10", 0);
        h.probe.set_replica("10.0.0.3", 3306, "x:1-9", 0);

        h.reconciler.tick().await.unwrap();

        let mut masters = 0;
        for id in ["a", "b", "c"] {
            if node(&h, id).await.unwrap().role == NodeRole::Master {
                masters += 1;
            }
        }
        assert_eq!(masters, 1);
        let pointer = master_pointer(&h).await.unwrap();
        assert_eq!(node(&h, &pointer).await.unwrap().role, NodeRole::Master);
    }

    #[tokio::test]
    async fn test_no_candidates_leaves_cluster_masterless() {
        let mut h = harness();
        seed_node(&h, "a", "10.0.0.1", NodeRole::Master, NodeStatus::Online, "x:1-10").await;
        h.store.seed(MASTER_KEY, "a").await;
        h.probe.set_failed("10.0.0.1", 3306, "dead");

        h.reconciler.tick().await.unwrap();

        // The failed master stays recorded as master until a candidate
        // exists, and the proxy keeps routing to it in the meantime;
        // validation clears the pointer next tick once status=failed
        // is in the store.
        assert_eq!(master_pointer(&h).await, Some("a".to_string()));

        h.reconciler.tick().await.unwrap();
        assert!(master_pointer(&h).await.is_none());
        assert_eq!(h.proxy.last_published(), Some(PublishedRouting::Empty));
    }

    #[tokio::test]
    async fn test_degraded_replica_excluded_from_readers() {
        let mut h = harness();
        seed_node(&h, "a", "10.0.0.1", NodeRole::Master, NodeStatus::Online, "x:1-90").await;
        seed_node(&h, "b", "10.0.0.2", NodeRole::Slave, NodeStatus::Online, "x:1-90").await;
        seed_node(&h, "c", "10.0.0.3", NodeRole::Slave, NodeStatus::Online, "x:1-90").await;
        h.store.seed(MASTER_KEY, "a").await;

        h.probe.set_master("10.0.0.1", 3306, "x:1-90");
        h.probe.set_replica("10.0.0.2", 3306, "x:1-90", 0);
        // c's connection is fine but replication lags over threshold
        h.probe.set_replica("10.0.0.3", 3306, "x:1-90", 900);

        h.reconciler.tick().await.unwrap();

        assert_eq!(
            h.proxy.last_published(),
            Some(PublishedRouting::Routing {
                writer: backend("10.0.0.1"),
                readers: vec![backend("10.0.0.2")],
            })
        );
        assert_eq!(node(&h, "c").await.unwrap().status, NodeStatus::Failed);
    }

    #[tokio::test]
    async fn test_slave_record_mirrors_lag() {
        let mut h = harness();
        seed_node(&h, "a", "10.0.0.1", NodeRole::Master, NodeStatus::Online, "x:1-90").await;
        seed_node(&h, "b", "10.0.0.2", NodeRole::Slave, NodeStatus::Online, "x:1-80").await;
        h.store.seed(MASTER_KEY, "a").await;
        h.probe.set_master("10.0.0.1", 3306, "x:1-90");
        h.probe.set_replica("10.0.0.2", 3306, "x:1-80", 7);

        h.reconciler.tick().await.unwrap();

        let raw = h.store.get_str("topology/slaves/b").await.unwrap();
        let slave: SlaveRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(slave.master_node_id, "a");
        assert_eq!(slave.replication_lag, 7);
    }
}
