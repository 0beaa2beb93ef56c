//! Reference scenarios run against a live cluster.
//!
//! Workers are ordered by job acknowledgements and by waiting on the
//! master's lock queues, never by sleeping.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use replicant_core::{GlobalTxId, NodeId, RelationshipId, REFERENCE_NODE};

use crate::cluster::Cluster;
use crate::coordinator::Outcome;
use crate::error::{ClusterError, Result};
use crate::member::Member;
use crate::worker::{Job, ResultLog, Worker};

/// Relationship type of every scenario graph.
pub const REL_TYPE: &str = "HA_TEST";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    SlaveCreateNode,
    MultipleSlaves,
    LockingSingleSlave,
    LockingMultipleSlaves,
    Rollback,
}

impl Scenario {
    pub fn slaves_required(self) -> usize {
        match self {
            Scenario::SlaveCreateNode | Scenario::LockingSingleSlave => 1,
            Scenario::LockingMultipleSlaves | Scenario::Rollback => 2,
            Scenario::MultipleSlaves => 3,
        }
    }

    /// Run the scenario, then bring every slave up to the master.
    pub async fn run(self, cluster: &Cluster) -> Result<ScenarioReport> {
        tracing::info!(scenario = ?self, "Running scenario");
        let results = match self {
            Scenario::SlaveCreateNode => {
                slave_create_node(cluster).await?;
                BTreeSet::new()
            }
            Scenario::MultipleSlaves => {
                multiple_slaves(cluster).await?;
                BTreeSet::new()
            }
            Scenario::LockingSingleSlave => locking_on_single_slave(cluster).await?.after_drain,
            Scenario::LockingMultipleSlaves => {
                locking_on_multiple_slaves(cluster).await?.after_drain
            }
            Scenario::Rollback => rollback(cluster).await?.results,
        };
        cluster.pull_all().await?;
        Ok(ScenarioReport {
            scenario: self,
            results,
            high_water_mark: cluster.master().high_water_mark(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: Scenario,
    pub results: BTreeSet<String>,
    pub high_water_mark: GlobalTxId,
}

fn slave(cluster: &Cluster, index: usize) -> Result<&Arc<Member>> {
    cluster.slave(index).ok_or(ClusterError::NotEnoughSlaves {
        required: index + 1,
        available: cluster.slaves().len(),
    })
}

fn committed_id(outcome: Outcome) -> GlobalTxId {
    match outcome {
        Outcome::Committed {
            global_id: Some(id),
        } => id,
        _ => GlobalTxId::ZERO,
    }
}

/// Two nodes chained off the reference node.
#[derive(Debug, Clone, Copy)]
pub struct Chain {
    pub node1: NodeId,
    pub node2: NodeId,
}

/// Commit `reference -> node1 -> node2` on the master and let every slave
/// pull it.
pub async fn seed_chain(cluster: &Cluster) -> Result<Chain> {
    let mut tx = cluster.master_member().begin_transaction();
    let node1 = tx.create_node().await?;
    tx.create_relationship(REFERENCE_NODE, node1, REL_TYPE).await?;
    let node2 = tx.create_node().await?;
    tx.create_relationship(node1, node2, REL_TYPE).await?;
    tx.mark_success();
    tx.end().await?;
    cluster.pull_all().await?;
    Ok(Chain { node1, node2 })
}

#[derive(Debug, Clone, Copy)]
pub struct CreatedGraph {
    pub node1: NodeId,
    pub node2: NodeId,
    pub rel1: RelationshipId,
    pub rel2: RelationshipId,
    pub global_id: GlobalTxId,
}

/// A slave creates two nodes and two relationships, all with properties,
/// in one transaction.
pub async fn slave_create_node(cluster: &Cluster) -> Result<CreatedGraph> {
    let mut tx = slave(cluster, 0)?.begin_transaction();
    let node1 = tx.create_node().await?;
    tx.set_property(node1.into(), "name", "Mattias").await?;
    let rel1 = tx
        .create_relationship(REFERENCE_NODE, node1, REL_TYPE)
        .await?;
    tx.set_property(rel1.into(), "something else", "Somewhat different")
        .await?;
    let node2 = tx.create_node().await?;
    tx.set_property(node2.into(), "why o why", "Stuff").await?;
    let rel2 = tx.create_relationship(node1, node2, REL_TYPE).await?;
    tx.set_property(rel2.into(), "random integer", "4").await?;
    tx.mark_success();
    let global_id = committed_id(tx.end().await?);
    tracing::info!(%node1, %node2, %global_id, "Slave created nodes");
    Ok(CreatedGraph {
        node1,
        node2,
        rel1,
        rel2,
        global_id,
    })
}

/// One slave creates a node, a second slave changes it, and the other
/// two pull. Needs three slaves.
pub async fn multiple_slaves(cluster: &Cluster) -> Result<NodeId> {
    let (first, second, third) = (slave(cluster, 0)?, slave(cluster, 1)?, slave(cluster, 2)?);

    let mut tx = first.begin_transaction();
    let node = tx.create_node().await?;
    tx.create_relationship(REFERENCE_NODE, node, REL_TYPE)
        .await?;
    tx.mark_success();
    tx.end().await?;

    let mut tx = second.begin_transaction();
    tx.remove_property(REFERENCE_NODE.into(), "bög").await?;
    tx.set_property(node.into(), "name", "Hello").await?;
    tx.mark_success();
    tx.end().await?;

    first.pull_updates().await?;
    third.pull_updates().await?;
    Ok(node)
}

/// Results of a lock contention scenario.
#[derive(Debug, Clone)]
pub struct LockingOutcome {
    pub chain: Chain,
    /// Everything recorded at the moment worker 2 saw its deadlock.
    pub at_deadlock: BTreeSet<String>,
    /// Everything recorded once both workers have stopped.
    pub after_drain: BTreeSet<String>,
}

/// Two workers on one slave lock the chain's nodes in opposite order.
pub async fn locking_on_single_slave(cluster: &Cluster) -> Result<LockingOutcome> {
    let member = slave(cluster, 0)?.clone();
    opposite_order_locking(cluster, member.clone(), member, true).await
}

/// As [`locking_on_single_slave`], with each worker on its own slave.
pub async fn locking_on_multiple_slaves(cluster: &Cluster) -> Result<LockingOutcome> {
    let first = slave(cluster, 0)?.clone();
    let second = slave(cluster, 1)?.clone();
    opposite_order_locking(cluster, first, second, false).await
}

async fn opposite_order_locking(
    cluster: &Cluster,
    first: Arc<Member>,
    second: Arc<Member>,
    restart_after_deadlock: bool,
) -> Result<LockingOutcome> {
    let chain = seed_chain(cluster).await?;
    let (a, b) = (chain.node1, chain.node2);
    let results = ResultLog::new();
    let worker1 = Worker::spawn("1", first, results.clone());
    let worker2 = Worker::spawn("2", second, results.clone());

    worker1.run(Job::GrabWriteLock(a)).await;
    worker2.run(Job::GrabWriteLock(b)).await;
    let blocked = worker1.submit(Job::GrabWriteLock(b));
    cluster.master().locks().wait_for_waiters(b.into(), 1).await;
    worker2.run(Job::GrabWriteLock(a)).await;
    let at_deadlock = results.set();

    if restart_after_deadlock {
        worker2
            .run(Job::RestartTransaction { successful: true })
            .await;
    }
    worker2.halt();
    blocked.completed().await;
    worker1.halt();
    worker2.join().await;
    worker1.join().await;

    Ok(LockingOutcome {
        chain,
        at_deadlock,
        after_drain: results.set(),
    })
}

#[derive(Debug, Clone)]
pub struct RollbackOutcome {
    pub chain: Chain,
    pub results: BTreeSet<String>,
}

/// Worker 1 sets a property on the chain's second node and commits.
/// Worker 2, on another slave, waits for that node, deletes it along with
/// its relationships, and rolls back.
pub async fn rollback(cluster: &Cluster) -> Result<RollbackOutcome> {
    let chain = seed_chain(cluster).await?;
    let target = chain.node2;
    let results = ResultLog::new();
    let worker1 = Worker::spawn("1", slave(cluster, 0)?.clone(), results.clone());
    let worker2 = Worker::spawn("2", slave(cluster, 1)?.clone(), results.clone());

    worker1.run(Job::SetProperty(target)).await;
    let deleted = worker2.submit(Job::DeleteNodeAndRelationships(target));
    worker2.submit(Job::RestartTransaction { successful: false });
    cluster
        .master()
        .locks()
        .wait_for_waiters(target.into(), 1)
        .await;
    worker1
        .run(Job::RestartTransaction { successful: true })
        .await;
    deleted.completed().await;

    worker2.halt();
    worker1.halt();
    worker2.join().await;
    worker1.join().await;
    cluster.pull_all().await?;

    Ok(RollbackOutcome {
        chain,
        results: results.set(),
    })
}
