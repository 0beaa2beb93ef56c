//! Scripted workers for exercising concurrent transactions.
//!
//! Each worker owns one open transaction on one member and a queue of
//! [`Job`]s it runs in order. Submitting a job returns a handle that
//! resolves when the job has run. Halting is itself a queued message: the
//! worker drains what is ahead of it, ends its transaction, and only then
//! stops.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use replicant_core::{Direction, NodeId};

use crate::coordinator::{Outcome, Transaction};
use crate::error::{ClusterError, Result};
use crate::member::Member;

/// Property removed to take a node's write lock without changing it.
const LOCK_GRAB_KEY: &str = "skdlsdksldk";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    /// Take the write lock on a node. Records `W {id}`, or `DL {id}` on deadlock.
    GrabWriteLock(NodeId),
    /// Set `yo = "ya"` on a node. Records `SP {id}`.
    SetProperty(NodeId),
    /// Delete a node and all its relationships. Records `DNR {id}`.
    DeleteNodeAndRelationships(NodeId),
    /// End the current transaction and begin a new one. Records nothing.
    RestartTransaction { successful: bool },
}

/// Results shared by a group of workers, each prefixed with the worker name.
#[derive(Debug, Clone, Default)]
pub struct ResultLog(Arc<Mutex<Vec<String>>>);

impl ResultLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, entry: String) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    /// Entries in the order they were recorded.
    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set(&self) -> BTreeSet<String> {
        self.entries().into_iter().collect()
    }
}

enum Message {
    Run {
        job: Job,
        done: oneshot::Sender<Option<String>>,
    },
    Halt,
}

/// Resolves once the submitted job has run.
pub struct JobHandle(oneshot::Receiver<Option<String>>);

impl JobHandle {
    /// The job's result line (without worker prefix), if it records one.
    pub async fn completed(self) -> Option<String> {
        self.0.await.ok().flatten()
    }
}

pub struct Worker {
    name: String,
    sender: mpsc::UnboundedSender<Message>,
    task: JoinHandle<()>,
}

impl Worker {
    /// Start a worker with a fresh transaction on `member`.
    pub fn spawn(name: impl Into<String>, member: Arc<Member>, results: ResultLog) -> Self {
        let name = name.into();
        let (sender, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(name.clone(), member, results, receiver));
        Self { name, sender, task }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn submit(&self, job: Job) -> JobHandle {
        let (done, completed) = oneshot::channel();
        if self.sender.send(Message::Run { job, done }).is_err() {
            tracing::warn!(worker = %self.name, ?job, "Job submitted to a stopped worker");
        }
        JobHandle(completed)
    }

    /// Submit `job` and wait for it to run.
    pub async fn run(&self, job: Job) -> Option<String> {
        self.submit(job).completed().await
    }

    /// Ask the worker to stop after the jobs already queued.
    pub fn halt(&self) {
        let _ = self.sender.send(Message::Halt);
    }

    /// Wait until the worker has ended its transaction and stopped.
    pub async fn join(self) {
        if let Err(err) = self.task.await {
            tracing::error!(worker = %self.name, error = %err, "Worker task failed");
        }
    }
}

async fn run(
    name: String,
    member: Arc<Member>,
    results: ResultLog,
    mut receiver: mpsc::UnboundedReceiver<Message>,
) {
    let mut tx = member.begin_transaction();
    while let Some(message) = receiver.recv().await {
        match message {
            Message::Run { job, done } => {
                let line = execute(&member, &mut tx, job).await;
                if let Some(line) = &line {
                    results.record(format!("{name}:{line}"));
                }
                let _ = done.send(line);
            }
            Message::Halt => break,
        }
    }
    tx.mark_success();
    finish(&name, tx).await;
    tracing::debug!(worker = %name, "Worker stopped");
}

/// Run one job against the worker's open transaction.
async fn execute(member: &Arc<Member>, tx: &mut Transaction, job: Job) -> Option<String> {
    let (label, node, result) = match job {
        Job::GrabWriteLock(node) => (
            "W",
            node,
            tx.remove_property(node.into(), LOCK_GRAB_KEY).await.map(|_| ()),
        ),
        Job::SetProperty(node) => ("SP", node, tx.set_property(node.into(), "yo", "ya").await),
        Job::DeleteNodeAndRelationships(node) => {
            ("DNR", node, delete_node_and_relationships(tx, node).await)
        }
        Job::RestartTransaction { successful } => {
            if successful {
                tx.mark_success();
            }
            let next = member.begin_transaction();
            let previous = std::mem::replace(tx, next);
            finish("restart", previous).await;
            return None;
        }
    };
    Some(match result {
        Ok(()) => format!("{label} {node}"),
        Err(err) if err.is_deadlock() => format!("DL {node}"),
        Err(err) => {
            tracing::warn!(tx = %tx.id(), ?job, error = %err, "Job failed");
            format!("ERR {node}")
        }
    })
}

async fn delete_node_and_relationships(tx: &mut Transaction, node: NodeId) -> Result<()> {
    tx.acquire_write_lock(node.into()).await?;
    for rel in tx.relationships(node, Direction::Both)? {
        tx.delete_relationship(rel).await?;
    }
    tx.delete_node(node).await
}

async fn finish(worker: &str, tx: Transaction) {
    let id = tx.id();
    match tx.end().await {
        Ok(Outcome::Committed { global_id }) => {
            tracing::debug!(%worker, tx = %id, ?global_id, "Worker transaction committed");
        }
        Ok(Outcome::RolledBack) => {
            tracing::debug!(%worker, tx = %id, "Worker transaction rolled back");
        }
        Err(err @ ClusterError::CommittedNotVisible { .. }) => {
            tracing::warn!(%worker, tx = %id, error = %err, "Worker transaction committed, local copy behind");
        }
        Err(err @ ClusterError::CommitConflict { .. }) => {
            tracing::warn!(%worker, tx = %id, error = %err, "Worker transaction rejected");
        }
        Err(err) => {
            tracing::error!(%worker, tx = %id, error = %err, "Worker transaction failed to end");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Cluster;
    use crate::scenario::seed_chain;
    use replicant_core::PropertyValue;
    use replicant_store::GraphStore;

    fn yo(cluster: &Cluster, node: NodeId) -> Option<PropertyValue> {
        cluster
            .master()
            .replica()
            .read(|g| g.get_property(node.into(), "yo").unwrap().cloned())
    }

    #[tokio::test]
    async fn halt_drains_queue_then_commits() {
        let cluster = Cluster::in_memory(1).await.unwrap();
        let chain = seed_chain(&cluster).await.unwrap();
        let results = ResultLog::new();
        let worker = Worker::spawn("w", cluster.slave(0).unwrap().clone(), results.clone());

        worker.submit(Job::SetProperty(chain.node1));
        worker.submit(Job::GrabWriteLock(chain.node2));
        worker.halt();
        worker.join().await;

        assert_eq!(
            results.entries(),
            vec![
                format!("w:SP {}", chain.node1),
                format!("w:W {}", chain.node2)
            ]
        );
        assert_eq!(yo(&cluster, chain.node1), Some("ya".into()));
        assert!(cluster.master().locks().holder(chain.node2.into()).is_none());
    }

    #[tokio::test]
    async fn unsuccessful_restart_discards_work() {
        let cluster = Cluster::in_memory(1).await.unwrap();
        let chain = seed_chain(&cluster).await.unwrap();
        let results = ResultLog::new();
        let worker = Worker::spawn("w", cluster.slave(0).unwrap().clone(), results.clone());

        assert_eq!(
            worker.run(Job::SetProperty(chain.node2)).await,
            Some(format!("SP {}", chain.node2))
        );
        assert_eq!(
            worker
                .run(Job::RestartTransaction { successful: false })
                .await,
            None
        );
        worker.halt();
        worker.join().await;

        assert_eq!(results.entries().len(), 1);
        assert_eq!(yo(&cluster, chain.node2), None);
    }

    #[tokio::test]
    async fn delete_job_removes_node_and_relationships() {
        let cluster = Cluster::in_memory(1).await.unwrap();
        let chain = seed_chain(&cluster).await.unwrap();
        let results = ResultLog::new();
        let worker = Worker::spawn("w", cluster.slave(0).unwrap().clone(), results.clone());

        worker
            .run(Job::DeleteNodeAndRelationships(chain.node2))
            .await;
        worker.halt();
        worker.join().await;

        assert_eq!(results.set(), BTreeSet::from([format!("w:DNR {}", chain.node2)]));
        let (exists, outgoing) = cluster.master().replica().read(|g| {
            (
                g.has_node(chain.node2),
                g.relationships_of(chain.node1, Direction::Outgoing).unwrap(),
            )
        });
        assert!(!exists);
        assert!(outgoing.is_empty());
    }
}
