//! A master and its slaves, started together.
//!
//! Layout of a cluster data directory:
//! ```text
//! {dir}/
//!   master/      master store and transaction log
//!   slave-0/     first slave's store
//!   slave-1/
//! ```
//! Slave `i` is always member `i + 1`, so restarted slaves rejoin under
//! the id their committed transactions were logged with.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use replicant_core::{MemberId, Role};
use replicant_store::{GraphStore, MemoryGraph, Snapshot};
use replicant_verify::{offline, ConsistencyVerifier, VerificationReport};

use crate::broker::{Broker, LocalBroker};
use crate::config::ClusterConfig;
use crate::error::{ClusterError, Result};
use crate::master::Master;
use crate::member::Member;
use crate::puller::PullOutcome;
use crate::replica::Replica;

const MASTER_DIR: &str = "master";
const SLAVE_DIR_PREFIX: &str = "slave-";

pub struct Cluster {
    dir: Option<PathBuf>,
    master: Arc<Master>,
    broker: Arc<dyn Broker>,
    master_member: Arc<Member>,
    slaves: Vec<Arc<Member>>,
}

impl Cluster {
    async fn assemble(dir: Option<PathBuf>, master: Master) -> Result<Self> {
        let master = Arc::new(master);
        let broker: Arc<dyn Broker> = Arc::new(LocalBroker::new(master.clone()));
        let master_member = Member::join(
            Role::Master,
            master.replica().clone(),
            broker.clone(),
            Some(MemberId::MASTER),
        )
        .await?;
        Ok(Self {
            dir,
            master,
            broker,
            master_member,
            slaves: Vec::new(),
        })
    }

    /// A cluster that keeps nothing on disk.
    pub async fn in_memory(slaves: usize) -> Result<Self> {
        let mut cluster = Self::assemble(None, Master::in_memory()).await?;
        for _ in 0..slaves {
            cluster.join_slave().await?;
        }
        Ok(cluster)
    }

    /// Create a fresh cluster in `dir`. Fails if one already lives there.
    pub async fn initialize(
        dir: impl Into<PathBuf>,
        slaves: usize,
        log_retain: Option<u64>,
    ) -> Result<Self> {
        let dir = dir.into();
        let master_dir = dir.join(MASTER_DIR);
        if Snapshot::exists(&master_dir) {
            return Err(ClusterError::AlreadyInitialized(
                dir.display().to_string(),
            ));
        }
        let master = Master::create(master_dir)?.with_log_retain(log_retain);
        let mut cluster = Self::assemble(Some(dir.clone()), master).await?;
        for _ in 0..slaves {
            cluster.join_slave().await?;
        }
        tracing::info!(dir = %dir.display(), slaves, "Cluster initialized");
        Ok(cluster)
    }

    /// Restart a cluster from its data directory. Slaves rejoin with their
    /// previous member ids.
    pub async fn open(dir: impl Into<PathBuf>, log_retain: Option<u64>) -> Result<Self> {
        let dir = dir.into();
        let master = Master::open(dir.join(MASTER_DIR))?.with_log_retain(log_retain);
        let mut cluster = Self::assemble(Some(dir.clone()), master).await?;

        let slave_dirs = slave_dirs(&dir);
        for (index, slave_dir) in slave_dirs.iter().enumerate() {
            let replica = Arc::new(Replica::open(slave_dir)?);
            let member = Member::join(
                Role::Slave,
                replica,
                cluster.broker.clone(),
                Some(slave_member_id(index)),
            )
            .await?;
            cluster.slaves.push(member);
        }
        tracing::info!(dir = %dir.display(), slaves = cluster.slaves.len(), "Cluster reopened");
        Ok(cluster)
    }

    /// Open the cluster described by `config`, creating it when absent.
    /// `fresh` wipes any existing data first.
    pub async fn with_config(config: &ClusterConfig, fresh: bool) -> Result<Self> {
        let dir = config.data_path();
        if fresh && dir.exists() {
            tracing::info!(dir = %dir.display(), "Removing previous cluster data");
            std::fs::remove_dir_all(&dir)?;
        }
        if Snapshot::exists(&dir.join(MASTER_DIR)) {
            Self::open(dir, config.log_retain).await
        } else {
            Self::initialize(dir, config.slaves, config.log_retain).await
        }
    }

    /// Seed a new slave from a copy of the master's store and register it.
    pub async fn join_slave(&mut self) -> Result<Arc<Member>> {
        let index = self.slaves.len();
        let copy = self.master.copy_store();
        let replica = match &self.dir {
            Some(dir) => Replica::create(slave_dir(dir, index), copy)?,
            None => Replica::in_memory(copy),
        };
        let member = Member::join(
            Role::Slave,
            Arc::new(replica),
            self.broker.clone(),
            Some(slave_member_id(index)),
        )
        .await?;
        self.slaves.push(member.clone());
        Ok(member)
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn master(&self) -> &Arc<Master> {
        &self.master
    }

    pub fn master_member(&self) -> &Arc<Member> {
        &self.master_member
    }

    pub fn slaves(&self) -> &[Arc<Member>] {
        &self.slaves
    }

    pub fn slave(&self, index: usize) -> Option<&Arc<Member>> {
        self.slaves.get(index)
    }

    /// Bring every slave up to the master's current high-water-mark.
    pub async fn pull_all(&self) -> Result<Vec<PullOutcome>> {
        let mut outcomes = Vec::with_capacity(self.slaves.len());
        for slave in &self.slaves {
            outcomes.push(slave.catch_up_to_master().await?);
        }
        Ok(outcomes)
    }

    /// Compare every live slave with the master.
    pub fn verify_online(&self) -> Result<VerificationReport> {
        let reference: MemoryGraph = self.master.replica().snapshot().graph;
        let copies: Vec<MemoryGraph> = self
            .slaves
            .iter()
            .map(|s| s.replica().snapshot().graph)
            .collect();
        let report = ConsistencyVerifier::new()
            .compare_all(&reference, copies.iter().map(|g| g as &dyn GraphStore))?;
        Ok(report)
    }

    /// Stop the cluster. Every store is persisted on each change, so this
    /// only flushes once more and logs where each member stopped.
    pub fn shutdown(self) -> Result<()> {
        self.master.replica().persist()?;
        for slave in &self.slaves {
            slave.replica().persist()?;
            tracing::info!(member = %slave.id(), high_water_mark = %slave.high_water_mark(), "Slave stopped");
        }
        tracing::info!(high_water_mark = %self.master.high_water_mark(), "Master stopped");
        Ok(())
    }

    /// Compare the persisted slave stores in `dir` with the persisted
    /// master store, without starting anything.
    pub fn verify_offline(dir: &Path) -> Result<VerificationReport> {
        let report = offline::verify_dirs(
            &ConsistencyVerifier::new(),
            &dir.join(MASTER_DIR),
            &slave_dirs(dir),
        )?;
        Ok(report)
    }
}

fn slave_member_id(index: usize) -> MemberId {
    MemberId(index as u32 + 1)
}

fn slave_dir(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("{SLAVE_DIR_PREFIX}{index}"))
}

/// Existing slave directories, in slave order.
fn slave_dirs(dir: &Path) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    while Snapshot::exists(&slave_dir(dir, dirs.len())) {
        dirs.push(slave_dir(dir, dirs.len()));
    }
    dirs
}
