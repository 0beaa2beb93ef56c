//! replicant-cluster: master/slave replication for the Replicant graph store.
//!
//! The master owns the lock manager, the transaction log and the
//! authoritative store. Members run transactions that lock through the
//! master, commit to its log, and pull what others committed.

pub mod broker;
pub mod cluster;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod lock;
pub mod master;
pub mod member;
pub mod messages;
pub mod puller;
pub mod replica;
pub mod scenario;
pub mod worker;

pub use broker::{Broker, LocalBroker};
pub use cluster::Cluster;
pub use coordinator::{Outcome, Transaction};
pub use error::{ClusterError, Result};
pub use lock::LockManager;
pub use master::Master;
pub use member::Member;
pub use scenario::Scenario;
