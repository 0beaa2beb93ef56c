use std::collections::BTreeSet;

use replicant_cluster::scenario::{self, REL_TYPE};
use replicant_cluster::{Cluster, Scenario};
use replicant_core::{Direction, PropertyValue, REFERENCE_NODE};
use replicant_store::GraphStore;

fn set(items: &[String]) -> BTreeSet<String> {
    items.iter().cloned().collect()
}

#[tokio::test]
async fn slave_created_graph_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Cluster::initialize(dir.path(), 1, None).await.unwrap();

    let created = scenario::slave_create_node(&cluster).await.unwrap();
    assert_eq!(cluster.master().high_water_mark(), created.global_id);
    // Committing slave already caught up.
    assert_eq!(cluster.slave(0).unwrap().high_water_mark(), created.global_id);
    let online = cluster.verify_online().unwrap();
    assert_eq!(online.members_checked, 1);
    assert_eq!(online.nodes_checked, 3);
    assert_eq!(online.relationships_checked, 2);
    assert_eq!(online.properties_checked, 4);

    cluster.shutdown().unwrap();
    let offline = Cluster::verify_offline(dir.path()).unwrap();
    assert_eq!(offline.reference_digest, online.reference_digest);

    let reopened = Cluster::open(dir.path(), None).await.unwrap();
    assert_eq!(reopened.slaves().len(), 1);
    assert_eq!(reopened.master().high_water_mark(), created.global_id);
    let again = reopened.verify_online().unwrap();
    assert_eq!(again.reference_digest, online.reference_digest);

    let slave = reopened.slave(0).unwrap();
    let (name, rel_value, rel_type) = slave.read(|g| {
        (
            g.get_property(created.node1.into(), "name").unwrap().cloned(),
            g.get_property(created.rel2.into(), "random integer")
                .unwrap()
                .cloned(),
            g.relationship(created.rel1).unwrap().rel_type.clone(),
        )
    });
    assert_eq!(name, Some(PropertyValue::from("Mattias")));
    assert_eq!(rel_value, Some(PropertyValue::from("4")));
    assert_eq!(rel_type, REL_TYPE);
}

#[tokio::test]
async fn reopened_slave_keeps_committing() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Cluster::initialize(dir.path(), 1, None).await.unwrap();
    scenario::slave_create_node(&cluster).await.unwrap();
    cluster.shutdown().unwrap();

    let reopened = Cluster::open(dir.path(), None).await.unwrap();
    let created = scenario::slave_create_node(&reopened).await.unwrap();
    assert!(created.node1.0 > 2, "ids must not be reused after restart");
    reopened.verify_online().unwrap();
    reopened.shutdown().unwrap();
    Cluster::verify_offline(dir.path()).unwrap();
}

#[tokio::test]
async fn opposite_lock_order_on_one_slave_deadlocks_second_worker() {
    let cluster = Cluster::in_memory(1).await.unwrap();
    let outcome = scenario::locking_on_single_slave(&cluster).await.unwrap();
    let (a, b) = (outcome.chain.node1, outcome.chain.node2);

    assert_eq!(
        outcome.at_deadlock,
        set(&[format!("1:W {a}"), format!("2:W {b}"), format!("2:DL {a}")])
    );
    assert_eq!(
        outcome.after_drain,
        set(&[
            format!("1:W {a}"),
            format!("2:W {b}"),
            format!("2:DL {a}"),
            format!("1:W {b}"),
        ])
    );
    assert!(cluster.master().locks().holder(a.into()).is_none());
    assert!(cluster.master().locks().holder(b.into()).is_none());
    cluster.pull_all().await.unwrap();
    cluster.verify_online().unwrap();
}

#[tokio::test]
async fn opposite_lock_order_across_slaves_deadlocks_second_worker() {
    let cluster = Cluster::in_memory(2).await.unwrap();
    let outcome = scenario::locking_on_multiple_slaves(&cluster).await.unwrap();
    let (a, b) = (outcome.chain.node1, outcome.chain.node2);

    assert_eq!(
        outcome.at_deadlock,
        set(&[format!("1:W {a}"), format!("2:W {b}"), format!("2:DL {a}")])
    );
    assert!(outcome.after_drain.contains(&format!("1:W {b}")));
    assert_eq!(outcome.after_drain.len(), 4);
    cluster.pull_all().await.unwrap();
    cluster.verify_online().unwrap();
}

#[tokio::test]
async fn rolled_back_delete_leaves_no_trace() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Cluster::initialize(dir.path(), 2, None).await.unwrap();
    let outcome = scenario::rollback(&cluster).await.unwrap();
    let (node1, node2) = (outcome.chain.node1, outcome.chain.node2);

    assert_eq!(
        outcome.results,
        set(&[format!("1:SP {node2}"), format!("2:DNR {node2}")])
    );

    let master_hwm = cluster.master().high_water_mark();
    for member in std::iter::once(cluster.master_member()).chain(cluster.slaves()) {
        assert_eq!(member.high_water_mark(), master_hwm);
        member.read(|g| {
            assert!(g.has_node(node2));
            assert_eq!(
                g.get_property(node2.into(), "yo").unwrap(),
                Some(&PropertyValue::from("ya"))
            );
            let chain = g.relationships_of(node1, Direction::Outgoing).unwrap();
            assert_eq!(chain.len(), 1);
            assert_eq!(g.relationship(chain[0]).unwrap().end, node2);
            for rel in g.relationship_ids() {
                let rel = g.relationship(rel).unwrap();
                assert!(g.has_node(rel.start) && g.has_node(rel.end));
            }
        });
    }
    cluster.verify_online().unwrap();
    cluster.shutdown().unwrap();
    Cluster::verify_offline(dir.path()).unwrap();
}

#[tokio::test]
async fn change_on_one_slave_reaches_the_others() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Cluster::initialize(dir.path(), 3, None).await.unwrap();
    let node = scenario::multiple_slaves(&cluster).await.unwrap();

    for slave in cluster.slaves() {
        let (name, linked) = slave.read(|g| {
            (
                g.get_property(node.into(), "name").unwrap().cloned(),
                g.relationships_of(REFERENCE_NODE, Direction::Outgoing)
                    .unwrap()
                    .into_iter()
                    .any(|rel| g.relationship(rel).unwrap().end == node),
            )
        });
        assert_eq!(name, Some(PropertyValue::from("Hello")));
        assert!(linked);
    }
    let report = cluster.verify_online().unwrap();
    assert_eq!(report.members_checked, 3);
    cluster.shutdown().unwrap();
    Cluster::verify_offline(dir.path()).unwrap();
}

#[tokio::test]
async fn every_scenario_runs_from_the_enum() {
    let cluster = Cluster::in_memory(3).await.unwrap();
    let all = [
        Scenario::SlaveCreateNode,
        Scenario::MultipleSlaves,
        Scenario::LockingSingleSlave,
        Scenario::LockingMultipleSlaves,
        Scenario::Rollback,
    ];
    for scenario in all {
        assert!(scenario.slaves_required() <= 3);
        let report = scenario.run(&cluster).await.unwrap();
        assert_eq!(report.high_water_mark, cluster.master().high_water_mark());
        for slave in cluster.slaves() {
            assert_eq!(slave.high_water_mark(), report.high_water_mark);
        }
        cluster.verify_online().unwrap();
    }
}

#[tokio::test]
async fn scenario_needing_more_slaves_is_refused() {
    let cluster = Cluster::in_memory(1).await.unwrap();
    let err = scenario::multiple_slaves(&cluster).await.unwrap_err();
    assert!(matches!(
        err,
        replicant_cluster::ClusterError::NotEnoughSlaves {
            required: 2,
            available: 1
        }
    ));
}
