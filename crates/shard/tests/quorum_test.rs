mod common;

use common::{TestCluster, TestClusterConfig};
use tessel::{SqlEngine, WriteKind};
use ts_core::protocol::SqlRequest;
use ts_core::ClusterError;

const SELECT: &str = "SELECT id, qty FROM stock ORDER BY id";

async fn stocked() -> TestCluster {
    let cluster = TestCluster::start(TestClusterConfig::default()).await;
    cluster
        .write(
            0,
            WriteKind::Create,
            "stock",
            "CREATE TABLE stock (id INTEGER PRIMARY KEY, qty INTEGER)",
        )
        .await;
    cluster
        .write(0, WriteKind::Update, "stock", "INSERT INTO stock VALUES (1, 10), (2, 20)")
        .await;
    cluster
}

fn tamper(cluster: &TestCluster, i: usize) {
    cluster
        .node(i)
        .engine()
        .execute("UPDATE stock SET qty = qty + 1 WHERE id = 1")
        .unwrap();
}

#[tokio::test]
async fn test_read_accepted_when_all_agree() {
    let cluster = stocked().await;
    let result = cluster
        .node(1)
        .handle_query(&SqlRequest::new(SELECT, "stock"))
        .await
        .unwrap();
    assert_eq!(result.agreements, 3);
    assert_eq!(result.replicas, 3);
    assert_eq!(result.rows.len(), 2);
}

#[tokio::test]
async fn test_read_accepted_with_one_diverged_replica() {
    let cluster = stocked().await;
    tamper(&cluster, 2);

    let result = cluster
        .node(0)
        .handle_query(&SqlRequest::new(SELECT, "stock"))
        .await
        .unwrap();
    assert_eq!(result.agreements, 2);
    assert_eq!(result.replicas, 3);
}

#[tokio::test]
async fn test_read_rejected_without_majority() {
    let cluster = stocked().await;
    tamper(&cluster, 1);
    tamper(&cluster, 2);

    let err = cluster
        .node(0)
        .handle_query(&SqlRequest::new(SELECT, "stock"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClusterError::QuorumFailure {
            agreements: 1,
            replicas: 3
        }
    ));
}

#[tokio::test]
async fn test_silent_replica_counts_against_quorum() {
    let cluster = stocked().await;
    cluster.peers.set_down(&cluster.addr(1), true);
    let result = cluster
        .node(0)
        .handle_query(&SqlRequest::new(SELECT, "stock"))
        .await
        .unwrap();
    assert_eq!(result.agreements, 2);

    cluster.peers.set_down(&cluster.addr(2), true);
    let err = cluster
        .node(0)
        .handle_query(&SqlRequest::new(SELECT, "stock"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::QuorumFailure { .. }));
}

#[tokio::test]
async fn test_query_on_unknown_table() {
    let cluster = stocked().await;
    let err = cluster
        .node(0)
        .handle_query(&SqlRequest::new("SELECT * FROM nope", "nope"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::TableNotFound(_)));
    assert_eq!(cluster.node(0).visit_count(), 3);
}
