mod common;

use common::{TestCluster, TestClusterConfig};
use tessel::{SqlEngine, WriteKind};
use ts_core::partition::check_tiling;
use ts_core::protocol::{SqlBatchRequest, TransferSpec};
use ts_core::{hash_key, ClusterError, HashRange, Value, DEFAULT_HASH_SPACE};

const ROWS: i64 = 200;

/// Two shards with one follower each; `orders` lives entirely on shard 0
async fn two_shards() -> TestCluster {
    let cluster = TestCluster::start(TestClusterConfig {
        nodes: 4,
        max_shards: 2,
        max_followers: 1,
        ..Default::default()
    })
    .await;
    cluster
        .write(
            0,
            WriteKind::Create,
            "orders",
            "CREATE TABLE orders (id INTEGER PRIMARY KEY, item TEXT)",
        )
        .await;
    let batch = SqlBatchRequest {
        sql_list: (0..ROWS)
            .map(|id| format!("INSERT INTO orders VALUES ({}, 'item-{}')", id, id))
            .collect(),
        table_name: "orders".to_string(),
        checksum: None,
    };
    cluster.node(0).handle_batch(&batch).await.unwrap();
    cluster
}

fn ids(cluster: &TestCluster, i: usize) -> Vec<i64> {
    cluster
        .node(i)
        .engine()
        .query("SELECT id FROM orders ORDER BY id")
        .unwrap()
        .rows
        .into_iter()
        .filter_map(|row| match row[0] {
            Value::Integer(id) => Some(id),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_split_moves_upper_half() {
    let cluster = two_shards().await;
    let full = HashRange::full(DEFAULT_HASH_SPACE);
    let spec = TransferSpec::split("orders", full).unwrap();
    let (kept, moved) = (spec.kept(), spec.moved());
    assert_eq!(kept, HashRange::new(0, 32768).unwrap());
    assert_eq!(moved, HashRange::new(32768, 65536).unwrap());

    let expected_moved = (0..ROWS)
        .filter(|id| moved.contains(hash_key(&id.to_string(), DEFAULT_HASH_SPACE)))
        .count();

    let report = cluster
        .node(0)
        .handle_hot_send(&cluster.addr(1), 1, &[spec])
        .await
        .unwrap();
    assert!(report.is_complete());
    assert_eq!(report.rows_moved(), expected_moved);

    let source = ids(&cluster, 0);
    let target = ids(&cluster, 1);
    assert_eq!(source.len() + target.len(), ROWS as usize);
    assert_eq!(target.len(), expected_moved);
    assert!(source
        .iter()
        .all(|id| kept.contains(hash_key(&id.to_string(), DEFAULT_HASH_SPACE))));
    assert!(target
        .iter()
        .all(|id| moved.contains(hash_key(&id.to_string(), DEFAULT_HASH_SPACE))));

    // followers track their leaders
    assert_eq!(cluster.checksum(2, "orders"), cluster.checksum(0, "orders"));
    assert_eq!(cluster.checksum(3, "orders"), cluster.checksum(1, "orders"));

    let source_range = cluster.node(0).membership().table_range("orders").await.unwrap();
    let target_range = cluster.node(1).membership().table_range("orders").await.unwrap();
    assert_eq!(source_range, Some(kept));
    assert_eq!(target_range, Some(moved));
    check_tiling(&[kept, moved], DEFAULT_HASH_SPACE).unwrap();
}

#[tokio::test]
async fn test_failed_table_is_reported_and_others_move() {
    let cluster = two_shards().await;
    let full = HashRange::full(DEFAULT_HASH_SPACE);
    let specs = vec![
        TransferSpec::split("missing", full).unwrap(),
        TransferSpec::split("orders", full).unwrap(),
    ];

    let report = cluster
        .node(0)
        .handle_hot_send(&cluster.addr(1), 1, &specs)
        .await
        .unwrap();
    assert!(!report.is_complete());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].table_name, "missing");
    assert_eq!(report.moved.len(), 1);
    assert_eq!(report.moved[0].table_name, "orders");
}

#[tokio::test]
async fn test_unreachable_target_deletes_nothing() {
    let cluster = two_shards().await;
    cluster.peers.set_down(&cluster.addr(1), true);
    let spec = TransferSpec::split("orders", HashRange::full(DEFAULT_HASH_SPACE)).unwrap();

    let report = cluster
        .node(0)
        .handle_hot_send(&cluster.addr(1), 1, &[spec])
        .await
        .unwrap();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(ids(&cluster, 0).len(), ROWS as usize);
    assert_eq!(
        cluster.node(0).membership().table_range("orders").await.unwrap(),
        Some(HashRange::full(DEFAULT_HASH_SPACE))
    );
}

#[tokio::test]
async fn test_hot_send_only_on_leader() {
    let cluster = two_shards().await;
    let spec = TransferSpec::split("orders", HashRange::full(DEFAULT_HASH_SPACE)).unwrap();
    let err = cluster
        .node(2)
        .handle_hot_send(&cluster.addr(1), 1, &[spec])
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::Execution(_)));
}
