mod common;

use common::{TestCluster, TestClusterConfig};
use tessel::{AckPolicy, JoinOutcome, SqlEngine, WriteKind};
use ts_core::protocol::SqlRequest;
use ts_core::{paths, ClusterError, HashRange, DEFAULT_HASH_SPACE};

const CREATE: &str = "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)";

async fn seeded(config: TestClusterConfig) -> TestCluster {
    let cluster = TestCluster::start(config).await;
    cluster.write(0, WriteKind::Create, "users", CREATE).await;
    for (id, name) in [(1, "ann"), (2, "bob"), (3, "cy")] {
        cluster
            .write(
                0,
                WriteKind::Update,
                "users",
                &format!("INSERT INTO users VALUES ({}, '{}')", id, name),
            )
            .await;
    }
    cluster
}

#[tokio::test]
async fn test_writes_converge_on_every_replica() {
    let cluster = seeded(TestClusterConfig::default()).await;
    assert_eq!(cluster.outcomes[0], JoinOutcome::Leader(0));
    assert_eq!(cluster.outcomes[1], JoinOutcome::Follower { shard: 0, slot: 0 });
    assert_eq!(cluster.outcomes[2], JoinOutcome::Follower { shard: 0, slot: 1 });

    let ack = cluster
        .write(0, WriteKind::Update, "users", "UPDATE users SET name = 'al' WHERE id = 1")
        .await;
    assert_eq!(ack.forwarded, 2);
    assert_eq!(ack.acknowledged, 2);
    assert_eq!(ack.checksum, cluster.checksum(0, "users"));

    for i in 1..3 {
        assert_eq!(cluster.checksum(i, "users"), cluster.checksum(0, "users"));
        assert_eq!(cluster.count(i, "users"), 3);
    }

    let membership = cluster.node(0).membership();
    assert!(membership.has_table("users").await.unwrap());
    assert_eq!(
        membership.table_range("users").await.unwrap(),
        Some(HashRange::full(DEFAULT_HASH_SPACE))
    );
}

#[tokio::test]
async fn test_create_and_drop_keep_registry_in_step() {
    let cluster = seeded(TestClusterConfig::default()).await;

    let err = cluster
        .node(0)
        .handle_write(WriteKind::Create, &SqlRequest::new(CREATE, "users"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::TableExists(_)));

    let err = cluster
        .node(0)
        .handle_write(
            WriteKind::Update,
            &SqlRequest::new("INSERT INTO ghosts VALUES (1)", "ghosts"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::TableNotFound(_)));

    cluster.write(0, WriteKind::Drop, "users", "DROP TABLE users").await;
    assert!(!cluster.node(0).membership().has_table("users").await.unwrap());
    for i in 0..3 {
        assert!(!cluster.node(i).engine().table_exists("users").unwrap());
    }
}

#[tokio::test]
async fn test_diverged_follower_is_repaired_from_leader() {
    let cluster = seeded(TestClusterConfig::default()).await;

    cluster
        .node(2)
        .engine()
        .execute("UPDATE users SET name = 'mallory' WHERE id = 2")
        .unwrap();
    assert_ne!(cluster.checksum(2, "users"), cluster.checksum(0, "users"));

    cluster
        .write(0, WriteKind::Update, "users", "INSERT INTO users VALUES (4, 'dee')")
        .await;
    assert_eq!(cluster.checksum(2, "users"), cluster.checksum(0, "users"));
    assert_eq!(cluster.count(2, "users"), 4);
}

#[tokio::test]
async fn test_follower_reports_repair() {
    let cluster = seeded(TestClusterConfig::default()).await;
    let expected = cluster.checksum(0, "users");

    cluster.node(1).engine().execute("DELETE FROM users WHERE id = 3").unwrap();
    let req = SqlRequest::new("UPDATE users SET name = name", "users").with_checksum(expected);
    let ack = cluster.node(1).handle_write(WriteKind::Update, &req).await.unwrap();
    assert!(ack.repaired);
    assert_eq!(ack.checksum, expected);

    let ack = cluster.node(1).handle_write(WriteKind::Update, &req).await.unwrap();
    assert!(!ack.repaired);
}

#[tokio::test]
async fn test_forwarding_continues_past_unreachable_follower() {
    let cluster = seeded(TestClusterConfig::default()).await;
    cluster.peers.set_down(&cluster.addr(1), true);

    let ack = cluster
        .write(0, WriteKind::Update, "users", "DELETE FROM users WHERE id = 1")
        .await;
    assert_eq!(ack.forwarded, 2);
    assert_eq!(ack.acknowledged, 1);
    assert_eq!(cluster.checksum(2, "users"), cluster.checksum(0, "users"));
    assert_eq!(cluster.count(1, "users"), 3);
}

#[tokio::test]
async fn test_all_policy_reports_missing_acks() {
    let cluster = seeded(TestClusterConfig {
        ack_policy: AckPolicy::All,
        ..Default::default()
    })
    .await;
    cluster.peers.set_down(&cluster.addr(2), true);

    let err = cluster
        .node(0)
        .handle_write(
            WriteKind::Update,
            &SqlRequest::new("INSERT INTO users VALUES (9, 'zed')", "users"),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClusterError::ReplicationUnderAcked {
            acknowledged: 1,
            required: 2
        }
    ));
    // the leader keeps its own write
    assert_eq!(cluster.count(0, "users"), 4);
}

#[tokio::test]
async fn test_under_acked_create_is_not_registered() {
    let cluster = TestCluster::start(TestClusterConfig {
        ack_policy: AckPolicy::All,
        ..Default::default()
    })
    .await;
    cluster.peers.set_down(&cluster.addr(2), true);

    let err = cluster
        .node(0)
        .handle_write(
            WriteKind::Create,
            &SqlRequest::new("CREATE TABLE audit (id INTEGER PRIMARY KEY)", "audit"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::ReplicationUnderAcked { .. }));
    assert!(!cluster.node(0).membership().has_table("audit").await.unwrap());
    assert!(cluster.keeper.get(&paths::table(0, "audit")).unwrap().is_none());
}

#[tokio::test]
async fn test_late_follower_copies_existing_tables() {
    let mut cluster = seeded(TestClusterConfig {
        nodes: 1,
        ..Default::default()
    })
    .await;

    let i = cluster.add_node().await;
    assert_eq!(cluster.outcomes[i], JoinOutcome::Follower { shard: 0, slot: 0 });
    assert_eq!(cluster.checksum(i, "users"), cluster.checksum(0, "users"));

    let ack = cluster
        .write(0, WriteKind::Update, "users", "INSERT INTO users VALUES (5, 'eve')")
        .await;
    assert_eq!(ack.acknowledged, 1);
    assert_eq!(cluster.count(i, "users"), 4);
}
