mod common;

use std::time::Duration;

use common::{wait_until, TestCluster, TestClusterConfig};
use tessel::{JoinOutcome, WriteKind};
use ts_core::{paths, ReplicaRole};

#[tokio::test]
async fn test_join_fills_leaders_before_followers() {
    let mut cluster = TestCluster::start(TestClusterConfig {
        nodes: 4,
        max_shards: 2,
        max_followers: 1,
        ..Default::default()
    })
    .await;

    assert_eq!(
        cluster.outcomes,
        vec![
            JoinOutcome::Leader(0),
            JoinOutcome::Leader(1),
            JoinOutcome::Follower { shard: 0, slot: 0 },
            JoinOutcome::Follower { shard: 1, slot: 0 },
        ]
    );

    let extra = cluster.add_node().await;
    assert_eq!(cluster.outcomes[extra], JoinOutcome::Idle);
    assert_eq!(cluster.node(extra).membership().role(), None);
}

#[tokio::test]
async fn test_follower_takes_over_after_leader_leaves() {
    let cluster = TestCluster::start(TestClusterConfig::default()).await;
    cluster
        .write(0, WriteKind::Create, "kv", "CREATE TABLE kv (k TEXT PRIMARY KEY, v TEXT)")
        .await;

    cluster.node(0).shutdown().await;
    assert!(
        wait_until(Duration::from_secs(2), || {
            let leaders = cluster.leaders_of(0);
            leaders.len() == 1 && leaders[0] != 0
        })
        .await,
        "no follower took over"
    );

    let leader = cluster.leaders_of(0)[0];
    let ack = cluster
        .write(leader, WriteKind::Update, "kv", "INSERT INTO kv VALUES ('a', '1')")
        .await;
    // the promoted node gave up its follower slot
    assert_eq!(ack.forwarded, 1);
    assert_eq!(ack.acknowledged, 1);

    let followers = cluster.node(leader).membership().follower_addresses().await.unwrap();
    assert_eq!(followers.len(), 1);
    assert!(!followers.contains(&cluster.addr(leader)));
}

#[tokio::test]
async fn test_expired_leader_session_yields_single_leader() {
    let cluster = TestCluster::start(TestClusterConfig::default()).await;
    cluster.keeper.expire_session(cluster.session(0));

    let settled = wait_until(Duration::from_secs(3), || {
        let leaders = cluster.leaders_of(0);
        leaders.len() == 1
            && cluster.keeper.is_alive(cluster.session(0))
            && cluster.keeper.get(&paths::leader(0)).ok().flatten()
                == Some(cluster.addr(leaders[0]))
            && cluster
                .nodes
                .iter()
                .all(|n| n.membership().role().is_some() && n.membership().ready().is_ready())
    })
    .await;
    assert!(settled, "cluster did not settle after session loss");

    let leader = cluster.leaders_of(0)[0];
    let registered = cluster.keeper.get(&paths::leader(0)).unwrap();
    assert_eq!(registered, Some(cluster.addr(leader)));

    let followers: Vec<_> = cluster
        .nodes
        .iter()
        .filter(|n| n.membership().role() == Some(ReplicaRole::Follower))
        .collect();
    assert_eq!(followers.len(), 2);
}

#[tokio::test]
async fn test_clean_exit_frees_follower_slot() {
    let mut cluster = TestCluster::start(TestClusterConfig::default()).await;
    cluster.node(1).shutdown().await;

    let store_view = cluster.keeper.children(&paths::followers_dir(0)).unwrap();
    assert_eq!(store_view, vec!["f1".to_string()]);
    assert_eq!(
        cluster.keeper.get(&paths::follower_count(0)).unwrap(),
        Some("1".to_string())
    );

    let i = cluster.add_node().await;
    assert_eq!(cluster.outcomes[i], JoinOutcome::Follower { shard: 0, slot: 0 });
}
