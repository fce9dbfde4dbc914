mod common;

use std::sync::Arc;

use common::{TestCluster, TestClusterConfig};
use tessel::api::HttpApi;
use tessel::{ShardNode, WriteKind};
use ts_core::protocol::{QueryResult, SqlBatchRequest, SqlRequest, VisitCount, VoteResponse};
use ts_core::{ApiResult, StatusCode};

const CREATE: &str = "CREATE TABLE stock (sku TEXT PRIMARY KEY, qty INTEGER)";

fn visits(cluster: &TestCluster) -> Vec<u64> {
    cluster.nodes.iter().map(|n| n.visit_count()).collect()
}

fn clear_all(cluster: &TestCluster) {
    for node in &cluster.nodes {
        node.clear_visits();
    }
}

/// Serve one node's API on an ephemeral port
async fn serve(node: Arc<ShardNode>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = HttpApi::new(node).router();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_client_write_counts_once_per_shard() {
    let cluster = TestCluster::start(TestClusterConfig::default()).await;
    clear_all(&cluster);

    let ack = cluster.write(0, WriteKind::Create, "stock", CREATE).await;
    assert_eq!(ack.acknowledged, 2);
    assert_eq!(visits(&cluster), vec![1, 0, 0]);
    assert_eq!(visits(&cluster).iter().sum::<u64>(), 1);
}

#[tokio::test]
async fn test_only_client_operations_count() {
    let cluster = TestCluster::start(TestClusterConfig::default()).await;
    cluster.write(0, WriteKind::Create, "stock", CREATE).await;
    clear_all(&cluster);

    cluster
        .write(0, WriteKind::Update, "stock", "INSERT INTO stock VALUES ('a', 1)")
        .await;
    // batches are the migration copy path
    let batch = SqlBatchRequest {
        sql_list: vec!["INSERT INTO stock VALUES ('b', 2)".to_string()],
        table_name: "stock".to_string(),
        checksum: None,
    };
    cluster.node(0).handle_batch(&batch).await.unwrap();
    // the query counts where it is served; the votes it gathers do not
    let result = cluster
        .node(1)
        .handle_query(&SqlRequest::new("SELECT * FROM stock ORDER BY sku", "stock"))
        .await
        .unwrap();
    assert_eq!(result.rows.len(), 2);
    cluster
        .node(2)
        .handle_vote(&SqlRequest::new("SELECT * FROM stock ORDER BY sku", "stock"))
        .unwrap();

    assert_eq!(visits(&cluster), vec![1, 1, 0]);
    assert_eq!(visits(&cluster).iter().sum::<u64>(), 2);
}

#[tokio::test]
async fn test_visit_endpoints() {
    let cluster = TestCluster::start(TestClusterConfig::default()).await;
    let base = serve(cluster.node(0).clone()).await;
    let client = reqwest::Client::new();
    cluster.node(0).clear_visits();

    let created: ApiResult<serde_json::Value> = client
        .post(format!("{}/create", base))
        .json(&SqlRequest::new(CREATE, "stock"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(created.is_ok(), "{}", created.message);

    for sku in ["a", "b"] {
        let sql = format!("INSERT INTO stock VALUES ('{}', 1)", sku);
        let reply: ApiResult<serde_json::Value> = client
            .post(format!("{}/update", base))
            .json(&SqlRequest::new(sql, "stock"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(reply.is_ok(), "{}", reply.message);
    }

    let queried: ApiResult<QueryResult> = client
        .post(format!("{}/query", base))
        .json(&SqlRequest::new("SELECT * FROM stock", "stock"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(queried.data.unwrap().rows.len(), 2);

    // neither internal endpoint counts
    let vote: ApiResult<VoteResponse> = client
        .post(format!("{}/votequery", base))
        .json(&SqlRequest::new("SELECT * FROM stock", "stock"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(vote.is_ok());
    let missing: ApiResult<serde_json::Value> = client
        .post(format!("{}/update", base))
        .json(&SqlRequest::new("DELETE FROM ghost", "ghost"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(missing.status_code(), StatusCode::TableNotExist);

    // create, two updates, one query, one rejected update
    let count: ApiResult<VisitCount> = client
        .get(format!("{}/visiting", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(count.data.unwrap().visit_count, 5);

    let cleared: ApiResult<VisitCount> = client
        .post(format!("{}/visitingClear", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cleared.data.unwrap().visit_count, 5);

    let count: ApiResult<VisitCount> = client
        .post(format!("{}/visiting", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(count.data.unwrap().visit_count, 0);
    assert_eq!(cluster.node(0).visit_count(), 0);
}
