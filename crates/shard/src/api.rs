//! Shard node HTTP API
//!
//! Every reply is a `{status, message, data}` envelope with HTTP 200.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tracing::info;
use ts_core::protocol::{
    HotSendParams, SqlBatchRequest, SqlRequest, TableRequest, TransferSpec, VisitCount,
    VoteResponse,
};
use ts_core::{ApiResult, ClusterError, StatusCode};

use crate::node::ShardNode;
use crate::replication::WriteKind;

/// HTTP API service
pub struct HttpApi {
    node: Arc<ShardNode>,
}

impl HttpApi {
    pub fn new(node: Arc<ShardNode>) -> Self {
        Self { node }
    }

    pub fn router(self) -> Router {
        Router::new()
            // writes
            .route("/create", post(create))
            .route("/drop", post(drop_table))
            .route("/update", post(update))
            .route("/updateBatch", post(update_batch))
            // reads
            .route("/query", post(query))
            .route("/votequery", post(vote_query))
            .route("/dump", post(dump))
            // migration
            .route("/hotsend", post(hot_send))
            // load
            .route("/visiting", post(visiting).get(visiting))
            .route("/visitingClear", post(visiting_clear))
            .route("/status", get(status))
            .with_state(self.node)
    }
}

fn reply<T>(result: Result<T, ClusterError>) -> Json<ApiResult<T>> {
    Json(match result {
        Ok(data) => ApiResult::ok(data),
        Err(e) => ApiResult::from(e),
    })
}

async fn create(State(node): State<Arc<ShardNode>>, Json(req): Json<SqlRequest>) -> impl IntoResponse {
    reply(node.handle_write(WriteKind::Create, &req).await)
}

async fn drop_table(
    State(node): State<Arc<ShardNode>>,
    Json(req): Json<SqlRequest>,
) -> impl IntoResponse {
    reply(node.handle_write(WriteKind::Drop, &req).await)
}

async fn update(State(node): State<Arc<ShardNode>>, Json(req): Json<SqlRequest>) -> impl IntoResponse {
    reply(node.handle_write(WriteKind::Update, &req).await)
}

async fn update_batch(
    State(node): State<Arc<ShardNode>>,
    Json(req): Json<SqlBatchRequest>,
) -> impl IntoResponse {
    reply(node.handle_batch(&req).await)
}

async fn query(State(node): State<Arc<ShardNode>>, Json(req): Json<SqlRequest>) -> impl IntoResponse {
    reply(node.handle_query(&req).await)
}

async fn vote_query(
    State(node): State<Arc<ShardNode>>,
    Json(req): Json<SqlRequest>,
) -> impl IntoResponse {
    reply(node.handle_vote(&req).map(|checksum| VoteResponse { checksum }))
}

async fn dump(State(node): State<Arc<ShardNode>>, Json(req): Json<TableRequest>) -> impl IntoResponse {
    match node.handle_dump(&req.table_name) {
        Ok(Some(dump)) => Json(ApiResult::ok(dump)),
        Ok(None) => Json(ApiResult {
            status: StatusCode::Ok.code(),
            message: format!("table {} not present", req.table_name),
            data: None,
        }),
        Err(e) => Json(ApiResult::from(e)),
    }
}

async fn hot_send(
    State(node): State<Arc<ShardNode>>,
    Query(params): Query<HotSendParams>,
    Json(specs): Json<Vec<TransferSpec>>,
) -> impl IntoResponse {
    info!(
        "Hot send of {} tables to {} (shard {})",
        specs.len(),
        params.target_addr,
        params.target_shard_id
    );
    match node
        .handle_hot_send(&params.target_addr, params.target_shard_id, &specs)
        .await
    {
        Ok(report) if report.is_complete() => Json(ApiResult::ok(report)),
        Ok(report) => {
            let message = format!("{} of {} tables failed", report.failed.len(), specs.len());
            Json(ApiResult::err_with(
                StatusCode::MigrationPartialFailure,
                message,
                report,
            ))
        }
        Err(e) => Json(ApiResult::from(e)),
    }
}

async fn visiting(State(node): State<Arc<ShardNode>>) -> impl IntoResponse {
    Json(ApiResult::ok(VisitCount {
        visit_count: node.visit_count(),
    }))
}

async fn visiting_clear(State(node): State<Arc<ShardNode>>) -> impl IntoResponse {
    Json(ApiResult::ok(VisitCount {
        visit_count: node.clear_visits(),
    }))
}

async fn status(State(node): State<Arc<ShardNode>>) -> impl IntoResponse {
    Json(ApiResult::ok(node.status()))
}
