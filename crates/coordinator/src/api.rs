//! Coordinator HTTP API
//!
//! Routing answers carry the selected `hostNames`; clients then talk to the
//! shard nodes directly.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use tracing::info;
use ts_core::protocol::HostNames;
use ts_core::{ApiResult, ClusterError};

use crate::router::Operation;
use crate::Coordinator;

/// HTTP API service
pub struct HttpApi {
    coordinator: Arc<Coordinator>,
}

impl HttpApi {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }

    pub fn router(self) -> Router {
        Router::new()
            // routing
            .route("/create_table", post(create_table))
            .route("/query_table", post(query_table))
            .route("/insert", post(insert))
            .route("/update", post(update))
            .route("/delete", post(delete))
            .route("/drop_table", post(drop_table))
            // cluster
            .route("/meta_info", post(meta_info).get(meta_info))
            .route("/rebalance", post(rebalance))
            .with_state(self.coordinator)
    }
}

// ==================== Request types ====================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableParams {
    table_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertParams {
    table_name: String,
    pk_value: String,
}

// ==================== Handlers ====================

fn hosts(result: Result<Vec<String>, ClusterError>) -> Json<ApiResult<HostNames>> {
    Json(match result {
        Ok(host_names) => ApiResult::ok(HostNames { host_names }),
        Err(e) => ApiResult::from(e),
    })
}

async fn create_table(
    State(coordinator): State<Arc<Coordinator>>,
    Query(params): Query<TableParams>,
) -> impl IntoResponse {
    info!("Request create table '{}'", params.table_name);
    hosts(coordinator.router().route(Operation::Create, &params.table_name))
}

async fn query_table(
    State(coordinator): State<Arc<Coordinator>>,
    Query(params): Query<TableParams>,
) -> impl IntoResponse {
    info!("Request query table '{}'", params.table_name);
    hosts(coordinator.router().route(Operation::Query, &params.table_name))
}

async fn insert(
    State(coordinator): State<Arc<Coordinator>>,
    Query(params): Query<InsertParams>,
) -> impl IntoResponse {
    info!("Request insert into '{}'", params.table_name);
    hosts(coordinator.router().route(
        Operation::Insert {
            key: &params.pk_value,
        },
        &params.table_name,
    ))
}

async fn update(
    State(coordinator): State<Arc<Coordinator>>,
    Query(params): Query<TableParams>,
) -> impl IntoResponse {
    info!("Request update table '{}'", params.table_name);
    hosts(coordinator.router().route(Operation::Update, &params.table_name))
}

async fn delete(
    State(coordinator): State<Arc<Coordinator>>,
    Query(params): Query<TableParams>,
) -> impl IntoResponse {
    info!("Request delete from '{}'", params.table_name);
    hosts(coordinator.router().route(Operation::Delete, &params.table_name))
}

async fn drop_table(
    State(coordinator): State<Arc<Coordinator>>,
    Query(params): Query<TableParams>,
) -> impl IntoResponse {
    info!("Request drop table '{}'", params.table_name);
    hosts(coordinator.router().route(Operation::Drop, &params.table_name))
}

async fn meta_info(State(coordinator): State<Arc<Coordinator>>) -> impl IntoResponse {
    Json(ApiResult::ok(coordinator.catalog().snapshot()))
}

async fn rebalance(State(coordinator): State<Arc<Coordinator>>) -> impl IntoResponse {
    info!("Rebalance requested");
    Json(match coordinator.rebalancer().run_once().await {
        Ok(outcome) => ApiResult::ok(outcome),
        Err(e) => ApiResult::from(e),
    })
}
