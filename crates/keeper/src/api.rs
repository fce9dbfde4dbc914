//! HTTP API
//!
//! Exposes an in-process [`Keeper`] to remote sessions.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tracing::debug;

use crate::memory::Keeper;
use crate::protocol::{
    ApiResponse, CreateNodeRequest, EventsQuery, NodeData, OpenSessionRequest, PathQuery,
    SessionInfo, SetNodeRequest,
};
use crate::store::SessionId;

/// Upper bound on a single long poll
const MAX_POLL: Duration = Duration::from_secs(30);

/// HTTP API service
pub struct HttpApi {
    keeper: Arc<Keeper>,
}

impl HttpApi {
    pub fn new(keeper: Arc<Keeper>) -> Self {
        Self { keeper }
    }

    pub fn router(self) -> Router {
        Router::new()
            // sessions
            .route("/v1/sessions", post(open_session))
            .route("/v1/sessions/:session_id", axum::routing::delete(close_session))
            .route("/v1/sessions/:session_id/keepalive", post(keepalive))
            // nodes
            .route(
                "/v1/nodes",
                get(get_node)
                    .post(create_node)
                    .put(set_node)
                    .delete(delete_node),
            )
            .route("/v1/children", get(children))
            // watch
            .route("/v1/events", get(events))
            .with_state(self.keeper)
    }
}

async fn open_session(
    State(keeper): State<Arc<Keeper>>,
    Json(req): Json<OpenSessionRequest>,
) -> impl IntoResponse {
    let ttl = req.ttl_ms.map(Duration::from_millis);
    let session_id = keeper.open_session(ttl);
    let info = SessionInfo {
        session_id,
        ttl_ms: ttl.unwrap_or(keeper.default_ttl()).as_millis() as u64,
        event_seq: keeper.current_seq(),
    };
    Json(ApiResponse::ok(info))
}

async fn keepalive(
    State(keeper): State<Arc<Keeper>>,
    Path(session_id): Path<SessionId>,
) -> impl IntoResponse {
    let result = keeper.keepalive(session_id).map(|ttl| ttl.as_millis() as u64);
    Json(ApiResponse::from(result))
}

async fn close_session(
    State(keeper): State<Arc<Keeper>>,
    Path(session_id): Path<SessionId>,
) -> impl IntoResponse {
    keeper.close_session(session_id);
    Json(ApiResponse::ok(()))
}

async fn create_node(
    State(keeper): State<Arc<Keeper>>,
    Json(req): Json<CreateNodeRequest>,
) -> impl IntoResponse {
    debug!("create {} ({:?}) by session {}", req.path, req.mode, req.session_id);
    let result = keeper.create(req.session_id, &req.path, &req.data, req.mode);
    Json(ApiResponse::from(result))
}

async fn get_node(
    State(keeper): State<Arc<Keeper>>,
    Query(query): Query<PathQuery>,
) -> impl IntoResponse {
    let result = keeper.get(&query.path).map(|data| NodeData { data });
    Json(ApiResponse::from(result))
}

async fn set_node(
    State(keeper): State<Arc<Keeper>>,
    Json(req): Json<SetNodeRequest>,
) -> impl IntoResponse {
    Json(ApiResponse::from(keeper.set(&req.path, &req.data)))
}

async fn delete_node(
    State(keeper): State<Arc<Keeper>>,
    Query(query): Query<PathQuery>,
) -> impl IntoResponse {
    Json(ApiResponse::from(keeper.delete(&query.path)))
}

async fn children(
    State(keeper): State<Arc<Keeper>>,
    Query(query): Query<PathQuery>,
) -> impl IntoResponse {
    Json(ApiResponse::from(keeper.children(&query.path)))
}

async fn events(
    State(keeper): State<Arc<Keeper>>,
    Query(query): Query<EventsQuery>,
) -> impl IntoResponse {
    let timeout = query
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(MAX_POLL)
        .min(MAX_POLL);
    let batch = keeper.wait_events(query.since, timeout).await;
    Json(ApiResponse::ok(batch))
}
