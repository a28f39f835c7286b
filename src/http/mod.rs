use std::{collections::BTreeMap, sync::Arc};

use axum::{
    Json, Router,
    extract::{FromRequest, Path, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    membership::{MembershipController, MembershipError},
    raft::{app::ConsensusHandle, types::NodeId},
    router::{CommandRouter, KvError},
};

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<CommandRouter>,
    pub membership: Arc<MembershipController>,
    pub consensus: Arc<dyn ConsensusHandle>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<KvError> for ApiError {
    fn from(value: KvError) -> Self {
        match value {
            KvError::NotLeader => ApiError::service_unavailable("not the leader"),
            KvError::Engine(_) => ApiError::internal(value.to_string()),
            KvError::EmptyKey
            | KvError::ApplyFailed(_)
            | KvError::InternalShape
            | KvError::DecodeFailed(_) => ApiError::bad_request(value.to_string()),
        }
    }
}

impl From<MembershipError> for ApiError {
    fn from(value: MembershipError) -> Self {
        match value {
            MembershipError::NotLeader => ApiError::service_unavailable("not the leader"),
            MembershipError::UnknownNode(_) => ApiError::bad_request(value.to_string()),
            MembershipError::Raft(_) => ApiError::internal(value.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({"error": self.message}))).into_response()
    }
}

pub struct ApiJson<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    axum::Json<T>: FromRequest<S>,
    <axum::Json<T> as FromRequest<S>>::Rejection: std::fmt::Display,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = axum::Json::<T>::from_request(req, state)
            .await
            .map_err(|_| ApiError::bad_request("invalid request body"))?;
        Ok(Self(value))
    }
}

pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/v1/kv/:key",
            get(kv_get).put(kv_set).delete(kv_delete),
        )
        .route("/api/v1/raft/join", post(raft_join))
        .route("/api/v1/raft/drop", post(raft_drop))
        .route("/api/v1/raft/stat", get(raft_stat))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
}

async fn health() -> Json<StatusResponse> {
    Json(StatusResponse { status: "ok" })
}

async fn kv_get(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let Some(value) = state.router.get(&key).await? else {
        return Err(ApiError::not_found("key not found"));
    };
    Ok(Json(json!({"key": key, "value": value})))
}

async fn kv_set(
    State(state): State<AppState>,
    Path(key): Path<String>,
    ApiJson(value): ApiJson<Value>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.router.set(&key, value).await?;
    Ok(Json(StatusResponse { status: "ok" }))
}

async fn kv_delete(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.router.delete(&key).await?;
    Ok(Json(StatusResponse { status: "ok" }))
}

#[derive(Debug, Deserialize)]
struct JoinRequest {
    #[serde(rename = "NodeID")]
    node_id: NodeId,
    #[serde(rename = "RaftAddress")]
    raft_address: String,
}

#[derive(Debug, Deserialize)]
struct DropRequest {
    #[serde(rename = "NodeID")]
    node_id: NodeId,
}

#[derive(Serialize)]
struct SuccessResponse {
    success: bool,
}

async fn raft_join(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<JoinRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    state.membership.join(req.node_id, req.raft_address).await?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn raft_drop(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<DropRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    state.membership.drop_node(req.node_id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn raft_stat(State(state): State<AppState>) -> Json<BTreeMap<String, String>> {
    Json(state.consensus.stats())
}

#[cfg(test)]
mod tests;
