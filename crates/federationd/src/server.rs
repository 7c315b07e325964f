//! HTTP API: the peer sync endpoint plus local management routes

use crate::peers::{FederationNode, Peer, PeerError};
use crate::state::{FederatedState, FederationError, FederationStats};
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use federation_core::{NodeId, SyncAck, SyncMessage};
use federation_net::http::SYNC_PATH;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug)]
pub struct ApiError {
    pub status_code: StatusCode,
    pub message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status_code: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status_code: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<FederationError> for ApiError {
    fn from(err: FederationError) -> Self {
        let status_code = match &err {
            FederationError::Peer(PeerError::UnknownPeer(_)) => StatusCode::FORBIDDEN,
            FederationError::Peer(_) | FederationError::InvalidMessage(_) => {
                StatusCode::BAD_REQUEST
            }
            FederationError::Snapshot(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };
        Self {
            status_code,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code, Json(json!({ "error": self.message }))).into_response()
    }
}

pub fn router(state: Arc<FederatedState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(SYNC_PATH, post(sync))
        .route("/federation/peers", post(add_peer).get(peer_stats))
        .route("/federation/peers/list", get(list_peers))
        .route("/federation/peers/:id", delete(remove_peer))
        .route("/federation/threats", post(put_threat).get(get_threat))
        .route("/federation/rules", post(add_rule).get(list_rules))
        .route("/federation/rules/:id", delete(remove_rule))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

async fn health(State(state): State<Arc<FederatedState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "node_id": state.node_id(),
        "threat_intel_root": state.threat_intel_digest().root_hex(),
    }))
}

async fn sync(
    State(state): State<Arc<FederatedState>>,
    Json(message): Json<SyncMessage>,
) -> Result<Json<SyncAck>, ApiError> {
    let from = message.from_node.clone();
    state.handle_sync_message(message).map(Json).map_err(|e| {
        warn!("Rejected sync from {}: {}", from, e);
        ApiError::from(e)
    })
}

async fn add_peer(
    State(state): State<Arc<FederatedState>>,
    Json(node): Json<FederationNode>,
) -> Result<impl IntoResponse, ApiError> {
    let id = node.id.clone();
    state.add_peer(node)?;
    Ok((StatusCode::CREATED, Json(json!({ "status": "added", "id": id }))))
}

async fn peer_stats(State(state): State<Arc<FederatedState>>) -> Json<FederationStats> {
    Json(state.get_stats())
}

async fn list_peers(State(state): State<Arc<FederatedState>>) -> Json<Vec<Peer>> {
    Json(state.peers().list())
}

async fn remove_peer(
    State(state): State<Arc<FederatedState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.remove_peer(&NodeId::new(id.as_str())) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("Unknown peer: {id}")))
    }
}

async fn put_threat(
    State(state): State<Arc<FederatedState>>,
    Json(document): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let id = document
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::bad_request("Threat intel needs a string id"))?;
    state.update_threat_intel(id.as_str(), document);
    Ok((StatusCode::CREATED, Json(json!({ "status": "stored", "id": id }))))
}

#[derive(Debug, Deserialize)]
struct ThreatQuery {
    id: String,
}

async fn get_threat(
    State(state): State<Arc<FederatedState>>,
    Query(query): Query<ThreatQuery>,
) -> Result<Json<Value>, ApiError> {
    state
        .get_threat_intel(&query.id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("No threat intel for {}", query.id)))
}

#[derive(Debug, Deserialize)]
struct AddRule {
    rule_id: String,
}

#[derive(Debug, Serialize)]
struct RuleList {
    rules: Vec<String>,
    count: usize,
}

async fn add_rule(
    State(state): State<Arc<FederatedState>>,
    Json(body): Json<AddRule>,
) -> Result<impl IntoResponse, ApiError> {
    if body.rule_id.is_empty() {
        return Err(ApiError::bad_request("rule_id cannot be empty"));
    }
    let tag = state.add_detection_rule(body.rule_id.as_str());
    Ok((
        StatusCode::CREATED,
        Json(json!({ "status": "added", "rule_id": body.rule_id, "tag": tag })),
    ))
}

async fn list_rules(State(state): State<Arc<FederatedState>>) -> Json<RuleList> {
    let rules = state.get_active_rules();
    Json(RuleList {
        count: rules.len(),
        rules,
    })
}

async fn remove_rule(
    State(state): State<Arc<FederatedState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.remove_detection_rule(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("Unknown rule: {id}")))
    }
}
