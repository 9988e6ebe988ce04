/// HTTP API for the key-value store.
///
/// Every route here is also used for inter-node traffic: gossip, shard
/// transfer, and view-change propagation all travel over the same router
/// a client would hit, just on routes under `/kvs/` that a client has no
/// reason to call directly.
///
/// # API Endpoints
///
/// - `GET /kvs/keys/:key` - read a value
/// - `PUT /kvs/keys/:key` - write a value
/// - `DELETE /kvs/keys/:key` - tombstone a value
/// - `PUT /kvs/view-change` - client-triggered view change
/// - `PUT /kvs/view-change-propagate` - leader-to-follower view install
/// - `PUT /kvs/shard` - absorb a shard transferred during a view-change
/// - `PUT /kvs/gossip` - absorb a gossiped shard
/// - `GET /kvs/key-count` - number of live keys on this node
/// - `GET /kvs/shards` - membership of every shard
/// - `GET /kvs/shards/:id` - membership of one shard
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::distributor::Distributor;
use crate::error::KvsError;
use crate::types::{CausalContext, Shard};

impl IntoResponse for KvsError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "error": self.wire_code(),
            "message": self.to_string(),
        }));
        (self.status_code(), body).into_response()
    }
}

pub fn router(distributor: Arc<Distributor>) -> Router {
    Router::new()
        .route("/kvs/keys/:key", get(handle_get).put(handle_put).delete(handle_delete))
        .route("/kvs/view-change", put(handle_view_change))
        .route("/kvs/view-change-propagate", put(handle_view_change_propagate))
        .route("/kvs/shard", put(handle_shard_transfer))
        .route("/kvs/gossip", put(handle_gossip))
        .route("/kvs/key-count", get(handle_key_count))
        .route("/kvs/shards", get(handle_shards))
        .route("/kvs/shards/:id", get(handle_shard_by_id))
        .with_state(distributor)
}

#[derive(Debug, Deserialize)]
struct KeyRequestBody {
    #[serde(default, rename = "causal-context")]
    causal_context: CausalContext,
    value: Option<String>,
    /// Set by a peer's causal probe: answer with `last_write` instead of
    /// running a causal check and returning the value.
    #[serde(default)]
    probe: bool,
}

#[derive(Debug, Serialize)]
struct ProbeResponse {
    last_write: Option<f64>,
}

#[derive(Debug, Serialize)]
struct KeyResponse {
    value: Option<String>,
    #[serde(rename = "causal-context")]
    causal_context: CausalContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<String>,
}

async fn handle_get(
    State(distributor): State<Arc<Distributor>>,
    Path(key): Path<String>,
    body: Option<Json<KeyRequestBody>>,
) -> Result<Response, KvsError> {
    let body = body.map(|b| b.0).unwrap_or(KeyRequestBody {
        causal_context: CausalContext::empty(),
        value: None,
        probe: false,
    });

    if body.probe {
        let last_write = distributor.peek_last_write(&key).await?;
        return Ok(Json(ProbeResponse { last_write }).into_response());
    }

    let entry = distributor.get(&key, &body.causal_context).await?;
    let new_ctx = body.causal_context.with_appended(key, entry.context());
    Ok(Json(KeyResponse {
        value: entry.value,
        causal_context: new_ctx,
        address: None,
    })
    .into_response())
}

#[derive(Debug, Serialize)]
struct PutResponse {
    #[serde(rename = "causal-context")]
    causal_context: CausalContext,
}

async fn handle_put(
    State(distributor): State<Arc<Distributor>>,
    Path(key): Path<String>,
    Json(body): Json<KeyRequestBody>,
) -> Result<(StatusCode, Json<PutResponse>), KvsError> {
    let value = body.value.ok_or(KvsError::ValueMissing)?;
    let outcome = distributor.put(&key, value, &body.causal_context).await?;
    let ctx = body.causal_context.with_appended(key, outcome.entry.context());
    let status = if outcome.created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(PutResponse { causal_context: ctx })))
}

async fn handle_delete(
    State(distributor): State<Arc<Distributor>>,
    Path(key): Path<String>,
    body: Option<Json<KeyRequestBody>>,
) -> Result<Json<PutResponse>, KvsError> {
    let ctx = body.map(|b| b.0.causal_context).unwrap_or_default();
    let entry = distributor.delete(&key, &ctx).await?;
    let new_ctx = ctx.with_appended(key, entry.context());
    Ok(Json(PutResponse { causal_context: new_ctx }))
}

#[derive(Debug, Deserialize)]
struct ViewChangeRequest {
    view: String,
    #[serde(rename = "repl-factor")]
    repl_factor: usize,
}

async fn handle_view_change(
    State(distributor): State<Arc<Distributor>>,
    Json(body): Json<ViewChangeRequest>,
) -> Result<Json<serde_json::Value>, KvsError> {
    let ips: Vec<String> = body.view.split(',').map(|s| s.trim().to_string()).collect();
    let infos = distributor.change_view(ips, body.repl_factor, true).await?;
    Ok(Json(serde_json::json!({
        "shards": infos.iter().map(|i| serde_json::json!({
            "shard-id": i.shard_id,
            "key-count": i.key_count,
            "replicas": i.replicas,
        })).collect::<Vec<_>>(),
    })))
}

#[derive(Debug, Deserialize)]
struct ViewChangePropagateRequest {
    view: Vec<String>,
    #[serde(rename = "repl-factor")]
    repl_factor: usize,
}

async fn handle_view_change_propagate(
    State(distributor): State<Arc<Distributor>>,
    Json(body): Json<ViewChangePropagateRequest>,
) -> Result<Json<serde_json::Value>, KvsError> {
    let shard_before_change = distributor.snapshot().await;
    distributor.change_view(body.view, body.repl_factor, false).await?;
    Ok(Json(serde_json::json!({ "kvs": shard_before_change })))
}

#[derive(Debug, Deserialize)]
struct ShardTransferRequest {
    #[serde(rename = "bucket_id")]
    _bucket_id: usize,
    shard: Shard,
}

async fn handle_shard_transfer(
    State(distributor): State<Arc<Distributor>>,
    Json(body): Json<ShardTransferRequest>,
) -> Result<StatusCode, KvsError> {
    distributor.install_shard(body.shard).await;
    Ok(StatusCode::OK)
}

async fn handle_gossip(
    State(distributor): State<Arc<Distributor>>,
    Json(shard): Json<Shard>,
) -> Result<StatusCode, KvsError> {
    distributor.merge_shard(&shard).await;
    Ok(StatusCode::OK)
}

#[derive(Debug, Serialize, Deserialize)]
struct KeyCountResponse {
    key_count: usize,
}

async fn handle_key_count(State(distributor): State<Arc<Distributor>>) -> Json<KeyCountResponse> {
    Json(KeyCountResponse { key_count: distributor.key_count().await })
}

#[derive(Debug, Serialize)]
struct ShardsResponse {
    message: &'static str,
    shards: Vec<usize>,
}

async fn handle_shards(State(distributor): State<Arc<Distributor>>) -> Json<ShardsResponse> {
    let infos = distributor.shard_info().await;
    Json(ShardsResponse {
        message: "shard membership retrieved successfully",
        shards: infos.iter().map(|i| i.shard_id).collect(),
    })
}

#[derive(Debug, Serialize)]
struct ShardResponse {
    message: &'static str,
    #[serde(rename = "shard-id")]
    shard_id: usize,
    #[serde(rename = "key-count")]
    key_count: usize,
    replicas: Vec<String>,
}

async fn handle_shard_by_id(
    State(distributor): State<Arc<Distributor>>,
    Path(id): Path<usize>,
) -> Result<Json<ShardResponse>, KvsError> {
    let infos = distributor.shard_info().await;
    let info = infos
        .into_iter()
        .find(|i| i.shard_id == id)
        .ok_or_else(|| KvsError::InvalidView(format!("no such shard: {id}")))?;
    Ok(Json(ShardResponse {
        message: "shard membership retrieved successfully",
        shard_id: info.shard_id,
        key_count: info.key_count,
        replicas: info.replicas,
    }))
}
