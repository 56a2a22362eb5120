use crate::error::ApiError;
use crate::peers::Fetched;
use crate::state::{AppState, Core};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use timelock_core::consensus::PeerChain;
use timelock_core::message::{MessageStatus, MessageType, NewMessage};
use timelock_core::LedgerError;
use tower_http::trace::TraceLayer;
use tracing::info;

type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/chain", get(chain))
        .route("/chain/head", get(head))
        .route("/chain/stats", get(stats))
        .route("/chain/valid", get(valid))
        .route("/messages", post(submit_message).get(list_messages))
        .route("/messages/{id}", axum::routing::delete(delete_message))
        .route("/messages/{id}/reveal", post(reveal_message))
        .route("/messages/{id}/status", put(set_status))
        .route("/mine", post(mine))
        .route("/mine/abort", post(abort_mine))
        .route("/nodes", post(register_nodes))
        .route("/nodes/resolve", post(resolve_nodes))
        .route("/contracts", post(deploy_contract))
        .route("/contracts/{name}/execute", post(execute_contract))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run `work` under the write lock on a blocking thread; record stores,
/// blobs and the snapshot file are synchronous.
async fn with_core<T, F>(state: &AppState, work: F) -> ApiResult<T>
where
    F: FnOnce(&mut Core) -> timelock_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let core = state.core.clone();
    tokio::task::spawn_blocking(move || work(&mut core.write()))
        .await
        .map_err(|e| LedgerError::collaborator("blocking task", anyhow::Error::new(e)))?
        .map_err(ApiError::from)
}

/// Same as `with_core` under the read lock.
async fn read_core<T, F>(state: &AppState, work: F) -> ApiResult<T>
where
    F: FnOnce(&Core) -> timelock_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let core = state.core.clone();
    tokio::task::spawn_blocking(move || work(&core.read()))
        .await
        .map_err(|e| LedgerError::collaborator("blocking task", anyhow::Error::new(e)))?
        .map_err(ApiError::from)
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

async fn chain(State(state): State<AppState>) -> Json<PeerChain> {
    Json(PeerChain::from_blocks(state.core.read().ledger.chain().blocks()))
}

#[derive(Serialize)]
struct Head {
    height: u64,
    hash: String,
    pending: usize,
}

async fn head(State(state): State<AppState>) -> ApiResult<Json<Head>> {
    let core = state.core.read();
    let chain = core.ledger.chain();
    let tip = chain.latest_block()?;
    Ok(Json(Head {
        height: tip.index,
        hash: tip.hash.clone(),
        pending: chain.pending().len(),
    }))
}

async fn stats(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.core.read().ledger.stats()))
}

async fn valid(State(state): State<AppState>) -> Json<Value> {
    let first_invalid = state.core.read().ledger.chain().first_invalid_block();
    Json(json!({ "valid": first_invalid.is_none(), "first_invalid": first_invalid }))
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Encoding {
    #[default]
    Utf8,
    Base64,
}

#[derive(Deserialize)]
struct MessageIn {
    sender: String,
    receiver: String,
    #[serde(default = "text")]
    message_type: MessageType,
    unlock_time: DateTime<Utc>,
    content: String,
    #[serde(default)]
    encoding: Encoding,
    file_name: Option<String>,
    /// Seal the message right away instead of waiting for `/mine`.
    #[serde(default)]
    mine: bool,
}

fn text() -> MessageType {
    MessageType::Text
}

async fn submit_message(
    State(state): State<AppState>,
    Json(input): Json<MessageIn>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let content = match input.encoding {
        Encoding::Utf8 => input.content.into_bytes(),
        Encoding::Base64 => base64::decode(&input.content)
            .map_err(|e| ApiError::BadRequest(format!("content is not base64: {e}")))?,
    };
    let message = NewMessage {
        sender: input.sender,
        receiver: input.receiver,
        message_type: input.message_type,
        unlock_time: input.unlock_time,
        content,
        file_name: input.file_name,
    };

    let record = with_core(&state, move |core| {
        let Core { ledger, gate, .. } = core;
        gate.commit(ledger, message)
    })
    .await?;
    let block = if input.mine {
        Some(state.miner.mine(&state.core).await?)
    } else {
        None
    };

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message_id": record.id,
            "unlock_time": record.unlock_time,
            "status": record.status,
            "block": block.map(|b| json!({ "index": b.index, "hash": b.hash })),
        })),
    ))
}

#[derive(Deserialize)]
struct ParticipantQuery {
    participant: String,
}

async fn list_messages(
    State(state): State<AppState>,
    Query(query): Query<ParticipantQuery>,
) -> ApiResult<Json<Value>> {
    let messages = read_core(&state, move |core| {
        core.gate.list_for(core.ledger.chain(), &query.participant)
    })
    .await?;
    Ok(Json(json!({ "messages": messages })))
}

#[derive(Deserialize)]
struct Requester {
    requester: String,
}

async fn reveal_message(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(body): Json<Requester>,
) -> ApiResult<Json<Value>> {
    let revealed = with_core(&state, move |core| {
        let Core { ledger, gate, .. } = core;
        gate.reveal(ledger.chain(), id, &body.requester)
    })
    .await?;

    let (encoding, content) = match String::from_utf8(revealed.content) {
        Ok(text) if !revealed.message_type.is_binary() => ("utf8", text),
        Ok(text) => ("base64", base64::encode(text.as_bytes())),
        Err(e) => ("base64", base64::encode(e.as_bytes())),
    };
    Ok(Json(json!({
        "id": revealed.id,
        "message_type": revealed.message_type,
        "encoding": encoding,
        "content": content,
        "already_revealed": revealed.already_revealed,
        "block_index": revealed.block_index,
        "block_hash": revealed.block_hash,
    })))
}

#[derive(Deserialize)]
struct StatusIn {
    requester: String,
    status: MessageStatus,
}

async fn set_status(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(body): Json<StatusIn>,
) -> ApiResult<Json<Value>> {
    let status = with_core(&state, move |core| {
        let Core { ledger, gate, .. } = core;
        gate.set_status(ledger.chain(), id, &body.requester, body.status)
    })
    .await?;
    Ok(Json(json!({ "id": id, "status": status })))
}

async fn delete_message(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(query): Query<Requester>,
) -> ApiResult<StatusCode> {
    with_core(&state, move |core| core.gate.delete(id, &query.requester)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn mine(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    match state.miner.mine(&state.core).await {
        Ok(block) => Ok(Json(json!({ "mined": true, "block": block }))),
        Err(LedgerError::NoPendingWork) => Ok(Json(json!({
            "mined": false,
            "reason": LedgerError::NoPendingWork.to_string(),
        }))),
        Err(e) => Err(e.into()),
    }
}

async fn abort_mine(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "aborted": state.miner.abort() }))
}

#[derive(Deserialize)]
struct NodesIn {
    nodes: Vec<String>,
}

async fn register_nodes(
    State(state): State<AppState>,
    Json(body): Json<NodesIn>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if body.nodes.is_empty() {
        return Err(ApiError::BadRequest("supply a non-empty list of nodes".into()));
    }
    let (added, total) = with_core(&state, move |core| {
        let mut added = 0;
        for node in body.nodes {
            if core.ledger.register_node(node)? {
                added += 1;
            }
        }
        let total: Vec<String> = core.ledger.chain().nodes().map(str::to_string).collect();
        Ok((added, total))
    })
    .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "added": added, "total_nodes": total })),
    ))
}

async fn resolve_nodes(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let peers: Vec<String> = state
        .core
        .read()
        .ledger
        .chain()
        .nodes()
        .map(str::to_string)
        .collect();
    let fetched = Fetched::from_peers(&state.http, peers).await;

    let (replaced, length) = with_core(&state, move |core| {
        let replaced = core.ledger.resolve_conflicts(&fetched)?;
        Ok((replaced, core.ledger.chain().len()))
    })
    .await?;
    if replaced && state.miner.abort() {
        info!("in-flight mine cancelled by chain replacement");
    }
    Ok(Json(json!({ "replaced": replaced, "length": length })))
}

#[derive(Deserialize)]
struct ContractIn {
    name: String,
    code: String,
}

async fn deploy_contract(
    State(state): State<AppState>,
    Json(body): Json<ContractIn>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let (name, code) = (body.name.clone(), body.code);
    let address = with_core(&state, move |core| {
        let Core {
            ledger, contracts, ..
        } = core;
        ledger.deploy_contract(contracts, &code, &name)
    })
    .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "name": body.name, "address": address })),
    ))
}

#[derive(Deserialize)]
struct CallIn {
    function: String,
    #[serde(default)]
    args: Vec<Value>,
}

async fn execute_contract(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<CallIn>,
) -> ApiResult<Json<Value>> {
    let core = state.core.read();
    let result = core
        .ledger
        .execute_contract(&core.contracts, &name, &body.function, &body.args)?;
    Ok(Json(json!({ "result": result })))
}
