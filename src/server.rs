//! HTTP and websocket API.
//!
//! REST endpoints cover health, config, document management and
//! introspection; the `/ws` duplex channel carries chunked uploads in
//! and status reports, query results and answer tokens out.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;

use crate::config::Settings;
use crate::error::VerbaError;
use crate::ingest::IngestionPipeline;
use crate::models::StatusReport;
use crate::query::{QueryRequest, QueryResult, RetrievalPipeline};
use crate::reassemble::{Fragment, Reassembler, Reassembly};
use crate::registry::{resolve_config, Env, Registry};
use crate::schema::RagConfig;
use crate::store::{self, Filter, Sort, VectorStore};

pub struct AppState {
    pub store: Arc<dyn VectorStore>,
    pub registry: Arc<Registry>,
    pub env: Env,
    pub settings: Settings,
}

type SharedState = Arc<AppState>;

/// Error wrapper translating [`VerbaError`] into HTTP responses.
pub struct AppError(VerbaError);

impl From<VerbaError> for AppError {
    fn from(err: VerbaError) -> Self {
        Self(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            VerbaError::Config(_) => StatusCode::BAD_REQUEST,
            VerbaError::Duplicate(_) => StatusCode::CONFLICT,
            VerbaError::Store(_) => StatusCode::BAD_GATEWAY,
            VerbaError::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/config", get(get_config).put(put_config))
        .route("/reset", axum::routing::post(reset))
        .route("/documents", get(list_documents))
        .route(
            "/documents/{uuid}",
            get(get_document).delete(delete_document),
        )
        .route("/meta", get(meta))
        .route("/ws", get(ws_upgrade))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: SharedState) -> anyhow::Result<()> {
    let bind = state.settings.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(%bind, "listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health(State(state): State<SharedState>) -> Response {
    if state.store.is_live().await {
        Json(serde_json::json!({ "status": "ok" })).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "store unreachable" })),
        )
            .into_response()
    }
}

async fn get_config(State(state): State<SharedState>) -> Result<Json<RagConfig>, AppError> {
    let config = resolve_config(state.store.as_ref(), &state.registry, &state.env).await?;
    Ok(Json(config))
}

async fn put_config(
    State(state): State<SharedState>,
    Json(config): Json<RagConfig>,
) -> Result<StatusCode, AppError> {
    config.validate_selections()?;
    let fresh = state.registry.default_config(&state.env);
    if !crate::schema::verify_config(&config, &fresh) {
        return Err(VerbaError::Config(
            "config does not match the current component schema".into(),
        )
        .into());
    }
    let blob = serde_json::to_value(&config)
        .map_err(|e| VerbaError::Config(format!("unserializable config: {e}")))?;
    store::set_config(state.store.as_ref(), &blob).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct ResetQuery {
    mode: String,
}

async fn reset(
    State(state): State<SharedState>,
    Query(params): Query<ResetQuery>,
) -> Result<StatusCode, AppError> {
    match params.mode.as_str() {
        "config" => store::delete_config(state.store.as_ref()).await?,
        "all" => store::reset_all(state.store.as_ref()).await?,
        other => {
            return Err(VerbaError::Config(format!(
                "unknown reset mode '{other}' (expected 'config' or 'all')"
            ))
            .into())
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct DocumentsQuery {
    #[serde(default)]
    query: String,
    /// Comma-separated label filter.
    #[serde(default)]
    labels: String,
    #[serde(default = "default_page")]
    page: usize,
    #[serde(default = "default_page_size")]
    page_size: usize,
}

fn default_page() -> usize {
    1
}

fn default_page_size() -> usize {
    10
}

#[derive(Serialize)]
struct DocumentSummary {
    uuid: String,
    title: String,
    extension: String,
    file_size: u64,
    labels: Vec<String>,
    source: String,
}

fn summarize(obj: &store::StoredObject) -> DocumentSummary {
    DocumentSummary {
        uuid: obj.uuid.clone(),
        title: obj.str_prop("title").to_string(),
        extension: obj.str_prop("extension").to_string(),
        file_size: obj
            .properties
            .get("file_size")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or_default(),
        labels: obj
            .properties
            .get("labels")
            .and_then(serde_json::Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(serde_json::Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        source: obj.str_prop("source").to_string(),
    }
}

async fn list_documents(
    State(state): State<SharedState>,
    Query(params): Query<DocumentsQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let labels: Vec<String> = params
        .labels
        .split(',')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    let filter = (!labels.is_empty())
        .then(|| Filter::ContainsAny("labels".to_string(), labels));

    let page = params.page.max(1);
    let offset = (page - 1) * params.page_size;
    let store_ref = state.store.as_ref();
    store_ref.verify_collection(store::DOCUMENTS_COLLECTION).await?;

    let hits = if params.query.is_empty() {
        let sort = Sort {
            property: "title".to_string(),
            ascending: true,
        };
        store_ref
            .fetch(
                store::DOCUMENTS_COLLECTION,
                filter.as_ref(),
                Some(&sort),
                params.page_size,
                offset,
            )
            .await?
    } else {
        store_ref
            .hybrid_query(
                store::DOCUMENTS_COLLECTION,
                &params.query,
                None,
                filter.as_ref(),
                params.page_size,
                offset,
            )
            .await?
    };
    let total = store_ref
        .count(store::DOCUMENTS_COLLECTION, filter.as_ref())
        .await?;

    let documents: Vec<DocumentSummary> = hits.iter().map(summarize).collect();
    Ok(Json(serde_json::json!({
        "documents": documents,
        "total": total,
        "page": page,
        "page_size": params.page_size,
    })))
}

/// Locate a document's chunk collection from the embedder recorded in
/// its stored `meta`, if any.
fn meta_model(meta_raw: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(meta_raw)
        .ok()?
        .pointer("/Embedder/config/Model/value")?
        .as_str()
        .map(str::to_string)
}

async fn get_document(
    State(state): State<SharedState>,
    Path(uuid): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let store_ref = state.store.as_ref();
    let Some(doc) = store_ref
        .fetch_by_id(store::DOCUMENTS_COLLECTION, &uuid)
        .await?
    else {
        return Err(VerbaError::Store(format!("no document '{uuid}'")).into());
    };

    let filter = Filter::eq("doc_uuid", uuid.as_str());
    let sort = Sort {
        property: "chunk_id".to_string(),
        ascending: true,
    };
    let chunks = match meta_model(doc.str_prop("meta")) {
        Some(model) => {
            store_ref
                .fetch(
                    &store::embedding_collection(&model),
                    Some(&filter),
                    Some(&sort),
                    usize::MAX,
                    0,
                )
                .await?
        }
        None => {
            let mut found = Vec::new();
            for name in store_ref.collections().await? {
                if name.starts_with("VERBA_Embedding_") {
                    found = store_ref
                        .fetch(&name, Some(&filter), Some(&sort), usize::MAX, 0)
                        .await?;
                    if !found.is_empty() {
                        break;
                    }
                }
            }
            found
        }
    };

    let chunk_views: Vec<serde_json::Value> = chunks
        .iter()
        .map(|c| {
            serde_json::json!({
                "uuid": c.uuid,
                "chunk_id": c.int_prop("chunk_id"),
                "content": c.str_prop("content"),
                "start_i": c.properties.get("start_i"),
                "end_i": c.properties.get("end_i"),
            })
        })
        .collect();
    Ok(Json(serde_json::json!({
        "uuid": doc.uuid,
        "properties": doc.properties,
        "chunks": chunk_views,
    })))
}

async fn delete_document(
    State(state): State<SharedState>,
    Path(uuid): Path<String>,
) -> Result<StatusCode, AppError> {
    store::delete_document(state.store.as_ref(), &uuid).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn meta(State(state): State<SharedState>) -> Result<Json<serde_json::Value>, AppError> {
    let store_ref = state.store.as_ref();
    let mut counts = BTreeMap::new();
    for name in store_ref.collections().await? {
        let count = store_ref.count(&name, None).await?;
        counts.insert(name, count);
    }
    Ok(Json(serde_json::json!({
        "connected": store_ref.is_live().await,
        "collections": counts,
    })))
}

/// Messages the client sends over `/ws`.
#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum ClientMessage {
    Fragment(Fragment),
    Query(QueryRequest),
}

/// Messages the server sends over `/ws`.
#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum ServerMessage {
    Status(StatusReport),
    Token {
        message: String,
        finish_reason: String,
    },
    Result(QueryResult),
    Error {
        message: String,
    },
}

async fn ws_upgrade(State(state): State<SharedState>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Bridge one ingestion task's report stream onto the shared outbound
/// channel. Dropping the returned sender's receiver (socket gone)
/// makes the task's report sends fail, which it treats as
/// cancellation.
fn report_channel(out: mpsc::Sender<ServerMessage>) -> mpsc::Sender<StatusReport> {
    let (tx, mut rx) = mpsc::channel::<StatusReport>(32);
    tokio::spawn(async move {
        while let Some(report) = rx.recv().await {
            if out.send(ServerMessage::Status(report)).await.is_err() {
                break;
            }
        }
    });
    tx
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(256);

    // Writer task owns the sink; everything outbound funnels through
    // out_tx so ingestion and query tasks never race on the socket.
    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let Ok(text) = serde_json::to_string(&message) else {
                continue;
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let ingestion = Arc::new(IngestionPipeline::new(
        state.store.clone(),
        state.registry.clone(),
    ));
    let retrieval = Arc::new(RetrievalPipeline::new(
        state.store.clone(),
        state.registry.clone(),
        state.settings.cache.enabled,
    ));
    let mut reassembler = Reassembler::new();

    while let Some(Ok(message)) = stream.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let parsed: ClientMessage = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(e) => {
                let _ = out_tx
                    .send(ServerMessage::Error {
                        message: format!("unparseable message: {e}"),
                    })
                    .await;
                continue;
            }
        };

        match parsed {
            ClientMessage::Fragment(fragment) => {
                let file_id = fragment.file_id.clone();
                match reassembler.push(fragment) {
                    Ok(Reassembly::Pending) => {}
                    Ok(Reassembly::Incomplete) => {
                        let _ = out_tx
                            .send(ServerMessage::Error {
                                message: format!("upload '{file_id}' arrived incomplete"),
                            })
                            .await;
                    }
                    Ok(Reassembly::Complete(file)) => {
                        let pipeline = ingestion.clone();
                        let reports = report_channel(out_tx.clone());
                        tokio::spawn(async move {
                            pipeline.ingest_file(*file, reports).await;
                        });
                    }
                    Err(err) => {
                        let _ = out_tx
                            .send(ServerMessage::Error {
                                message: err.to_string(),
                            })
                            .await;
                    }
                }
            }
            ClientMessage::Query(request) => {
                let pipeline = retrieval.clone();
                let out = out_tx.clone();
                tokio::spawn(async move {
                    match pipeline.query(&request).await {
                        Ok((result, mut events)) => {
                            let for_cache = result.clone();
                            let mut answer = String::new();
                            if out.send(ServerMessage::Result(result)).await.is_err() {
                                return;
                            }
                            while let Some(event) = events.recv().await {
                                answer.push_str(&event.message);
                                let sent = out
                                    .send(ServerMessage::Token {
                                        message: event.message,
                                        finish_reason: event.finish_reason,
                                    })
                                    .await;
                                if sent.is_err() {
                                    return;
                                }
                            }
                            if let Err(e) = pipeline
                                .cache_answer(&for_cache, &request.query, &answer)
                                .await
                            {
                                tracing::warn!(error = %e, "caching the answer failed");
                            }
                        }
                        Err(err) => {
                            let _ = out
                                .send(ServerMessage::Error {
                                    message: err.to_string(),
                                })
                                .await;
                        }
                    }
                });
            }
        }
    }
    writer.abort();
}
