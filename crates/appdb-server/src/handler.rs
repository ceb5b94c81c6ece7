use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use appdb_docs::{
    ComputeFailure, Decorated, Document, DocumentKey, Fields, KeyRange, Partition, Scope,
    Subscription,
};
use appdb_types::{fields_from_value, AppId};

use crate::auth::Caller;
use crate::error::{ServerError, ServerResult};
use crate::router::AppState;

/// A document as returned by read routes.
#[derive(Debug, Serialize)]
pub struct ItemResponse {
    #[serde(flatten)]
    pub document: Document,
    #[serde(rename = "computeErrors", skip_serializing_if = "Vec::is_empty")]
    pub compute_errors: Vec<ComputeFailure>,
}

impl From<Decorated> for ItemResponse {
    fn from(d: Decorated) -> Self {
        Self {
            document: d.document,
            compute_errors: d.failures,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub end: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    /// Restrict the stream to one model of the app.
    #[serde(default)]
    pub model: Option<String>,
}

/// Frames buffered between a subscription and its HTTP response.
const STREAM_BUFFER: usize = 16;

pub type EventStream = Sse<ReceiverStream<Result<Event, axum::Error>>>;

/// Health check handler.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "name": "appdb",
        "version": env!("CARGO_PKG_VERSION"),
        "subscribers": state.store.bus().subscriber_count(),
    }))
}

fn partition(caller: Caller, app: &str, model: &str) -> ServerResult<Partition> {
    Ok(Partition::new(
        caller.wallet,
        app.parse().map_err(bad_request)?,
        model.parse().map_err(bad_request)?,
    ))
}

fn document_key(caller: Caller, app: &str, model: &str, key: &str) -> ServerResult<DocumentKey> {
    Ok(partition(caller, app, model)?.key(key.parse().map_err(bad_request)?))
}

fn body_fields(body: Value) -> ServerResult<Fields> {
    fields_from_value(body).map_err(bad_request)
}

fn bad_request(e: impl std::fmt::Display) -> ServerError {
    ServerError::BadRequest(e.to_string())
}

pub async fn list_items(
    State(state): State<AppState>,
    caller: Caller,
    Path((app, model)): Path<(String, String)>,
    Query(query): Query<ListQuery>,
) -> ServerResult<Json<Vec<ItemResponse>>> {
    let partition = partition(caller, &app, &model)?;
    let range = KeyRange::from_bounds(&query.start, &query.end);
    let items = state.store.list(&partition, &range).await?;
    debug!(%partition, count = items.len(), "list items");
    Ok(Json(items.into_iter().map(ItemResponse::from).collect()))
}

pub async fn add_item(
    State(state): State<AppState>,
    caller: Caller,
    Path((app, model)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> ServerResult<(StatusCode, Json<Value>)> {
    let partition = partition(caller, &app, &model)?;
    let key = state.store.add(&partition, body_fields(body)?).await?;
    Ok((StatusCode::CREATED, Json(json!({ "key": key }))))
}

pub async fn get_item(
    State(state): State<AppState>,
    caller: Caller,
    Path((app, model, key)): Path<(String, String, String)>,
) -> ServerResult<Json<ItemResponse>> {
    let key = document_key(caller, &app, &model, &key)?;
    Ok(Json(state.store.get(&key).await?.into()))
}

pub async fn set_item(
    State(state): State<AppState>,
    caller: Caller,
    Path((app, model, key)): Path<(String, String, String)>,
    Json(body): Json<Value>,
) -> ServerResult<Json<Document>> {
    let key = document_key(caller, &app, &model, &key)?;
    Ok(Json(state.store.set(&key, body_fields(body)?).await?))
}

pub async fn update_item(
    State(state): State<AppState>,
    caller: Caller,
    Path((app, model, key)): Path<(String, String, String)>,
    Json(body): Json<Value>,
) -> ServerResult<Json<Document>> {
    let key = document_key(caller, &app, &model, &key)?;
    Ok(Json(state.store.update(&key, body_fields(body)?).await?))
}

pub async fn delete_item(
    State(state): State<AppState>,
    caller: Caller,
    Path((app, model, key)): Path<(String, String, String)>,
) -> ServerResult<StatusCode> {
    let key = document_key(caller, &app, &model, &key)?;
    state.store.delete(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Server-sent events for every change the caller's wallet makes to `app`.
///
/// Each frame is named after the event kind, carries the bus `seq` as its
/// id, and holds the JSON event as data. The subscription is released as
/// soon as the client goes away.
pub async fn stream_events(
    State(state): State<AppState>,
    caller: Caller,
    Path(app): Path<String>,
    Query(query): Query<EventsQuery>,
) -> ServerResult<EventStream> {
    let app: AppId = app.parse().map_err(bad_request)?;
    let mut scope = Scope::app(caller.wallet, app);
    if let Some(model) = query.model.filter(|m| !m.is_empty()) {
        scope = scope.with_model(model.parse().map_err(bad_request)?);
    }

    let subscription = state.store.subscribe(scope);
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    tokio::spawn(forward_events(subscription, tx));

    Ok(Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default()))
}

async fn forward_events(
    mut subscription: Subscription,
    tx: mpsc::Sender<Result<Event, axum::Error>>,
) {
    debug!(subscription = %subscription.id(), scope = %subscription.scope(), "event stream opened");
    loop {
        let event = tokio::select! {
            _ = tx.closed() => break,
            event = subscription.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        let frame = Event::default()
            .event(event.kind.to_string())
            .id(event.seq.to_string())
            .json_data(&event);
        if tx.send(frame).await.is_err() {
            break;
        }
    }
    debug!(
        subscription = %subscription.id(),
        dropped = subscription.dropped(),
        "event stream closed"
    );
}
