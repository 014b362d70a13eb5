use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use ops_protocol::locator::LocatorResult;
use ops_protocol::schema::{PolicyDescriptor, Relation, SchemaSnapshot, TableDescriptor};
use ops_protocol::{ExecutionRecord, ExecutionStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::LocatorError;
use crate::locator::{LocatorDisplay, RecordLocator};
use crate::metrics::Metrics;
use crate::mirror::MirrorView;
use crate::schema::{GraphStyle, SchemaLoader};

/// Shared handles behind every route. `schema` holds the snapshot currently
/// on display; it only changes on a successful load.
#[derive(Clone)]
pub struct AppState {
    pub mirror: watch::Receiver<MirrorView>,
    pub schema_loader: Arc<SchemaLoader>,
    pub schema: Arc<RwLock<Option<SchemaSnapshot>>>,
    pub graph_style: Arc<GraphStyle>,
    pub locator: Arc<RecordLocator>,
    pub shutdown: CancellationToken,
}

type ApiError = (StatusCode, Json<ErrorBody>);

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    message: String,
}

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/monitor", get(monitor))
        .route("/ws", get(ws_handler))
        .route("/schema", get(get_schema))
        .route("/schema/graph", get(get_graph))
        .route("/schema/tables/:name", get(get_table))
        .route(
            "/locate",
            get(locator_state).post(locate).delete(clear_locator),
        )
        .with_state(state)
        .layer(middleware::from_fn(log_http_request))
}

/// Display color per status. Presentation only.
fn status_color(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Queued => "yellow",
        ExecutionStatus::Processing => "blue",
        ExecutionStatus::Completed => "green",
        ExecutionStatus::Failed => "red",
        ExecutionStatus::Timeout => "orange",
        ExecutionStatus::Cancelled => "gray",
    }
}

#[derive(Debug, Serialize)]
struct MonitorRow {
    #[serde(flatten)]
    record: ExecutionRecord,
    status_color: &'static str,
    finished: bool,
    latency_display: Option<String>,
}

#[derive(Debug, Serialize)]
struct MonitorPayload {
    loading: bool,
    error: Option<String>,
    metrics: Metrics,
    rows: Vec<MonitorRow>,
}

fn monitor_payload(view: &MirrorView) -> MonitorPayload {
    let rows = view
        .window
        .iter()
        .map(|record| MonitorRow {
            status_color: status_color(record.status),
            finished: record.status.is_terminal(),
            latency_display: record.latency_ms.map(|ms| {
                humantime::format_duration(Duration::from_millis(ms.round() as u64)).to_string()
            }),
            record: record.clone(),
        })
        .collect();
    MonitorPayload {
        loading: view.loading,
        error: view.error.clone(),
        metrics: view.metrics,
        rows,
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn log_http_request(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let response = next.run(req).await;
    let status = response.status();
    tracing::info!(
        method = %method,
        uri = %uri,
        status = %status,
        "http request"
    );
    response
}

async fn monitor(State(state): State<AppState>) -> Json<MonitorPayload> {
    let payload = monitor_payload(&state.mirror.borrow());
    Json(payload)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_ws(socket, state))
}

async fn handle_ws(mut socket: WebSocket, state: AppState) {
    let mut rx = state.mirror.clone();
    let initial = monitor_payload(&rx.borrow_and_update());
    if send_ws_payload(&mut socket, &initial).await.is_err() {
        return;
    }
    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let payload = monitor_payload(&rx.borrow_and_update());
                if send_ws_payload(&mut socket, &payload).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }
}

async fn send_ws_payload(socket: &mut WebSocket, payload: &MonitorPayload) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(payload) {
        Ok(text) => text,
        Err(err) => {
            tracing::warn!(error = %err, "failed to serialize monitor payload");
            return Ok(());
        }
    };
    socket.send(Message::Text(text)).await
}

#[derive(Debug, Serialize)]
struct SchemaPayload {
    #[serde(flatten)]
    snapshot: SchemaSnapshot,
    relations: Vec<Relation>,
}

#[derive(Debug, Serialize)]
struct TableDetail {
    table: TableDescriptor,
    primary_key: Vec<String>,
    policies: Vec<PolicyDescriptor>,
    references: Vec<Relation>,
    referenced_by: Vec<Relation>,
}

fn table_detail(snapshot: &SchemaSnapshot, name: &str) -> Option<TableDetail> {
    let table = snapshot.table(name)?;
    let (references, referenced_by): (Vec<Relation>, Vec<Relation>) = snapshot
        .relations()
        .into_iter()
        .filter(|relation| relation.from_table == name || relation.to_table == name)
        .partition(|relation| relation.from_table == name);
    Some(TableDetail {
        primary_key: table.primary_key().into_iter().map(str::to_string).collect(),
        policies: snapshot.policies_for(name).cloned().collect(),
        table: table.clone(),
        references,
        referenced_by,
    })
}

async fn load_schema(state: &AppState) -> Result<SchemaSnapshot, ApiError> {
    match state.schema_loader.refresh().await {
        Ok(snapshot) => {
            *state.schema.write().await = Some(snapshot.clone());
            Ok(snapshot)
        }
        Err(err) => Err(api_error(StatusCode::BAD_GATEWAY, err.to_string())),
    }
}

/// The snapshot last shown by `/schema`, loading one if none exists yet.
async fn current_schema(state: &AppState) -> Result<SchemaSnapshot, ApiError> {
    let shown = state.schema.read().await.clone();
    match shown {
        Some(snapshot) => Ok(snapshot),
        None => load_schema(state).await,
    }
}

async fn get_schema(State(state): State<AppState>) -> Result<Json<SchemaPayload>, ApiError> {
    let snapshot = load_schema(&state).await?;
    Ok(Json(SchemaPayload {
        relations: snapshot.relations(),
        snapshot,
    }))
}

async fn get_table(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<TableDetail>, ApiError> {
    let snapshot = current_schema(&state).await?;
    table_detail(&snapshot, &name)
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("unknown table {name}")))
}

#[derive(Debug, Deserialize)]
struct GraphQuery {
    selected: Option<String>,
}

async fn get_graph(
    State(state): State<AppState>,
    Query(query): Query<GraphQuery>,
) -> Result<String, ApiError> {
    let snapshot = current_schema(&state).await?;
    Ok(state
        .graph_style
        .build(&snapshot.tables, query.selected.as_deref()))
}

#[derive(Debug, Deserialize)]
struct LocatePayload {
    id: String,
}

#[derive(Debug, Serialize)]
struct DisplayField {
    key: String,
    value: String,
}

/// Lookup result plus the generic key/value listing and raw JSON of its payload.
#[derive(Debug, Serialize)]
struct LocateResponse {
    #[serde(flatten)]
    result: LocatorResult,
    fields: Vec<DisplayField>,
    raw: Option<String>,
}

fn locate_response(result: LocatorResult) -> LocateResponse {
    let (fields, raw) = match &result.data {
        Some(document) => (
            document
                .display_fields()
                .into_iter()
                .map(|(key, value)| DisplayField { key, value })
                .collect(),
            Some(document.to_pretty_json()),
        ),
        None => (Vec::new(), None),
    };
    LocateResponse {
        result,
        fields,
        raw,
    }
}

async fn locate(
    State(state): State<AppState>,
    Json(payload): Json<LocatePayload>,
) -> Result<Json<LocateResponse>, ApiError> {
    state
        .locator
        .locate(&payload.id)
        .await
        .map(|result| Json(locate_response(result)))
        .map_err(|err| api_error(locator_status(&err), err.to_string()))
}

fn locator_status(err: &LocatorError) -> StatusCode {
    match err {
        LocatorError::InvalidFormat => StatusCode::BAD_REQUEST,
        LocatorError::RemoteFailure(_) => StatusCode::BAD_GATEWAY,
        LocatorError::Superseded => StatusCode::CONFLICT,
    }
}

async fn locator_state(State(state): State<AppState>) -> Json<LocatorDisplay> {
    Json(state.locator.state())
}

async fn clear_locator(State(state): State<AppState>) -> Json<LocatorDisplay> {
    state.locator.clear();
    Json(state.locator.state())
}
