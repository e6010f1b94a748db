//! HTTP surface of the gateway.
//!
//! The pipeline endpoint (plain and WebSocket-framed) plus the admin and
//! introspection routes. Tenant scope comes from the configured tenancy
//! header, engine selection from the `engine` query parameter.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use portico_adapter::security::validate_identifier;
use portico_adapter::{EngineKind, Error, ErrorCategory, Value};
use portico_protocol::{PipelineRequest, PipelineResponse};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::pipeline::{PipelineEngine, Scope};

/// Shared state behind every route.
pub struct AppState {
    /// The pipeline engine (owns registry and sessions)
    pub pipeline: PipelineEngine,
    /// Header carrying the tenant id
    pub tenant_header: String,
}

/// Build the gateway router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/pipeline", post(handle_pipeline))
        .route("/v1/pipeline/ws", get(handle_pipeline_ws))
        .route("/v1/engines", get(list_engines))
        .route("/v1/tenants", get(list_tenants).post(create_tenant))
        .route("/v1/tenants/:tenant", delete(delete_tenant))
        .route("/v1/tables", get(list_tables))
        .route("/v1/tables/:table/schema", get(table_schema))
        .route("/v1/tables/:table/rows", get(table_rows))
        .route("/v1/query", post(run_query))
        .route("/v1/health", get(health))
        .with_state(state)
}

/// JSON error body with a status derived from the error category.
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.category() {
            ErrorCategory::NotConfigured => StatusCode::NOT_FOUND,
            ErrorCategory::Configuration => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
struct ScopeQuery {
    engine: Option<String>,
}

fn resolve_scope(
    headers: &HeaderMap,
    query: &ScopeQuery,
    tenant_header: &str,
) -> Result<Scope, ApiError> {
    let engine = match &query.engine {
        Some(name) => Some(name.parse::<EngineKind>()?),
        None => None,
    };
    let tenant = headers
        .get(tenant_header)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    Ok(Scope { engine, tenant })
}

async fn handle_pipeline(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScopeQuery>,
    headers: HeaderMap,
    Json(request): Json<PipelineRequest>,
) -> Result<Json<PipelineResponse>, ApiError> {
    let scope = resolve_scope(&headers, &query, &state.tenant_header)?;
    let response = state.pipeline.handle(&scope, request).await?;
    Ok(Json(response))
}

async fn handle_pipeline_ws(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScopeQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let scope = resolve_scope(&headers, &query, &state.tenant_header)?;
    Ok(ws.on_upgrade(move |socket| pipeline_ws_loop(socket, state, scope)))
}

/// One JSON `PipelineRequest` per text message, answered in order.
async fn pipeline_ws_loop(mut socket: WebSocket, state: Arc<AppState>, scope: Scope) {
    while let Some(Ok(message)) = socket.recv().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let reply = match PipelineRequest::from_json(&text) {
            Ok(request) => match state.pipeline.handle(&scope, request).await {
                Ok(response) => serde_json::to_string(&response),
                Err(e) => serde_json::to_string(&serde_json::json!({ "error": e.to_string() })),
            },
            Err(e) => serde_json::to_string(
                &serde_json::json!({ "error": format!("invalid pipeline request: {e}") }),
            ),
        };

        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "failed to serialize pipeline response");
                break;
            }
        };
        if socket.send(Message::Text(reply)).await.is_err() {
            debug!("websocket peer went away");
            break;
        }
    }
}

async fn list_engines(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.pipeline.registry().engines())
}

async fn list_tenants(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScopeQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<String>>, ApiError> {
    let scope = resolve_scope(&headers, &query, &state.tenant_header)?;
    let tenants = state.pipeline.registry().list_tenants(scope.engine).await?;
    Ok(Json(tenants))
}

#[derive(Debug, Deserialize)]
struct CreateTenantBody {
    tenant: String,
}

async fn create_tenant(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScopeQuery>,
    headers: HeaderMap,
    Json(body): Json<CreateTenantBody>,
) -> Result<impl IntoResponse, ApiError> {
    let scope = resolve_scope(&headers, &query, &state.tenant_header)?;
    state
        .pipeline
        .registry()
        .create_tenant(scope.engine, &body.tenant)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "tenant": body.tenant })),
    ))
}

async fn delete_tenant(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScopeQuery>,
    headers: HeaderMap,
    Path(tenant): Path<String>,
) -> Result<StatusCode, ApiError> {
    let scope = resolve_scope(&headers, &query, &state.tenant_header)?;
    state
        .pipeline
        .registry()
        .delete_tenant(scope.engine, &tenant)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_tables(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScopeQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<String>>, ApiError> {
    let scope = resolve_scope(&headers, &query, &state.tenant_header)?;
    let adapter = state
        .pipeline
        .registry()
        .get_adapter(scope.engine, scope.tenant.as_deref())
        .await?;
    let result = adapter.execute(adapter.engine().list_tables_sql(), &[]).await?;
    let tables = result
        .rows
        .into_iter()
        .filter_map(|row| row.values.into_iter().next())
        .filter_map(|v| v.as_str().map(str::to_owned))
        .collect();
    Ok(Json(tables))
}

#[derive(Debug, Serialize)]
struct ColumnInfo {
    name: String,
    #[serde(rename = "type")]
    data_type: String,
}

async fn table_schema(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScopeQuery>,
    headers: HeaderMap,
    Path(table): Path<String>,
) -> Result<Json<Vec<ColumnInfo>>, ApiError> {
    let scope = resolve_scope(&headers, &query, &state.tenant_header)?;
    validate_identifier(&table)?;
    let adapter = state
        .pipeline
        .registry()
        .get_adapter(scope.engine, scope.tenant.as_deref())
        .await?;
    let result = adapter
        .execute(&adapter.engine().table_columns_sql(&table), &[])
        .await?;
    let columns = result
        .rows
        .into_iter()
        .filter_map(|row| {
            let mut values = row.values.into_iter();
            let name = values.next()?.as_str()?.to_owned();
            let data_type = values
                .next()
                .map(|v| v.to_display_string())
                .unwrap_or_default();
            Some(ColumnInfo { name, data_type })
        })
        .collect();
    Ok(Json(columns))
}

#[derive(Debug, Deserialize)]
struct RowsQuery {
    engine: Option<String>,
    limit: Option<u32>,
    offset: Option<u32>,
}

#[derive(Debug, Serialize)]
struct RowsPage {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    limit: u32,
    offset: u32,
}

const MAX_PAGE_SIZE: u32 = 1000;

async fn table_rows(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RowsQuery>,
    headers: HeaderMap,
    Path(table): Path<String>,
) -> Result<Json<RowsPage>, ApiError> {
    let scope_query = ScopeQuery {
        engine: query.engine.clone(),
    };
    let scope = resolve_scope(&headers, &scope_query, &state.tenant_header)?;
    validate_identifier(&table)?;

    let limit = query.limit.unwrap_or(100).min(MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);

    let adapter = state
        .pipeline
        .registry()
        .get_adapter(scope.engine, scope.tenant.as_deref())
        .await?;
    let quoted = match adapter.engine() {
        EngineKind::Mysql => format!("`{table}`"),
        _ => format!("\"{table}\""),
    };
    let result = adapter
        .execute(
            &format!("SELECT * FROM {quoted} LIMIT {limit} OFFSET {offset}"),
            &[],
        )
        .await?;

    Ok(Json(RowsPage {
        columns: result.columns,
        rows: result.rows.into_iter().map(|r| r.values).collect(),
        limit,
        offset,
    }))
}

#[derive(Debug, Deserialize)]
struct QueryBody {
    sql: String,
    #[serde(default)]
    args: Vec<Value>,
}

#[derive(Debug, Serialize)]
struct QueryReply {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    row_count: usize,
    affected_rows: u64,
    duration_ms: u64,
}

async fn run_query(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScopeQuery>,
    headers: HeaderMap,
    Json(body): Json<QueryBody>,
) -> Result<Json<QueryReply>, ApiError> {
    let scope = resolve_scope(&headers, &query, &state.tenant_header)?;
    let adapter = state
        .pipeline
        .registry()
        .get_adapter(scope.engine, scope.tenant.as_deref())
        .await?;

    let start = Instant::now();
    let result = adapter.execute(&body.sql, &body.args).await?;
    let duration_ms = start.elapsed().as_millis() as u64;

    Ok(Json(QueryReply {
        columns: result.columns,
        row_count: result.rows.len(),
        rows: result.rows.into_iter().map(|r| r.values).collect(),
        affected_rows: result.affected_rows,
        duration_ms,
    }))
}

#[derive(Debug, Serialize)]
struct EngineHealth {
    engine: EngineKind,
    healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthReply {
    status: &'static str,
    engines: Vec<EngineHealth>,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthReply> {
    let registry = state.pipeline.registry();
    let mut engines = Vec::new();
    for info in registry.engines() {
        let outcome = match registry.get_adapter(Some(info.kind), None).await {
            Ok(adapter) => adapter.execute("SELECT 1", &[]).await.map(drop),
            Err(e) => Err(e),
        };
        engines.push(match outcome {
            Ok(()) => EngineHealth {
                engine: info.kind,
                healthy: true,
                error: None,
            },
            Err(e) => EngineHealth {
                engine: info.kind,
                healthy: false,
                error: Some(e.to_string()),
            },
        });
    }

    let status = if engines.iter().all(|e| e.healthy) {
        "healthy"
    } else {
        "degraded"
    };
    Json(HealthReply { status, engines })
}
