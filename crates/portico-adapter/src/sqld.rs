//! Namespace-capable embedded/replicated engine backend (libsql/sqld family).
//!
//! Configuration supplies an ordered URL list: element 0 is the primary and
//! handles all writes, batches, transactions, and administrative calls;
//! elements 1.. are read replicas. Reads are distributed round-robin across
//! replicas and fall back to the primary when none are configured.
//!
//! Tenant isolation is by namespace: network URLs get the path rewrite
//! `…/namespace/{id}`, local-file URLs get a filename suffix. Namespace
//! creation/deletion/listing goes through the administrative HTTP API on the
//! primary only.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::adapter::{Adapter, AdapterTransaction, EngineKind, Statement};
use crate::error::{Error, Result};
use crate::security::sanitize_tenant_id;
use crate::sql::is_write;
use crate::types::{QueryResult, Row, Value};

/// Configuration for the sqld backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqldConfig {
    /// Ordered connection URLs; element 0 is the primary
    pub urls: Vec<String>,
    /// Optional bearer token for both data and admin endpoints
    #[serde(default)]
    pub auth_token: Option<String>,
}

/// Ordered primary + replica URL set with an atomic round-robin cursor.
pub struct ReplicaSet {
    urls: Vec<String>,
    cursor: AtomicUsize,
}

impl ReplicaSet {
    /// Create a replica set; the first URL is the primary.
    pub fn new(urls: Vec<String>) -> Result<Self> {
        if urls.is_empty() {
            return Err(Error::config("sqld adapter requires at least one URL"));
        }
        Ok(Self {
            urls,
            cursor: AtomicUsize::new(0),
        })
    }

    /// The primary URL (writes, batches, transactions, admin calls).
    pub fn primary(&self) -> &str {
        &self.urls[0]
    }

    /// The next read URL, rotating across replicas; primary when none exist.
    pub fn next_read(&self) -> &str {
        let replicas = self.urls.len() - 1;
        if replicas == 0 {
            return self.primary();
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % replicas;
        &self.urls[1 + idx]
    }

    /// Route a statement: writes to the primary, reads round-robin.
    pub fn route(&self, sql: &str) -> &str {
        if is_write(sql) {
            self.primary()
        } else {
            self.next_read()
        }
    }
}

/// Rewrite a base URL for a tenant namespace.
///
/// Network URLs get a `/namespace/{id}` path segment; `file:` URLs get a
/// `-{id}` filename suffix before the extension.
pub fn tenant_url(base: &str, tenant_id: &str) -> String {
    let id = sanitize_tenant_id(tenant_id);
    if let Some(path) = base.strip_prefix("file:") {
        match path.rfind('.') {
            Some(dot) if dot > path.rfind('/').map_or(0, |s| s + 1) => {
                format!("file:{}-{}{}", &path[..dot], id, &path[dot..])
            }
            _ => format!("file:{path}-{id}"),
        }
    } else {
        format!("{}/namespace/{}", base.trim_end_matches('/'), id)
    }
}

// Wire types for the engine's HTTP pipeline endpoint. The engine shares the
// gateway's tagged value encoding, so `Value` appears directly on the wire.

#[derive(Debug, Serialize)]
struct WirePipelineRequest {
    baton: Option<String>,
    requests: Vec<WireRequest>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireRequest {
    Execute { stmt: WireStmt },
    Close,
}

#[derive(Debug, Serialize)]
struct WireStmt {
    sql: String,
    args: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct WirePipelineResponse {
    #[serde(default)]
    baton: Option<String>,
    #[serde(default)]
    results: Vec<WireResult>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireResult {
    Ok { response: WireResponse },
    Error { error: WireError },
}

#[derive(Debug, Deserialize)]
struct WireError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireResponse {
    Execute { result: WireStmtResult },
    Close,
}

#[derive(Debug, Deserialize)]
struct WireStmtResult {
    #[serde(default)]
    cols: Vec<WireCol>,
    #[serde(default)]
    rows: Vec<Vec<Value>>,
    #[serde(default)]
    affected_row_count: u64,
    #[serde(default)]
    last_insert_rowid: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WireCol {
    name: String,
}

impl WireStmtResult {
    fn into_query_result(self) -> QueryResult {
        let columns: Vec<String> = self.cols.into_iter().map(|c| c.name).collect();
        let rows = self
            .rows
            .into_iter()
            .map(|values| Row::new(columns.clone(), values))
            .collect();
        QueryResult {
            columns,
            rows,
            affected_rows: self.affected_row_count,
            last_insert_rowid: self.last_insert_rowid,
        }
    }
}

/// Shared HTTP plumbing for data-path pipeline calls.
#[derive(Clone)]
struct SqldClient {
    http: reqwest::Client,
    auth_token: Option<String>,
}

impl SqldClient {
    fn new(auth_token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::connection_with_source("failed to build HTTP client", e))?;
        Ok(Self { http, auth_token })
    }

    /// Send a pipeline call and return the new baton plus per-request outcomes.
    async fn pipeline(
        &self,
        base_url: &str,
        baton: Option<String>,
        requests: Vec<WireRequest>,
    ) -> Result<(Option<String>, Vec<Result<QueryResult>>)> {
        let endpoint = format!("{}/v2/pipeline", base_url.trim_end_matches('/'));
        let body = WirePipelineRequest { baton, requests };

        let mut req = self.http.post(&endpoint).json(&body);
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| Error::connection_with_source(format!("pipeline call to {endpoint} failed"), e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::connection(format!(
                "pipeline call to {endpoint} returned {status}: {text}"
            )));
        }

        let parsed: WirePipelineResponse = resp
            .json()
            .await
            .map_err(|e| Error::connection_with_source("invalid pipeline response", e))?;

        let outcomes = parsed
            .results
            .into_iter()
            .map(|r| match r {
                WireResult::Ok {
                    response: WireResponse::Execute { result },
                } => Ok(result.into_query_result()),
                WireResult::Ok {
                    response: WireResponse::Close,
                } => Ok(QueryResult::default()),
                WireResult::Error { error } => Err(Error::query(error.message)),
            })
            .collect();

        Ok((parsed.baton, outcomes))
    }

    /// Run a list of statements in one stateless pipeline call.
    async fn run(
        &self,
        base_url: &str,
        statements: Vec<(String, Vec<Value>)>,
    ) -> Result<Vec<Result<QueryResult>>> {
        let mut requests: Vec<WireRequest> = statements
            .into_iter()
            .map(|(sql, args)| WireRequest::Execute {
                stmt: WireStmt { sql, args },
            })
            .collect();
        requests.push(WireRequest::Close);

        let (_, mut outcomes) = self.pipeline(base_url, None, requests).await?;
        outcomes.pop(); // trailing close
        Ok(outcomes)
    }
}

/// Adapter for the namespace-capable replicated engine.
pub struct SqldAdapter {
    replicas: ReplicaSet,
    client: SqldClient,
    config: SqldConfig,
    tenant: Option<String>,
    closed: AtomicBool,
}

impl SqldAdapter {
    /// Create a root (untenanted) adapter.
    pub fn new(config: SqldConfig) -> Result<Self> {
        let replicas = ReplicaSet::new(config.urls.clone())?;
        let client = SqldClient::new(config.auth_token.clone())?;
        Ok(Self {
            replicas,
            client,
            config,
            tenant: None,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(Error::connection("adapter is closed"));
        }
        Ok(())
    }

    /// Base URL of the administrative namespace API (primary only).
    fn admin_url(&self, tenant_id: &str) -> String {
        format!(
            "{}/v1/namespaces/{}",
            self.replicas.primary().trim_end_matches('/'),
            sanitize_tenant_id(tenant_id)
        )
    }

    fn admin_request(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.auth_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[async_trait]
impl Adapter for SqldAdapter {
    fn engine(&self) -> EngineKind {
        EngineKind::Sqld
    }

    fn tenant_id(&self) -> Option<&str> {
        self.tenant.as_deref()
    }

    async fn execute(&self, sql: &str, args: &[Value]) -> Result<QueryResult> {
        self.ensure_open()?;
        let url = self.replicas.route(sql);
        let mut outcomes = self
            .client
            .run(url, vec![(sql.to_string(), args.to_vec())])
            .await?;
        outcomes
            .pop()
            .unwrap_or_else(|| Err(Error::internal("empty pipeline response")))
    }

    async fn batch(&self, statements: &[Statement]) -> Result<()> {
        self.ensure_open()?;
        // A batch is atomic, so it is a single transaction on the primary.
        let primary = self.replicas.primary();

        let mut requests = vec![WireRequest::Execute {
            stmt: WireStmt {
                sql: "BEGIN".to_string(),
                args: Vec::new(),
            },
        }];
        for stmt in statements {
            requests.push(WireRequest::Execute {
                stmt: WireStmt {
                    sql: stmt.sql.clone(),
                    args: stmt.args.clone(),
                },
            });
        }

        let (baton, outcomes) = self.client.pipeline(primary, None, requests).await?;

        if let Some(err) = outcomes.into_iter().find_map(|o| o.err()) {
            // Roll back best-effort before surfacing the statement error.
            if let Some(baton) = baton {
                let rollback = vec![
                    WireRequest::Execute {
                        stmt: WireStmt {
                            sql: "ROLLBACK".to_string(),
                            args: Vec::new(),
                        },
                    },
                    WireRequest::Close,
                ];
                let _ = self.client.pipeline(primary, Some(baton), rollback).await;
            }
            return Err(err);
        }

        let commit = vec![
            WireRequest::Execute {
                stmt: WireStmt {
                    sql: "COMMIT".to_string(),
                    args: Vec::new(),
                },
            },
            WireRequest::Close,
        ];
        let (_, commit_outcomes) = self.client.pipeline(primary, baton, commit).await?;
        for outcome in commit_outcomes {
            outcome?;
        }
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn AdapterTransaction>> {
        self.ensure_open()?;
        let primary = self.replicas.primary().to_string();
        let begin = vec![WireRequest::Execute {
            stmt: WireStmt {
                sql: "BEGIN".to_string(),
                args: Vec::new(),
            },
        }];
        let (baton, outcomes) = self.client.pipeline(&primary, None, begin).await?;
        for outcome in outcomes {
            outcome?;
        }
        let baton =
            baton.ok_or_else(|| Error::transaction("engine did not issue a transaction baton"))?;

        Ok(Box::new(SqldTransaction {
            client: self.client.clone(),
            url: primary,
            baton: Mutex::new(Some(baton)),
        }))
    }

    async fn get_tenant(&self, tenant_id: &str) -> Result<Arc<dyn Adapter>> {
        self.ensure_open()?;
        let urls = self
            .config
            .urls
            .iter()
            .map(|u| tenant_url(u, tenant_id))
            .collect();
        let config = SqldConfig {
            urls,
            auth_token: self.config.auth_token.clone(),
        };
        let mut adapter = SqldAdapter::new(config)?;
        adapter.tenant = Some(tenant_id.to_string());
        Ok(Arc::new(adapter))
    }

    async fn create_tenant(&self, tenant_id: &str) -> Result<()> {
        self.ensure_open()?;
        let url = format!("{}/create", self.admin_url(tenant_id));
        let resp = self
            .admin_request(self.client.http.post(&url).json(&serde_json::json!({})))
            .send()
            .await
            .map_err(|e| Error::connection_with_source("namespace create call failed", e))?;

        let status = resp.status();
        if status.is_success() || status.as_u16() == 409 {
            if status.as_u16() == 409 {
                debug!(tenant = tenant_id, "namespace already exists");
            }
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        Err(Error::admin_api(status.as_u16(), text))
    }

    async fn delete_tenant(&self, tenant_id: &str) -> Result<()> {
        self.ensure_open()?;
        let url = self.admin_url(tenant_id);
        let resp = self
            .admin_request(self.client.http.delete(&url))
            .send()
            .await
            .map_err(|e| Error::connection_with_source("namespace delete call failed", e))?;

        let status = resp.status();
        if status.is_success() || status.as_u16() == 404 {
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        Err(Error::admin_api(status.as_u16(), text))
    }

    async fn list_tenants(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        let url = format!(
            "{}/v1/namespaces",
            self.replicas.primary().trim_end_matches('/')
        );
        let resp = self
            .admin_request(self.client.http.get(&url))
            .send()
            .await
            .map_err(|e| Error::connection_with_source("namespace list call failed", e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::admin_api(status.as_u16(), text));
        }
        resp.json::<Vec<String>>()
            .await
            .map_err(|e| Error::connection_with_source("invalid namespace list response", e))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// An interactive transaction held open through the engine's baton.
struct SqldTransaction {
    client: SqldClient,
    url: String,
    baton: Mutex<Option<String>>,
}

impl SqldTransaction {
    async fn take_baton(&self) -> Result<String> {
        self.baton
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::transaction("transaction already finished"))
    }
}

#[async_trait]
impl AdapterTransaction for SqldTransaction {
    async fn execute(&self, sql: &str, args: &[Value]) -> Result<QueryResult> {
        let mut guard = self.baton.lock().await;
        let baton = guard
            .take()
            .ok_or_else(|| Error::transaction("transaction already finished"))?;

        let requests = vec![WireRequest::Execute {
            stmt: WireStmt {
                sql: sql.to_string(),
                args: args.to_vec(),
            },
        }];
        let (next_baton, mut outcomes) =
            self.client.pipeline(&self.url, Some(baton), requests).await?;
        *guard = next_baton;

        outcomes
            .pop()
            .unwrap_or_else(|| Err(Error::internal("empty pipeline response")))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let baton = self.take_baton().await?;
        let requests = vec![
            WireRequest::Execute {
                stmt: WireStmt {
                    sql: "COMMIT".to_string(),
                    args: Vec::new(),
                },
            },
            WireRequest::Close,
        ];
        let (_, outcomes) = self.client.pipeline(&self.url, Some(baton), requests).await?;
        for outcome in outcomes {
            outcome?;
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let baton = self.take_baton().await?;
        let requests = vec![
            WireRequest::Execute {
                stmt: WireStmt {
                    sql: "ROLLBACK".to_string(),
                    args: Vec::new(),
                },
            },
            WireRequest::Close,
        ];
        let (_, outcomes) = self.client.pipeline(&self.url, Some(baton), requests).await?;
        for outcome in outcomes {
            outcome?;
        }
        Ok(())
    }
}
