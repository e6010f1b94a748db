//! In-memory mock backend for gateway tests.

use async_trait::async_trait;
use portico_adapter::{
    Adapter, AdapterTransaction, EngineKind, Error, QueryResult, Result, Row, Statement, Value,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Observable state shared by a root mock and all its tenant instances.
#[derive(Default)]
pub struct MockBackend {
    /// Every statement that reached the backend, scope-prefixed
    pub log: Mutex<Vec<String>>,
    /// Tenants passed to `create_tenant`
    pub create_calls: Mutex<Vec<String>>,
    /// Tenants passed to `delete_tenant`
    pub delete_calls: Mutex<Vec<String>>,
    /// Close invocations per scope (`None` is the root)
    pub close_counts: Mutex<HashMap<Option<String>, usize>>,
}

impl MockBackend {
    pub fn log_snapshot(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn close_count(&self, tenant: Option<&str>) -> usize {
        *self
            .close_counts
            .lock()
            .unwrap()
            .get(&tenant.map(str::to_owned))
            .unwrap_or(&0)
    }
}

/// Mock adapter; statements containing `boom` fail, `SELECT` returns one row.
pub struct MockAdapter {
    kind: EngineKind,
    tenant: Option<String>,
    backend: Arc<MockBackend>,
}

impl MockAdapter {
    pub fn new(kind: EngineKind) -> (Arc<Self>, Arc<MockBackend>) {
        let backend = Arc::new(MockBackend::default());
        let adapter = Arc::new(Self {
            kind,
            tenant: None,
            backend: Arc::clone(&backend),
        });
        (adapter, backend)
    }

    fn scope(&self) -> String {
        self.tenant.clone().unwrap_or_else(|| "root".to_string())
    }

    fn run(&self, prefix: &str, sql: &str) -> Result<QueryResult> {
        self.backend
            .log
            .lock()
            .unwrap()
            .push(format!("{}:{}{}", self.scope(), prefix, sql));
        mock_result(sql)
    }
}

fn mock_result(sql: &str) -> Result<QueryResult> {
    if sql.contains("boom") {
        return Err(Error::query_with_sql("simulated failure", sql));
    }
    if sql.trim_start().to_ascii_uppercase().starts_with("SELECT") {
        return Ok(QueryResult {
            columns: vec!["n".to_string()],
            rows: vec![Row::new(vec!["n".to_string()], vec![Value::from(1_i64)])],
            affected_rows: 0,
            last_insert_rowid: None,
        });
    }
    Ok(QueryResult::affected(1))
}

#[async_trait]
impl Adapter for MockAdapter {
    fn engine(&self) -> EngineKind {
        self.kind
    }

    fn tenant_id(&self) -> Option<&str> {
        self.tenant.as_deref()
    }

    async fn execute(&self, sql: &str, _args: &[Value]) -> Result<QueryResult> {
        self.run("", sql)
    }

    async fn batch(&self, statements: &[Statement]) -> Result<()> {
        for stmt in statements {
            self.run("batch:", &stmt.sql)?;
        }
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn AdapterTransaction>> {
        self.run("", "BEGIN")?;
        Ok(Box::new(MockTransaction {
            scope: self.scope(),
            backend: Arc::clone(&self.backend),
        }))
    }

    async fn get_tenant(&self, tenant_id: &str) -> Result<Arc<dyn Adapter>> {
        Ok(Arc::new(MockAdapter {
            kind: self.kind,
            tenant: Some(tenant_id.to_string()),
            backend: Arc::clone(&self.backend),
        }))
    }

    async fn create_tenant(&self, tenant_id: &str) -> Result<()> {
        self.backend
            .create_calls
            .lock()
            .unwrap()
            .push(tenant_id.to_string());
        Ok(())
    }

    async fn delete_tenant(&self, tenant_id: &str) -> Result<()> {
        self.backend
            .delete_calls
            .lock()
            .unwrap()
            .push(tenant_id.to_string());
        Ok(())
    }

    async fn list_tenants(&self) -> Result<Vec<String>> {
        Ok(self.backend.create_calls.lock().unwrap().clone())
    }

    async fn close(&self) -> Result<()> {
        *self
            .backend
            .close_counts
            .lock()
            .unwrap()
            .entry(self.tenant.clone())
            .or_insert(0) += 1;
        Ok(())
    }
}

struct MockTransaction {
    scope: String,
    backend: Arc<MockBackend>,
}

impl MockTransaction {
    fn log(&self, entry: String) {
        self.backend.log.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl AdapterTransaction for MockTransaction {
    async fn execute(&self, sql: &str, _args: &[Value]) -> Result<QueryResult> {
        self.log(format!("{}:tx:{}", self.scope, sql));
        mock_result(sql)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.log(format!("{}:COMMIT", self.scope));
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.log(format!("{}:ROLLBACK", self.scope));
        Ok(())
    }
}
