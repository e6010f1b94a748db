//! Embedded SQLite backend.
//!
//! Tenant isolation is by file: each tenant gets its own database file named
//! from the configured base path. rusqlite is synchronous, so every call runs
//! the driver work on the blocking pool; the adapter serializes access to its
//! single connection with a std mutex held only inside the blocking closure.
//!
//! The adapter's connection only ever runs autocommit statements. Each
//! transaction or batch opens a second connection to the same database, so
//! statements from other sessions never land inside it. A `:memory:` database
//! is resolved to a named shared-cache URI to make that second connection
//! possible; the adapter's own connection keeps the database alive.

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

use crate::adapter::{Adapter, AdapterTransaction, EngineKind, Statement};
use crate::error::{Error, Result};
use crate::security::sanitize_tenant_id;
use crate::types::{QueryResult, Row, Value};

const MEMORY_PATH: &str = ":memory:";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

static MEMORY_DB_SEQ: AtomicU64 = AtomicU64::new(0);

/// Resolve a configured path to one a second connection can share.
///
/// A plain `:memory:` database is private to the connection that opened it,
/// so it is mapped to a shared-cache URI named uniquely per adapter.
fn resolve_path(path: &str) -> String {
    if path == MEMORY_PATH {
        let seq = MEMORY_DB_SEQ.fetch_add(1, Ordering::Relaxed);
        format!("file:portico-mem-{seq}?mode=memory&cache=shared")
    } else {
        path.to_string()
    }
}

/// Configuration for the SQLite backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Base database path; `:memory:` for an in-memory database
    pub path: String,
}

/// Database file path for a tenant, derived from the base path.
fn tenant_path(base: &str, tenant_id: &str) -> String {
    let id = sanitize_tenant_id(tenant_id);
    if base == MEMORY_PATH {
        return MEMORY_PATH.to_string();
    }
    let path = Path::new(base);
    match (path.file_stem(), path.extension()) {
        (Some(stem), Some(ext)) => path
            .with_file_name(format!(
                "{}-{}.{}",
                stem.to_string_lossy(),
                id,
                ext.to_string_lossy()
            ))
            .to_string_lossy()
            .into_owned(),
        _ => format!("{base}-{id}"),
    }
}

/// Adapter for SQLite with file-per-tenant isolation.
pub struct SqliteAdapter {
    conn: Arc<Mutex<Connection>>,
    config: SqliteConfig,
    path: String,
    tenant: Option<String>,
    closed: AtomicBool,
}

impl SqliteAdapter {
    /// Open the root (untenanted) adapter, creating the file if needed.
    pub fn open(config: SqliteConfig) -> Result<Self> {
        let path = resolve_path(&config.path);
        let conn = open_connection(&path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            config,
            path,
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

    /// Run a closure against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| Error::internal("sqlite connection mutex poisoned"))?;
            f(&guard)
        })
        .await
        .map_err(|e| Error::internal(format!("blocking task failed: {e}")))?
    }
}

fn open_connection(path: &str) -> Result<Connection> {
    let conn = if path == MEMORY_PATH {
        Connection::open_in_memory()
            .map_err(|e| Error::connection_with_source("failed to open in-memory sqlite", e))?
    } else {
        // The only URI paths here are the in-memory ones from resolve_path;
        // nothing to create on disk for those.
        if !path.starts_with("file:") {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        Error::connection(format!("failed to create {}: {e}", parent.display()))
                    })?;
                }
            }
        }
        Connection::open(path)
            .map_err(|e| Error::connection_with_source(format!("failed to open {path}"), e))?
    };
    conn.busy_timeout(BUSY_TIMEOUT)
        .map_err(|e| Error::connection_with_source("failed to set busy timeout", e))?;
    Ok(conn)
}

fn convert_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::from(n),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(bytes) => Value::from(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::from(bytes.to_vec()),
    }
}

fn bind_args(args: &[Value]) -> Vec<rusqlite::types::Value> {
    args.iter()
        .map(|v| match v {
            Value::Null => rusqlite::types::Value::Null,
            Value::Bool { value } => rusqlite::types::Value::Integer(i64::from(*value)),
            Value::Integer { value } => rusqlite::types::Value::Integer(*value),
            Value::Float { value } => rusqlite::types::Value::Real(*value),
            Value::Text { value } => rusqlite::types::Value::Text(value.clone()),
            Value::Blob { value } => rusqlite::types::Value::Blob(value.clone()),
        })
        .collect()
}

/// Run one statement on an open connection.
fn run_statement(conn: &Connection, sql: &str, args: &[Value]) -> Result<QueryResult> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| Error::query_with_sql(e.to_string(), sql))?;
    let params = rusqlite::params_from_iter(bind_args(args));

    if stmt.column_count() == 0 {
        let affected = stmt
            .execute(params)
            .map_err(|e| Error::query_with_sql(e.to_string(), sql))?;
        let mut result = QueryResult::affected(affected as u64);
        result.last_insert_rowid = Some(conn.last_insert_rowid());
        return Ok(result);
    }

    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let mut rows_iter = stmt
        .query(params)
        .map_err(|e| Error::query_with_sql(e.to_string(), sql))?;

    let mut rows = Vec::new();
    while let Some(row) = rows_iter
        .next()
        .map_err(|e| Error::query_with_sql(e.to_string(), sql))?
    {
        let values = (0..columns.len())
            .map(|i| {
                row.get_ref(i)
                    .map(convert_value)
                    .map_err(|e| Error::query(e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        rows.push(Row::new(columns.clone(), values));
    }

    Ok(QueryResult {
        columns,
        rows,
        affected_rows: 0,
        last_insert_rowid: None,
    })
}

#[async_trait]
impl Adapter for SqliteAdapter {
    fn engine(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    fn tenant_id(&self) -> Option<&str> {
        self.tenant.as_deref()
    }

    async fn execute(&self, sql: &str, args: &[Value]) -> Result<QueryResult> {
        self.ensure_open()?;
        let sql = sql.to_string();
        let args = args.to_vec();
        self.with_conn(move |conn| run_statement(conn, &sql, &args))
            .await
    }

    async fn batch(&self, statements: &[Statement]) -> Result<()> {
        self.ensure_open()?;
        let statements = statements.to_vec();
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open_connection(&path)?;
            conn.execute_batch("BEGIN")
                .map_err(|e| Error::transaction(e.to_string()))?;
            for stmt in &statements {
                if let Err(e) = run_statement(&conn, &stmt.sql, &stmt.args) {
                    let _ = conn.execute_batch("ROLLBACK");
                    return Err(e);
                }
            }
            conn.execute_batch("COMMIT")
                .map_err(|e| Error::transaction(e.to_string()))
        })
        .await
        .map_err(|e| Error::internal(format!("blocking task failed: {e}")))?
    }

    async fn begin(&self) -> Result<Box<dyn AdapterTransaction>> {
        self.ensure_open()?;
        let path = self.path.clone();
        let conn = tokio::task::spawn_blocking(move || {
            let conn = open_connection(&path)?;
            conn.execute_batch("BEGIN")
                .map_err(|e| Error::transaction(e.to_string()))?;
            Ok::<_, Error>(conn)
        })
        .await
        .map_err(|e| Error::internal(format!("blocking task failed: {e}")))??;
        Ok(Box::new(SqliteTransaction {
            conn: Arc::new(Mutex::new(conn)),
        }))
    }

    async fn get_tenant(&self, tenant_id: &str) -> Result<Arc<dyn Adapter>> {
        self.ensure_open()?;
        let path = resolve_path(&tenant_path(&self.config.path, tenant_id));
        let conn = open_connection(&path)?;
        Ok(Arc::new(SqliteAdapter {
            conn: Arc::new(Mutex::new(conn)),
            config: self.config.clone(),
            path,
            tenant: Some(tenant_id.to_string()),
            closed: AtomicBool::new(false),
        }))
    }

    async fn create_tenant(&self, tenant_id: &str) -> Result<()> {
        self.ensure_open()?;
        let path = tenant_path(&self.config.path, tenant_id);
        // Opening the file creates the database.
        tokio::task::spawn_blocking(move || open_connection(&path).map(drop))
            .await
            .map_err(|e| Error::internal(format!("blocking task failed: {e}")))??;
        debug!(tenant = tenant_id, "tenant database file ready");
        Ok(())
    }

    async fn delete_tenant(&self, tenant_id: &str) -> Result<()> {
        self.ensure_open()?;
        if self.config.path == MEMORY_PATH {
            return Ok(());
        }
        let path = tenant_path(&self.config.path, tenant_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::tenant(format!("failed to remove {path}: {e}"))),
        }
    }

    async fn list_tenants(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        if self.config.path == MEMORY_PATH {
            return Ok(Vec::new());
        }

        let base = PathBuf::from(&self.config.path);
        let stem = base
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = base.extension().map(|e| e.to_string_lossy().into_owned());
        let dir = base
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let prefix = format!("{stem}-");

        let mut tenants = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::tenant(format!(
                    "failed to read {}: {e}",
                    dir.display()
                )))
            }
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::tenant(format!("failed to read {}: {e}", dir.display())))?
        {
            let name = PathBuf::from(entry.file_name());
            if name.extension().map(|e| e.to_string_lossy().into_owned()) != ext {
                continue;
            }
            if let Some(file_stem) = name.file_stem().map(|s| s.to_string_lossy().into_owned()) {
                if let Some(id) = file_stem.strip_prefix(&prefix) {
                    if !id.is_empty() {
                        tenants.push(id.to_string());
                    }
                }
            }
        }
        tenants.sort();
        Ok(tenants)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// A transaction holding its own connection for its whole lifetime.
///
/// Dropping it without commit or rollback closes the connection and SQLite
/// rolls the transaction back.
struct SqliteTransaction {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTransaction {
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| Error::internal("sqlite connection mutex poisoned"))?;
            f(&guard)
        })
        .await
        .map_err(|e| Error::internal(format!("blocking task failed: {e}")))?
    }
}

#[async_trait]
impl AdapterTransaction for SqliteTransaction {
    async fn execute(&self, sql: &str, args: &[Value]) -> Result<QueryResult> {
        let sql = sql.to_string();
        let args = args.to_vec();
        self.with_conn(move |conn| run_statement(conn, &sql, &args))
            .await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch("COMMIT")
                .map_err(|e| Error::transaction(e.to_string()))
        })
        .await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch("ROLLBACK")
                .map_err(|e| Error::transaction(e.to_string()))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::Statement;

    #[test]
    fn test_tenant_path() {
        assert_eq!(tenant_path("data/app.db", "acme"), "data/app-acme.db");
        assert_eq!(tenant_path("app", "acme"), "app-acme");
        assert_eq!(tenant_path(":memory:", "acme"), ":memory:");
        assert_eq!(tenant_path("data/app.db", "a/b"), "data/app-a_b.db");
    }

    #[test]
    fn test_resolve_path() {
        let a = resolve_path(MEMORY_PATH);
        let b = resolve_path(MEMORY_PATH);
        assert_ne!(a, b, "memory databases must not leak across adapters");
        assert!(a.starts_with("file:") && a.contains("mode=memory"));
        assert_eq!(resolve_path("data/app.db"), "data/app.db");
    }

    #[tokio::test]
    async fn test_execute_roundtrip() {
        let adapter = SqliteAdapter::open(SqliteConfig {
            path: MEMORY_PATH.to_string(),
        })
        .unwrap();

        adapter
            .execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", &[])
            .await
            .unwrap();
        let insert = adapter
            .execute(
                "INSERT INTO t (name) VALUES (?)",
                &[Value::from("alice")],
            )
            .await
            .unwrap();
        assert_eq!(insert.affected_rows, 1);
        assert_eq!(insert.last_insert_rowid, Some(1));

        let select = adapter.execute("SELECT id, name FROM t", &[]).await.unwrap();
        assert_eq!(select.columns, vec!["id", "name"]);
        assert_eq!(select.rows.len(), 1);
        assert_eq!(
            select.rows[0].get("name").and_then(Value::as_str),
            Some("alice")
        );
    }

    #[tokio::test]
    async fn test_batch_is_atomic() {
        let adapter = SqliteAdapter::open(SqliteConfig {
            path: MEMORY_PATH.to_string(),
        })
        .unwrap();
        adapter
            .execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", &[])
            .await
            .unwrap();

        let result = adapter
            .batch(&[
                Statement::new("INSERT INTO t (id) VALUES (1)"),
                Statement::new("INSERT INTO nonexistent VALUES (2)"),
            ])
            .await;
        assert!(result.is_err());

        let rows = adapter.execute("SELECT id FROM t", &[]).await.unwrap();
        assert!(rows.rows.is_empty(), "failed batch must leave no rows");
    }

    #[tokio::test]
    async fn test_transaction_commit_and_rollback() {
        let adapter = SqliteAdapter::open(SqliteConfig {
            path: MEMORY_PATH.to_string(),
        })
        .unwrap();
        adapter
            .execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", &[])
            .await
            .unwrap();

        let tx = adapter.begin().await.unwrap();
        tx.execute("INSERT INTO t (id) VALUES (1)", &[]).await.unwrap();
        tx.commit().await.unwrap();

        let tx = adapter.begin().await.unwrap();
        tx.execute("INSERT INTO t (id) VALUES (2)", &[]).await.unwrap();
        tx.rollback().await.unwrap();

        let rows = adapter.execute("SELECT id FROM t", &[]).await.unwrap();
        assert_eq!(rows.rows.len(), 1);
    }

    #[tokio::test]
    async fn test_stateless_execute_stays_out_of_open_transaction() {
        let adapter = SqliteAdapter::open(SqliteConfig {
            path: MEMORY_PATH.to_string(),
        })
        .unwrap();
        adapter
            .execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", &[])
            .await
            .unwrap();

        let tx = adapter.begin().await.unwrap();
        // A write outside the transaction must commit on its own and survive
        // the transaction's rollback.
        adapter
            .execute("INSERT INTO t (id) VALUES (9)", &[])
            .await
            .unwrap();
        tx.execute("INSERT INTO t (id) VALUES (1)", &[]).await.unwrap();
        tx.rollback().await.unwrap();

        let rows = adapter.execute("SELECT id FROM t", &[]).await.unwrap();
        assert_eq!(rows.rows.len(), 1);
        assert_eq!(rows.rows[0].get("id").and_then(Value::as_i64), Some(9));
    }

    #[tokio::test]
    async fn test_two_sessions_can_hold_transactions() {
        let adapter = SqliteAdapter::open(SqliteConfig {
            path: MEMORY_PATH.to_string(),
        })
        .unwrap();
        adapter
            .execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", &[])
            .await
            .unwrap();

        let tx1 = adapter.begin().await.unwrap();
        let tx2 = adapter.begin().await.unwrap();

        tx1.execute("INSERT INTO t (id) VALUES (1)", &[]).await.unwrap();
        tx1.commit().await.unwrap();
        tx2.execute("INSERT INTO t (id) VALUES (2)", &[]).await.unwrap();
        tx2.commit().await.unwrap();

        let rows = adapter.execute("SELECT id FROM t", &[]).await.unwrap();
        assert_eq!(rows.rows.len(), 2);
    }

    #[tokio::test]
    async fn test_close_rejects_further_calls() {
        let adapter = SqliteAdapter::open(SqliteConfig {
            path: MEMORY_PATH.to_string(),
        })
        .unwrap();
        adapter.close().await.unwrap();
        adapter.close().await.unwrap();
        assert!(adapter.execute("SELECT 1", &[]).await.is_err());
    }
}
