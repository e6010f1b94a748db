//! The backend adapter contract.
//!
//! One [`Adapter`] instance exists per configured engine; tenant-scoped
//! instances are derived from the root instance via [`Adapter::get_tenant`]
//! and are logically independent once created. The pipeline engine holds
//! transactions open across calls, so transactions are explicit
//! [`AdapterTransaction`] handles rather than a closure-based API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::{QueryResult, Row, Value};

/// The engine families the gateway can front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Namespace-capable embedded/replicated SQL engine (libsql/sqld family)
    Sqld,
    /// PostgreSQL, tenant isolation by schema
    Postgres,
    /// MySQL/MariaDB, tenant isolation by database
    Mysql,
    /// SQLite, tenant isolation by file
    Sqlite,
}

impl EngineKind {
    /// SQL that lists user tables for this engine.
    pub fn list_tables_sql(&self) -> &'static str {
        match self {
            Self::Sqld | Self::Sqlite => {
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name"
            }
            Self::Postgres => {
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = current_schema() ORDER BY table_name"
            }
            Self::Mysql => {
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = DATABASE() ORDER BY table_name"
            }
        }
    }

    /// SQL that lists column name/type pairs for a table.
    ///
    /// The table name must pass identifier validation before interpolation.
    pub fn table_columns_sql(&self, table: &str) -> String {
        match self {
            Self::Sqld | Self::Sqlite => {
                format!("SELECT name, type FROM pragma_table_info('{table}')")
            }
            Self::Postgres => format!(
                "SELECT column_name, data_type FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND table_name = '{table}' \
                 ORDER BY ordinal_position"
            ),
            Self::Mysql => format!(
                "SELECT column_name, data_type FROM information_schema.columns \
                 WHERE table_schema = DATABASE() AND table_name = '{table}' \
                 ORDER BY ordinal_position"
            ),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqld => write!(f, "sqld"),
            Self::Postgres => write!(f, "postgres"),
            Self::Mysql => write!(f, "mysql"),
            Self::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl FromStr for EngineKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sqld" | "libsql" => Ok(Self::Sqld),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::Mysql),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(Error::config(format!("unknown engine kind '{other}'"))),
        }
    }
}

/// A statement plus its positional arguments.
#[derive(Debug, Clone, Default)]
pub struct Statement {
    /// SQL text
    pub sql: String,
    /// Positional arguments
    pub args: Vec<Value>,
}

impl Statement {
    /// Create a statement without arguments
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            args: Vec::new(),
        }
    }

    /// Create a statement with arguments
    pub fn with_args(sql: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            args,
        }
    }
}

/// The capability contract every backend implements.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Which engine family this adapter fronts
    fn engine(&self) -> EngineKind;

    /// The tenant this adapter is scoped to, `None` for the root instance
    fn tenant_id(&self) -> Option<&str>;

    /// Execute a statement and return its full result
    async fn execute(&self, sql: &str, args: &[Value]) -> Result<QueryResult>;

    /// Execute a statement and return the first row, if any
    async fn execute_one(&self, sql: &str, args: &[Value]) -> Result<Option<Row>> {
        Ok(self.execute(sql, args).await?.into_first_row())
    }

    /// Execute a list of statements atomically: all succeed or none apply
    async fn batch(&self, statements: &[Statement]) -> Result<()>;

    /// Begin an explicit transaction
    async fn begin(&self) -> Result<Box<dyn AdapterTransaction>>;

    /// Derive a tenant-scoped adapter from this (root) instance
    async fn get_tenant(&self, tenant_id: &str) -> Result<Arc<dyn Adapter>>;

    /// Create a tenant ("already exists" is not an error)
    async fn create_tenant(&self, tenant_id: &str) -> Result<()>;

    /// Delete a tenant ("not found" is not an error)
    async fn delete_tenant(&self, tenant_id: &str) -> Result<()>;

    /// List tenants known to the backend
    async fn list_tenants(&self) -> Result<Vec<String>>;

    /// Close the adapter; idempotent, does not affect the root instance
    async fn close(&self) -> Result<()>;
}

impl fmt::Debug for dyn Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter")
            .field("engine", &self.engine())
            .field("tenant_id", &self.tenant_id())
            .finish_non_exhaustive()
    }
}

/// An open transaction on an adapter's single logical connection.
#[async_trait]
pub trait AdapterTransaction: Send + Sync {
    /// Execute a statement inside the transaction
    async fn execute(&self, sql: &str, args: &[Value]) -> Result<QueryResult>;

    /// Execute and return the first row, if any
    async fn execute_one(&self, sql: &str, args: &[Value]) -> Result<Option<Row>> {
        Ok(self.execute(sql, args).await?.into_first_row())
    }

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Roll the transaction back
    async fn rollback(self: Box<Self>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_kind_parse() {
        assert_eq!("sqld".parse::<EngineKind>().unwrap(), EngineKind::Sqld);
        assert_eq!("libsql".parse::<EngineKind>().unwrap(), EngineKind::Sqld);
        assert_eq!(
            "postgresql".parse::<EngineKind>().unwrap(),
            EngineKind::Postgres
        );
        assert_eq!("MariaDB".parse::<EngineKind>().unwrap(), EngineKind::Mysql);
        assert!("oracle".parse::<EngineKind>().is_err());
    }

    #[test]
    fn test_engine_kind_display_roundtrip() {
        for kind in [
            EngineKind::Sqld,
            EngineKind::Postgres,
            EngineKind::Mysql,
            EngineKind::Sqlite,
        ] {
            assert_eq!(kind.to_string().parse::<EngineKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_engine_kind_serde() {
        let json = serde_json::to_string(&EngineKind::Postgres).unwrap();
        assert_eq!(json, "\"postgres\"");
        let kind: EngineKind = serde_json::from_str("\"sqld\"").unwrap();
        assert_eq!(kind, EngineKind::Sqld);
    }
}
