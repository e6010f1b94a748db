//! # portico-adapter
//!
//! Backend adapters for the Portico database gateway.
//!
//! This crate defines the engine-neutral [`Adapter`] contract plus one
//! implementation per supported engine family, each with its own tenant
//! isolation strategy.
//!
//! ## Backends
//!
//! - **sqld** ([`sqld::SqldAdapter`]): namespace per tenant, replica-aware
//!   read/write splitting over an HTTP pipeline
//! - **PostgreSQL** ([`postgres::PostgresAdapter`]): schema per tenant
//! - **MySQL/MariaDB** ([`mysql::MysqlAdapter`]): database per tenant
//! - **SQLite** ([`sqlite::SqliteAdapter`]): file per tenant
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use portico_adapter::prelude::*;
//! use portico_adapter::sqlite::{SqliteAdapter, SqliteConfig};
//!
//! let root = SqliteAdapter::open(SqliteConfig { path: "data/app.db".into() })?;
//! let tenant = root.get_tenant("acme").await?;
//! let rows = tenant.execute("SELECT * FROM users WHERE id = ?", &[Value::from(1_i64)]).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapter;
pub mod error;
pub mod security;
pub mod sql;
pub mod types;

// Backend implementations
pub mod mysql;
pub mod postgres;
pub mod sqld;
pub mod sqlite;

/// Prelude module for convenient imports
pub mod prelude {
    // Error types
    pub use crate::error::{Error, ErrorCategory, Result};

    // Value and type system
    pub use crate::types::{QueryResult, Row, Value};

    // Adapter contract
    pub use crate::adapter::{Adapter, AdapterTransaction, EngineKind, Statement};

    // SQL classification helpers
    pub use crate::sql::{is_ddl, is_write, split_statements, txn_control, TxnControl};

    // Identifier handling
    pub use crate::security::{sanitize_tenant_id, validate_identifier};
}

// Re-export commonly used items at crate root
pub use adapter::{Adapter, AdapterTransaction, EngineKind, Statement};
pub use error::{Error, ErrorCategory, Result};
pub use types::{QueryResult, Row, Value};

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_imports() {
        let _value = Value::from(42_i64);
        let _stmt = Statement::new("SELECT 1");
        let _kind = EngineKind::Sqlite;
    }

    #[test]
    fn test_error_types() {
        let err = Error::connection("test error");
        assert!(err.is_retriable());
        assert_eq!(err.category(), ErrorCategory::Connection);
    }

    #[test]
    fn test_classification() {
        assert!(is_write("INSERT INTO t VALUES (1)"));
        assert!(!is_write("SELECT 1"));
        assert_eq!(txn_control("BEGIN"), Some(TxnControl::Begin));
    }
}
