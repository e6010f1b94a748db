//! Error types for portico-adapter
//!
//! Provides granular error classification across the gateway:
//! - Fatal construction errors (configuration)
//! - Per-request errors (query, unknown session)
//! - Administrative endpoint errors (namespace CRUD)

use std::fmt;
use thiserror::Error;

/// Result type for portico-adapter operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connection-related errors (retriable)
    Connection,
    /// Query execution errors
    Query,
    /// Transaction errors
    Transaction,
    /// Invalid or rejected configuration (fatal at construction)
    Configuration,
    /// Requested engine has no configured adapter
    NotConfigured,
    /// Unknown or expired session baton
    UnknownSession,
    /// Administrative endpoint failure (namespace CRUD)
    AdminApi,
    /// Tenant management errors
    Tenant,
    /// Timeout errors (retriable)
    Timeout,
    /// Unknown/other errors
    Other,
}

impl ErrorCategory {
    /// Whether errors in this category are generally retriable
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection | Self::Timeout)
    }
}

/// Main error type for the gateway
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration, fatal at construction
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Requested engine has no configured adapter
    #[error("no adapter configured for engine '{engine}'")]
    NotConfigured { engine: String },

    /// Connection failed
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Query execution failed
    #[error("query error: {message}")]
    Query {
        message: String,
        sql: Option<String>,
    },

    /// Transaction error
    #[error("transaction error: {message}")]
    Transaction { message: String },

    /// Administrative endpoint returned a non-success status
    #[error("admin API error (status {status}): {message}")]
    AdminApi { status: u16, message: String },

    /// Tenant management failure
    #[error("tenant error: {message}")]
    Tenant { message: String },

    /// Unknown or expired session baton
    #[error("unknown or expired baton: {baton}")]
    UnknownSession { baton: String },

    /// Operation timed out
    #[error("timeout: {message}")]
    Timeout { message: String },

    /// Unsupported operation for this backend
    #[error("unsupported: {message}")]
    Unsupported { message: String },

    /// Internal error
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::NotConfigured { .. } => ErrorCategory::NotConfigured,
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Query { .. } => ErrorCategory::Query,
            Self::Transaction { .. } => ErrorCategory::Transaction,
            Self::AdminApi { .. } => ErrorCategory::AdminApi,
            Self::Tenant { .. } => ErrorCategory::Tenant,
            Self::UnknownSession { .. } => ErrorCategory::UnknownSession,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Unsupported { .. } | Self::Internal { .. } => ErrorCategory::Other,
        }
    }

    /// Whether this error is retriable
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a not-configured error
    pub fn not_configured(engine: impl Into<String>) -> Self {
        Self::NotConfigured {
            engine: engine.into(),
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a query error
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: None,
        }
    }

    /// Create a query error with SQL
    pub fn query_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
        }
    }

    /// Create a transaction error
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Create an admin API error
    pub fn admin_api(status: u16, message: impl Into<String>) -> Self {
        Self::AdminApi {
            status,
            message: message.into(),
        }
    }

    /// Create a tenant error
    pub fn tenant(message: impl Into<String>) -> Self {
        Self::Tenant {
            message: message.into(),
        }
    }

    /// Create an unknown-session error
    pub fn unknown_session(baton: impl Into<String>) -> Self {
        Self::UnknownSession {
            baton: baton.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create an unsupported operation error
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::Query => write!(f, "query"),
            Self::Transaction => write!(f, "transaction"),
            Self::Configuration => write!(f, "configuration"),
            Self::NotConfigured => write!(f, "not_configured"),
            Self::UnknownSession => write!(f, "unknown_session"),
            Self::AdminApi => write!(f, "admin_api"),
            Self::Tenant => write!(f, "tenant"),
            Self::Timeout => write!(f, "timeout"),
            Self::Other => write!(f, "other"),
        }
    }
}
