//! Gateway configuration.

use portico_adapter::{EngineKind, Error, Result};
use serde::{Deserialize, Serialize};

/// Top-level gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Address to bind the HTTP listener to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Configured backends, at least one; at most one per engine kind
    #[serde(default)]
    pub adapters: Vec<AdapterConfig>,

    /// Tenancy behavior
    #[serde(default)]
    pub tenancy: TenancyConfig,

    /// Idle sessions older than this are reaped
    #[serde(default = "default_session_idle_timeout_secs")]
    pub session_idle_timeout_secs: u64,
}

/// One configured backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdapterConfig {
    /// Namespace-capable replicated engine; first URL is the primary
    Sqld {
        /// Ordered connection URLs, primary first
        urls: Vec<String>,
        /// Optional bearer token for data and admin endpoints
        #[serde(default)]
        auth_token: Option<String>,
        /// Whether this backend is the default engine
        #[serde(default)]
        default: bool,
    },
    /// PostgreSQL
    Postgres {
        /// Connection URL
        url: String,
        /// Whether this backend is the default engine
        #[serde(default)]
        default: bool,
    },
    /// MySQL/MariaDB
    Mysql {
        /// Connection URL
        url: String,
        /// Whether this backend is the default engine
        #[serde(default)]
        default: bool,
    },
    /// Embedded SQLite
    Sqlite {
        /// Base database path
        path: String,
        /// Whether this backend is the default engine
        #[serde(default)]
        default: bool,
    },
}

impl AdapterConfig {
    /// The engine kind this entry configures
    pub fn kind(&self) -> EngineKind {
        match self {
            Self::Sqld { .. } => EngineKind::Sqld,
            Self::Postgres { .. } => EngineKind::Postgres,
            Self::Mysql { .. } => EngineKind::Mysql,
            Self::Sqlite { .. } => EngineKind::Sqlite,
        }
    }

    /// Whether this entry is marked as the default engine
    pub fn is_default(&self) -> bool {
        match self {
            Self::Sqld { default, .. }
            | Self::Postgres { default, .. }
            | Self::Mysql { default, .. }
            | Self::Sqlite { default, .. } => *default,
        }
    }
}

/// Tenancy behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenancyConfig {
    /// Whether tenant scoping is enabled at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Create tenants on first access instead of requiring an admin call
    #[serde(default = "default_true")]
    pub auto_create: bool,

    /// Bound on cached tenant adapters per engine
    #[serde(default = "default_max_tenants")]
    pub max_tenants: usize,

    /// HTTP header carrying the tenant id
    #[serde(default = "default_tenant_header")]
    pub header: String,

    /// Tenant to use when no header is present
    #[serde(default)]
    pub default_tenant: Option<String>,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_session_idle_timeout_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_max_tenants() -> usize {
    1000
}

fn default_tenant_header() -> String {
    "x-portico-tenant".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            adapters: Vec::new(),
            tenancy: TenancyConfig::default(),
            session_idle_timeout_secs: default_session_idle_timeout_secs(),
        }
    }
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            auto_create: default_true(),
            max_tenants: default_max_tenants(),
            header: default_tenant_header(),
            default_tenant: None,
        }
    }
}

impl GatewayConfig {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bind address
    pub fn with_bind_address(mut self, addr: impl Into<String>) -> Self {
        self.bind_address = addr.into();
        self
    }

    /// Set the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Add a backend
    pub fn with_adapter(mut self, adapter: AdapterConfig) -> Self {
        self.adapters.push(adapter);
        self
    }

    /// Set tenancy behavior
    pub fn with_tenancy(mut self, tenancy: TenancyConfig) -> Self {
        self.tenancy = tenancy;
        self
    }

    /// The engine that serves requests without an explicit engine selector.
    ///
    /// The entry marked `default`, or the first entry when none is marked.
    pub fn default_kind(&self) -> Option<EngineKind> {
        self.adapters
            .iter()
            .find(|a| a.is_default())
            .or_else(|| self.adapters.first())
            .map(AdapterConfig::kind)
    }

    /// Validate the configuration; all failures here are fatal at startup.
    pub fn validate(&self) -> Result<()> {
        if self.adapters.is_empty() {
            return Err(Error::config("at least one adapter must be configured"));
        }

        let mut kinds = Vec::new();
        for adapter in &self.adapters {
            let kind = adapter.kind();
            if kinds.contains(&kind) {
                return Err(Error::config(format!(
                    "duplicate adapter for engine '{kind}'"
                )));
            }
            kinds.push(kind);
        }

        let defaults = self.adapters.iter().filter(|a| a.is_default()).count();
        if defaults > 1 {
            return Err(Error::config("more than one adapter marked as default"));
        }

        if self.tenancy.max_tenants == 0 {
            return Err(Error::config("tenancy.max_tenants must be at least 1"));
        }

        Ok(())
    }
}
