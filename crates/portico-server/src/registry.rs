//! Adapter registry and tenant routing.
//!
//! One root adapter exists per configured engine. Tenant-scoped adapters are
//! derived on demand and held in a bounded per-engine LRU cache; cache values
//! are `OnceCell`s so concurrent first access for the same tenant performs
//! exactly one backend creation. Evicted adapters are closed on a detached
//! task so no request path ever waits on teardown.

use lru::LruCache;
use portico_adapter::{Adapter, EngineKind, Error, Result};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};

use crate::config::{AdapterConfig, GatewayConfig, TenancyConfig};

type TenantCell = Arc<OnceCell<Arc<dyn Adapter>>>;

struct EngineEntry {
    root: Arc<dyn Adapter>,
    tenants: Mutex<LruCache<String, TenantCell>>,
}

/// Description of one configured engine, for the introspection surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineInfo {
    /// Engine kind
    pub kind: EngineKind,
    /// Whether this engine serves requests without an explicit selector
    pub default: bool,
}

/// Routes (engine, tenant) scopes to adapters.
pub struct Registry {
    engines: HashMap<EngineKind, EngineEntry>,
    default_kind: EngineKind,
    tenancy: TenancyConfig,
    closed: AtomicBool,
}

impl Registry {
    /// Build the registry from validated configuration, connecting each root.
    pub async fn from_config(config: &GatewayConfig) -> Result<Self> {
        config.validate()?;
        let mut adapters: Vec<Arc<dyn Adapter>> = Vec::with_capacity(config.adapters.len());
        for entry in &config.adapters {
            adapters.push(build_root(entry).await?);
        }
        let default_kind = config
            .default_kind()
            .ok_or_else(|| Error::config("at least one adapter must be configured"))?;
        Self::from_adapters(adapters, default_kind, config.tenancy.clone())
    }

    /// Build the registry from already-constructed root adapters.
    ///
    /// The first adapter's engine becomes the default unless `default_kind`
    /// names another configured engine.
    pub fn from_adapters(
        adapters: Vec<Arc<dyn Adapter>>,
        default_kind: EngineKind,
        tenancy: TenancyConfig,
    ) -> Result<Self> {
        if adapters.is_empty() {
            return Err(Error::config("at least one adapter must be configured"));
        }
        let capacity = NonZeroUsize::new(tenancy.max_tenants)
            .ok_or_else(|| Error::config("tenancy.max_tenants must be at least 1"))?;

        let mut engines = HashMap::new();
        for adapter in adapters {
            let kind = adapter.engine();
            if engines
                .insert(
                    kind,
                    EngineEntry {
                        root: adapter,
                        tenants: Mutex::new(LruCache::new(capacity)),
                    },
                )
                .is_some()
            {
                return Err(Error::config(format!(
                    "duplicate adapter for engine '{kind}'"
                )));
            }
        }
        if !engines.contains_key(&default_kind) {
            return Err(Error::config(format!(
                "default engine '{default_kind}' is not configured"
            )));
        }

        Ok(Self {
            engines,
            default_kind,
            tenancy,
            closed: AtomicBool::new(false),
        })
    }

    /// The engine used when a request names none.
    pub fn default_kind(&self) -> EngineKind {
        self.default_kind
    }

    /// Configured engines, default first.
    pub fn engines(&self) -> Vec<EngineInfo> {
        let mut infos: Vec<EngineInfo> = self
            .engines
            .keys()
            .map(|&kind| EngineInfo {
                kind,
                default: kind == self.default_kind,
            })
            .collect();
        infos.sort_by_key(|i| (!i.default, i.kind.to_string()));
        infos
    }

    fn entry(&self, kind: Option<EngineKind>) -> Result<(EngineKind, &EngineEntry)> {
        let kind = kind.unwrap_or(self.default_kind);
        let entry = self
            .engines
            .get(&kind)
            .ok_or_else(|| Error::not_configured(kind.to_string()))?;
        Ok((kind, entry))
    }

    /// Resolve the adapter for an (engine, tenant) scope.
    ///
    /// `kind = None` selects the default engine. `tenant = None` falls back
    /// to the configured default tenant, then to the root adapter. The tenant
    /// cache is bounded; the least recently used adapter is evicted and
    /// closed in the background when the bound is exceeded.
    pub async fn get_adapter(
        &self,
        kind: Option<EngineKind>,
        tenant: Option<&str>,
    ) -> Result<Arc<dyn Adapter>> {
        self.ensure_open()?;
        let (kind, entry) = self.entry(kind)?;

        let tenant = if self.tenancy.enabled {
            tenant
                .map(str::to_owned)
                .or_else(|| self.tenancy.default_tenant.clone())
        } else {
            None
        };
        let Some(tenant) = tenant else {
            return Ok(Arc::clone(&entry.root));
        };

        let cell = {
            let mut cache = entry.tenants.lock().await;
            if let Some(cell) = cache.get(&tenant) {
                Arc::clone(cell)
            } else {
                let cell: TenantCell = Arc::new(OnceCell::new());
                if let Some((evicted_id, evicted)) = cache.push(tenant.clone(), Arc::clone(&cell))
                {
                    close_detached(kind, evicted_id, evicted);
                }
                cell
            }
        };

        let root = Arc::clone(&entry.root);
        let auto_create = self.tenancy.auto_create;
        let adapter = cell
            .get_or_try_init(|| async {
                if auto_create {
                    // Best effort; first real use surfaces any hard failure.
                    if let Err(e) = root.create_tenant(&tenant).await {
                        debug!(engine = %kind, tenant = %tenant, error = %e,
                               "auto-create tenant failed");
                    }
                }
                root.get_tenant(&tenant).await
            })
            .await?;
        Ok(Arc::clone(adapter))
    }

    /// Create a tenant on an engine.
    pub async fn create_tenant(&self, kind: Option<EngineKind>, tenant: &str) -> Result<()> {
        self.ensure_open()?;
        let (_, entry) = self.entry(kind)?;
        entry.root.create_tenant(tenant).await
    }

    /// Delete a tenant, evicting and closing any cached adapter first.
    pub async fn delete_tenant(&self, kind: Option<EngineKind>, tenant: &str) -> Result<()> {
        self.ensure_open()?;
        let (kind, entry) = self.entry(kind)?;

        let cached = entry.tenants.lock().await.pop(tenant);
        if let Some(cell) = cached {
            if let Some(adapter) = cell.get() {
                if let Err(e) = adapter.close().await {
                    warn!(engine = %kind, tenant, error = %e,
                          "closing cached adapter before delete failed");
                }
            }
        }

        entry.root.delete_tenant(tenant).await
    }

    /// List tenants known to an engine's backend.
    pub async fn list_tenants(&self, kind: Option<EngineKind>) -> Result<Vec<String>> {
        self.ensure_open()?;
        let (_, entry) = self.entry(kind)?;
        entry.root.list_tenants().await
    }

    /// Close every cached tenant adapter, then every root adapter. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for (kind, entry) in &self.engines {
            let mut cache = entry.tenants.lock().await;
            while let Some((tenant, cell)) = cache.pop_lru() {
                if let Some(adapter) = cell.get() {
                    if let Err(e) = adapter.close().await {
                        warn!(engine = %kind, tenant = %tenant, error = %e,
                              "closing tenant adapter failed");
                    }
                }
            }
            drop(cache);
            if let Err(e) = entry.root.close().await {
                warn!(engine = %kind, error = %e, "closing root adapter failed");
            }
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::connection("registry is closed"));
        }
        Ok(())
    }
}

async fn build_root(config: &AdapterConfig) -> Result<Arc<dyn Adapter>> {
    use portico_adapter::{mysql, postgres, sqld, sqlite};

    Ok(match config.clone() {
        AdapterConfig::Sqld {
            urls, auth_token, ..
        } => Arc::new(sqld::SqldAdapter::new(sqld::SqldConfig { urls, auth_token })?),
        AdapterConfig::Postgres { url, .. } => {
            Arc::new(postgres::PostgresAdapter::connect(postgres::PostgresConfig { url }).await?)
        }
        AdapterConfig::Mysql { url, .. } => {
            Arc::new(mysql::MysqlAdapter::new(mysql::MysqlConfig { url })?)
        }
        AdapterConfig::Sqlite { path, .. } => {
            Arc::new(sqlite::SqliteAdapter::open(sqlite::SqliteConfig { path })?)
        }
    })
}

/// Close an evicted adapter without blocking the caller.
fn close_detached(kind: EngineKind, tenant: String, cell: TenantCell) {
    tokio::spawn(async move {
        if let Some(adapter) = cell.get() {
            if let Err(e) = adapter.close().await {
                warn!(engine = %kind, tenant = %tenant, error = %e,
                      "closing evicted adapter failed");
            }
        }
    });
}
