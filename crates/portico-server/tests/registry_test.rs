//! Registry behavior: scope resolution, tenant cache, eviction, shutdown.

mod common;

use common::{MockAdapter, MockBackend};
use portico_adapter::{Adapter, EngineKind, ErrorCategory};
use portico_server::{Registry, TenancyConfig};
use std::sync::Arc;
use std::time::Duration;

fn tenancy(max_tenants: usize, auto_create: bool) -> TenancyConfig {
    TenancyConfig {
        enabled: true,
        auto_create,
        max_tenants,
        ..TenancyConfig::default()
    }
}

fn registry_with(
    kind: EngineKind,
    tenancy: TenancyConfig,
) -> (Arc<Registry>, Arc<MockBackend>) {
    let (adapter, backend) = MockAdapter::new(kind);
    let registry =
        Registry::from_adapters(vec![adapter as Arc<dyn Adapter>], kind, tenancy).unwrap();
    (Arc::new(registry), backend)
}

#[tokio::test]
async fn test_no_tenant_resolves_to_root() {
    let (registry, _) = registry_with(EngineKind::Sqlite, tenancy(4, false));
    let adapter = registry.get_adapter(None, None).await.unwrap();
    assert_eq!(adapter.engine(), EngineKind::Sqlite);
    assert!(adapter.tenant_id().is_none());
}

#[tokio::test]
async fn test_unconfigured_engine_is_an_error() {
    let (registry, _) = registry_with(EngineKind::Sqlite, tenancy(4, false));
    let err = registry
        .get_adapter(Some(EngineKind::Postgres), None)
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::NotConfigured);
}

#[tokio::test]
async fn test_default_engine_resolution() {
    let (sqlite, _) = MockAdapter::new(EngineKind::Sqlite);
    let (postgres, _) = MockAdapter::new(EngineKind::Postgres);
    let registry = Registry::from_adapters(
        vec![
            sqlite as Arc<dyn Adapter>,
            postgres as Arc<dyn Adapter>,
        ],
        EngineKind::Postgres,
        tenancy(4, false),
    )
    .unwrap();

    assert_eq!(
        registry.get_adapter(None, None).await.unwrap().engine(),
        EngineKind::Postgres
    );
    assert_eq!(
        registry
            .get_adapter(Some(EngineKind::Sqlite), None)
            .await
            .unwrap()
            .engine(),
        EngineKind::Sqlite
    );

    let engines = registry.engines();
    assert_eq!(engines.len(), 2);
    assert_eq!(engines[0].kind, EngineKind::Postgres);
    assert!(engines[0].default);
}

#[tokio::test]
async fn test_repeated_access_returns_cached_instance() {
    let (registry, _) = registry_with(EngineKind::Sqlite, tenancy(4, false));
    let first = registry.get_adapter(None, Some("acme")).await.unwrap();
    let second = registry.get_adapter(None, Some("acme")).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.tenant_id(), Some("acme"));
}

#[tokio::test]
async fn test_lru_eviction_closes_adapter_in_background() {
    let (registry, backend) = registry_with(EngineKind::Sqlite, tenancy(2, false));

    let t1 = registry.get_adapter(None, Some("t1")).await.unwrap();
    registry.get_adapter(None, Some("t2")).await.unwrap();
    registry.get_adapter(None, Some("t3")).await.unwrap();

    // Eviction close runs on a detached task.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(backend.close_count(Some("t1")), 1);
    assert_eq!(backend.close_count(Some("t2")), 0);
    assert_eq!(backend.close_count(Some("t3")), 0);

    // Re-access after eviction creates a fresh instance.
    let t1_again = registry.get_adapter(None, Some("t1")).await.unwrap();
    assert!(!Arc::ptr_eq(&t1, &t1_again));
}

#[tokio::test]
async fn test_access_promotes_to_mru() {
    let (registry, backend) = registry_with(EngineKind::Sqlite, tenancy(2, false));

    registry.get_adapter(None, Some("t1")).await.unwrap();
    registry.get_adapter(None, Some("t2")).await.unwrap();
    // Touch t1 so t2 becomes the eviction candidate.
    registry.get_adapter(None, Some("t1")).await.unwrap();
    registry.get_adapter(None, Some("t3")).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(backend.close_count(Some("t1")), 0);
    assert_eq!(backend.close_count(Some("t2")), 1);
}

#[tokio::test]
async fn test_auto_create_fires_on_first_access_only() {
    let (registry, backend) = registry_with(EngineKind::Sqlite, tenancy(4, true));
    registry.get_adapter(None, Some("acme")).await.unwrap();
    registry.get_adapter(None, Some("acme")).await.unwrap();
    assert_eq!(backend.create_calls.lock().unwrap().as_slice(), ["acme"]);
}

#[tokio::test]
async fn test_no_auto_create_when_disabled() {
    let (registry, backend) = registry_with(EngineKind::Sqlite, tenancy(4, false));
    registry.get_adapter(None, Some("acme")).await.unwrap();
    assert!(backend.create_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_tenancy_disabled_ignores_tenant() {
    let (adapter, _) = MockAdapter::new(EngineKind::Sqlite);
    let registry = Registry::from_adapters(
        vec![adapter as Arc<dyn Adapter>],
        EngineKind::Sqlite,
        TenancyConfig {
            enabled: false,
            ..TenancyConfig::default()
        },
    )
    .unwrap();

    let scoped = registry.get_adapter(None, Some("acme")).await.unwrap();
    assert!(scoped.tenant_id().is_none());
}

#[tokio::test]
async fn test_default_tenant_fallback() {
    let (adapter, _) = MockAdapter::new(EngineKind::Sqlite);
    let registry = Registry::from_adapters(
        vec![adapter as Arc<dyn Adapter>],
        EngineKind::Sqlite,
        TenancyConfig {
            default_tenant: Some("main".to_string()),
            auto_create: false,
            ..TenancyConfig::default()
        },
    )
    .unwrap();

    let scoped = registry.get_adapter(None, None).await.unwrap();
    assert_eq!(scoped.tenant_id(), Some("main"));
}

#[tokio::test]
async fn test_delete_evicts_and_closes_cached_adapter() {
    let (registry, backend) = registry_with(EngineKind::Sqlite, tenancy(4, false));

    registry.get_adapter(None, Some("acme")).await.unwrap();
    registry.delete_tenant(None, "acme").await.unwrap();

    assert_eq!(backend.close_count(Some("acme")), 1);
    assert_eq!(backend.delete_calls.lock().unwrap().as_slice(), ["acme"]);
}

#[tokio::test]
async fn test_create_and_list_delegate_to_root() {
    let (registry, backend) = registry_with(EngineKind::Sqlite, tenancy(4, false));
    registry.create_tenant(None, "acme").await.unwrap();
    assert_eq!(backend.create_calls.lock().unwrap().as_slice(), ["acme"]);
    assert_eq!(registry.list_tenants(None).await.unwrap(), ["acme"]);
}

#[tokio::test]
async fn test_close_is_idempotent_and_closes_everything() {
    let (registry, backend) = registry_with(EngineKind::Sqlite, tenancy(4, false));
    registry.get_adapter(None, Some("t1")).await.unwrap();
    registry.get_adapter(None, Some("t2")).await.unwrap();

    registry.close().await;
    registry.close().await;

    assert_eq!(backend.close_count(Some("t1")), 1);
    assert_eq!(backend.close_count(Some("t2")), 1);
    assert_eq!(backend.close_count(None), 1);
    assert!(registry.get_adapter(None, None).await.is_err());
}

#[tokio::test]
async fn test_concurrent_first_access_creates_once() {
    let (registry, backend) = registry_with(EngineKind::Sqlite, tenancy(4, true));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            registry.get_adapter(None, Some("acme")).await.unwrap()
        }));
    }
    let mut adapters = Vec::new();
    for handle in handles {
        adapters.push(handle.await.unwrap());
    }

    for adapter in &adapters[1..] {
        assert!(Arc::ptr_eq(&adapters[0], adapter));
    }
    assert_eq!(backend.create_calls.lock().unwrap().len(), 1);
}
