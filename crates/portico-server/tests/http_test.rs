//! End-to-end HTTP tests against an in-memory SQLite backend.

use portico_server::{AdapterConfig, GatewayConfig, GatewayServer};
use serde_json::json;

async fn spawn_gateway() -> String {
    let config = GatewayConfig::new()
        .with_bind_address("127.0.0.1")
        .with_port(0)
        .with_adapter(AdapterConfig::Sqlite {
            path: ":memory:".to_string(),
            default: true,
        });

    let server = GatewayServer::new(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.start());
    format!("http://{addr}")
}

#[tokio::test]
async fn test_health_and_engines() {
    let base = spawn_gateway().await;
    let client = reqwest::Client::new();

    let health: serde_json::Value = client
        .get(format!("{base}/v1/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["engines"][0]["engine"], "sqlite");
    assert_eq!(health["engines"][0]["healthy"], true);

    let engines: serde_json::Value = client
        .get(format!("{base}/v1/engines"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(engines[0]["kind"], "sqlite");
    assert_eq!(engines[0]["default"], true);
}

#[tokio::test]
async fn test_pipeline_and_introspection_roundtrip() {
    let base = spawn_gateway().await;
    let client = reqwest::Client::new();

    let body = json!({
        "requests": [
            {"type": "execute", "stmt": {"sql": "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)"}},
            {"type": "execute", "stmt": {"sql": "INSERT INTO users (name) VALUES (?)",
                                          "args": [{"type": "text", "value": "alice"}]}},
            {"type": "execute", "stmt": {"sql": "SELECT name FROM users"}}
        ]
    });
    let resp = client
        .post(format!("{base}/v1/pipeline"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let pipeline: serde_json::Value = resp.json().await.unwrap();
    assert!(pipeline["baton"].is_null());
    assert_eq!(pipeline["results"][0]["type"], "ok");
    assert_eq!(pipeline["results"][1]["type"], "ok");
    assert_eq!(
        pipeline["results"][2]["response"]["result"]["rows"][0]["values"][0]["value"],
        "alice"
    );

    let tables: serde_json::Value = client
        .get(format!("{base}/v1/tables"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(tables, json!(["users"]));

    let schema: serde_json::Value = client
        .get(format!("{base}/v1/tables/users/schema"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(schema[0]["name"], "id");

    let rows: serde_json::Value = client
        .get(format!("{base}/v1/tables/users/rows?limit=10"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rows["rows"][0][1]["value"], "alice");

    let query: serde_json::Value = client
        .post(format!("{base}/v1/query"))
        .json(&json!({"sql": "SELECT count(*) AS c FROM users"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(query["row_count"], 1);
    assert_eq!(query["rows"][0][0]["value"], 1);
}

#[tokio::test]
async fn test_unconfigured_engine_maps_to_404() {
    let base = spawn_gateway().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/v1/pipeline?engine=postgres"))
        .json(&json!({"requests": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .post(format!("{base}/v1/pipeline?engine=warpdrive"))
        .json(&json!({"requests": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_invalid_table_name_is_rejected() {
    let base = spawn_gateway().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{base}/v1/tables/users%3B%20DROP/schema"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_session_baton_over_http() {
    let base = spawn_gateway().await;
    let client = reqwest::Client::new();

    let first: serde_json::Value = client
        .post(format!("{base}/v1/pipeline"))
        .json(&json!({
            "requests": [
                {"type": "store_sql", "sql_id": "q1", "sql": "SELECT 1 AS one"}
            ]
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let baton = first["baton"].as_str().expect("baton expected").to_string();

    let second: serde_json::Value = client
        .post(format!("{base}/v1/pipeline"))
        .json(&json!({
            "baton": baton,
            "requests": [
                {"type": "execute", "stmt": {"sql_id": "q1"}},
                {"type": "close"}
            ]
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(second["results"][0]["type"], "ok");
    assert_eq!(second["results"][1]["type"], "ok");
    assert!(second["baton"].is_null());
}
