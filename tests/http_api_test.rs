//! HTTP API Tests
//!
//! Drives the full router in-process with `tower::ServiceExt::oneshot`
//! over an in-memory durable store.

use axum::body::{to_bytes, Body, Bytes};
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use nsdoc::config::ServiceConfig;
use nsdoc::handler::MergeStrategy;
use nsdoc::http::{router, ServiceState};
use nsdoc::store::{DurableStore, InMemoryDurableStore};
use nsdoc::sync::CorruptPayloadPolicy;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const FALLBACK_URL: &str = "https://global.trabur.workers.dev";

struct TestApp {
    app: Router,
    store: InMemoryDurableStore,
}

struct TestResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl TestResponse {
    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    fn text(&self) -> String {
        String::from_utf8(self.body.to_vec()).unwrap()
    }
}

impl TestApp {
    fn new() -> Self {
        Self::with_config(ServiceConfig::test())
    }

    fn with_config(config: ServiceConfig) -> Self {
        let store = InMemoryDurableStore::new();
        let state = ServiceState::new(Arc::new(store.clone()), &config);
        TestApp {
            app: router(state),
            store,
        }
    }

    async fn request(&self, method: Method, uri: &str, body: Option<&str>) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if body.is_some() {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
        }
        let request = builder
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        TestResponse {
            status,
            headers,
            body,
        }
    }

    async fn get(&self, uri: &str) -> TestResponse {
        self.request(Method::GET, uri, None).await
    }

    async fn post(&self, uri: &str, body: Value) -> TestResponse {
        self.request(Method::POST, uri, Some(&body.to_string())).await
    }

    async fn put(&self, uri: &str, body: Value) -> TestResponse {
        self.request(Method::PUT, uri, Some(&body.to_string())).await
    }

    async fn delete(&self, uri: &str) -> TestResponse {
        self.request(Method::DELETE, uri, None).await
    }

    async fn seed(&self, key: &str, blob: Value) {
        self.store.put(key, blob.to_string().as_bytes()).await.unwrap();
    }

    fn stored(&self, key: &str) -> Option<Value> {
        self.store
            .raw(key)
            .map(|raw| serde_json::from_slice(&raw).unwrap())
    }
}

fn created_id(response: &TestResponse) -> String {
    assert_eq!(response.status, StatusCode::OK, "{}", response.text());
    response.json()["id"].as_str().unwrap().to_string()
}

// =============================================================================
// CRUD
// =============================================================================

#[tokio::test]
async fn test_create_then_get() {
    let app = TestApp::new();

    let created = app
        .post("/levels/acme", json!({"name": "gold", "number": 3, "extra": true}))
        .await;
    let id = created_id(&created);
    assert_eq!(created.json()["name"], "gold");
    assert_eq!(created.json()["extra"], true);

    let fetched = app.get(&format!("/levels/acme/{}", id)).await;
    assert_eq!(fetched.status, StatusCode::OK);
    assert_eq!(fetched.json(), created.json());

    let stored = app.stored("levels:acme").unwrap();
    assert_eq!(stored, json!([created.json()]));
}

#[tokio::test]
async fn test_create_assigns_fresh_uuid() {
    let app = TestApp::new();
    let id = created_id(&app.post("/levels/acme", json!({"id": "mine"})).await);

    assert_ne!(id, "mine");
    assert_eq!(id.len(), 36);
    assert_eq!(id.chars().nth(14), Some('4'));
}

#[tokio::test]
async fn test_list_with_and_without_trailing_slash() {
    let app = TestApp::new();
    assert_eq!(app.get("/levels/acme/").await.json(), json!([]));

    let a = created_id(&app.post("/levels/acme", json!({"name": "a"})).await);
    let b = created_id(&app.post("/levels/acme/", json!({"name": "b"})).await);

    for uri in ["/levels/acme/", "/levels/acme"] {
        let listed = app.get(uri).await;
        assert_eq!(listed.status, StatusCode::OK);
        let ids: Vec<Value> = listed
            .json()
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["id"].clone())
            .collect();
        assert_eq!(ids, vec![json!(a), json!(b)]);
    }
}

#[tokio::test]
async fn test_get_missing_is_null() {
    let app = TestApp::new();
    let response = app.get("/levels/acme/nope").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json(), Value::Null);
}

#[tokio::test]
async fn test_update_missing_is_404() {
    let app = TestApp::new();
    let response = app.put("/levels/acme/nope", json!({"name": "x"})).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(
        response.json(),
        json!({"error": "An access key with that id does not exist."})
    );
}

#[tokio::test]
async fn test_partial_update_keeps_untouched_fields() {
    let app = TestApp::new();
    let id = created_id(
        &app.post(
            "/levels/acme",
            json!({"name": "gold", "description": "best", "requestsPerDay": 10}),
        )
        .await,
    );

    let updated = app
        .put(&format!("/levels/acme/{}", id), json!({"requestsPerDay": 20, "colour": "red"}))
        .await;
    assert_eq!(updated.status, StatusCode::OK);
    assert_eq!(
        updated.json(),
        json!({"id": id, "name": "gold", "description": "best", "requestsPerDay": 20})
    );

    let fetched = app.get(&format!("/levels/acme/{}", id)).await;
    assert_eq!(fetched.json(), updated.json());
}

#[tokio::test]
async fn test_falsy_values_do_not_overwrite_by_default() {
    let app = TestApp::new();
    let id = created_id(
        &app.post("/levels/acme", json!({"name": "gold", "number": 3})).await,
    );

    let updated = app
        .put(&format!("/levels/acme/{}", id), json!({"name": "", "number": 0}))
        .await;
    assert_eq!(updated.json()["name"], "gold");
    assert_eq!(updated.json()["number"], 3);
}

#[tokio::test]
async fn test_keep_on_missing_merge_clears_fields() {
    let app = TestApp::with_config(ServiceConfig {
        merge: MergeStrategy::KeepOnMissing,
        ..ServiceConfig::test()
    });
    let id = created_id(
        &app.post("/levels/acme", json!({"name": "gold", "number": 3})).await,
    );

    let updated = app
        .put(&format!("/levels/acme/{}", id), json!({"name": "", "number": null}))
        .await;
    assert_eq!(updated.json()["name"], "");
    assert_eq!(updated.json()["number"], 3);
}

#[tokio::test]
async fn test_delete_then_get() {
    let app = TestApp::new();
    let id = created_id(&app.post("/levels/acme", json!({"name": "a"})).await);

    let deleted = app.delete(&format!("/levels/acme/{}", id)).await;
    assert_eq!(deleted.status, StatusCode::OK);
    assert_eq!(deleted.json(), Value::Null);

    assert_eq!(app.get(&format!("/levels/acme/{}", id)).await.json(), Value::Null);
    assert_eq!(app.stored("levels:acme"), Some(json!([])));
}

#[tokio::test]
async fn test_delete_missing_succeeds() {
    let app = TestApp::new();
    let deleted = app.delete("/levels/acme/ghost").await;
    assert_eq!(deleted.status, StatusCode::OK);
    assert_eq!(deleted.json(), Value::Null);
}

#[tokio::test]
async fn test_namespaces_are_isolated() {
    let app = TestApp::new();
    let id = created_id(&app.post("/levels/alpha", json!({"name": "a"})).await);

    assert_eq!(app.get(&format!("/levels/beta/{}", id)).await.json(), Value::Null);
    assert_eq!(app.get("/levels/beta/").await.json(), json!([]));
    assert!(app.stored("levels:beta").is_none());
    assert_eq!(app.stored("levels:alpha").unwrap().as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_legacy_fields_are_not_returned() {
    let app = TestApp::new();
    app.seed(
        "levels:acme",
        json!([{"id": "l1", "name": "old", "$loki": 1, "meta": {"revision": 0}}]),
    )
    .await;

    assert_eq!(app.get("/levels/acme/l1").await.json(), json!({"id": "l1", "name": "old"}));

    app.put("/levels/acme/l1", json!({"name": "new"})).await;
    assert_eq!(app.stored("levels:acme"), Some(json!([{"id": "l1", "name": "new"}])));
}

// =============================================================================
// Foreign keys
// =============================================================================

#[tokio::test]
async fn test_website_create_requires_platform() {
    let app = TestApp::new();

    let rejected = app
        .post("/websites/acme", json!({"frontendDomainName": "a.dev", "platformId": "p1"}))
        .await;
    assert_eq!(rejected.status, StatusCode::NOT_FOUND);
    assert_eq!(
        rejected.json(),
        json!({"error": "The provided platform id foreign key does not exist."})
    );
    assert!(app.stored("websites:acme").is_none());

    app.seed("platforms:acme", json!([{"id": "p1"}])).await;
    let id = created_id(
        &app.post("/websites/acme", json!({"frontendDomainName": "a.dev", "platformId": "p1"}))
            .await,
    );
    assert_eq!(
        app.get(&format!("/websites/acme/{}", id)).await.json()["platformId"],
        "p1"
    );
}

#[tokio::test]
async fn test_platform_from_other_namespace_does_not_count() {
    let app = TestApp::new();
    app.seed("platforms:other", json!([{"id": "p1"}])).await;

    let rejected = app.post("/websites/acme", json!({"platformId": "p1"})).await;
    assert_eq!(rejected.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_website_update_rechecks_platform() {
    let app = TestApp::new();
    app.seed("platforms:acme", json!([{"id": "p1"}, {"id": "p2"}])).await;
    let id = created_id(
        &app.post("/websites/acme", json!({"frontendDomainName": "a.dev", "platformId": "p1"}))
            .await,
    );
    let uri = format!("/websites/acme/{}", id);

    let moved = app.put(&uri, json!({"platformId": "p2"})).await;
    assert_eq!(moved.status, StatusCode::OK);
    assert_eq!(moved.json()["platformId"], "p2");
    assert_eq!(moved.json()["frontendDomainName"], "a.dev");

    let before = app.stored("websites:acme");
    let rejected = app.put(&uri, json!({"platformId": "p9"})).await;
    assert_eq!(rejected.status, StatusCode::NOT_FOUND);
    assert_eq!(
        rejected.json()["error"],
        "The provided platform id foreign key does not exist."
    );
    assert_eq!(app.stored("websites:acme"), before);

    let missing = app.put("/websites/acme/nope", json!({"platformId": "p1"})).await;
    assert_eq!(missing.json()["error"], "An access key with that id does not exist.");
}

// =============================================================================
// Envelope and routing
// =============================================================================

#[tokio::test]
async fn test_json_responses_carry_cors_headers() {
    let app = TestApp::new();

    for response in [
        app.get("/levels/acme/").await,
        app.put("/levels/acme/nope", json!({})).await,
        app.get("/websites/acme/x").await,
    ] {
        assert_eq!(
            response.headers.get(header::CONTENT_TYPE).unwrap(),
            "application/json;charset=UTF-8"
        );
        assert_eq!(response.headers.get("access-control-allow-origin").unwrap(), "*");
        assert_eq!(
            response.headers.get("access-control-allow-methods").unwrap(),
            "GET,POST,PUT,DELETE,HEAD,OPTIONS"
        );
        assert_eq!(
            response.headers.get("access-control-allow-headers").unwrap(),
            "content-type"
        );
        assert_eq!(response.headers.get("access-control-max-age").unwrap(), "86400");
    }
}

#[tokio::test]
async fn test_levels_unmatched_is_plain_404() {
    let app = TestApp::new();

    for response in [
        app.get("/levels").await,
        app.get("/levels/acme/x/y").await,
        app.request(Method::PATCH, "/levels/acme/x", Some("{}")).await,
        app.request(Method::DELETE, "/levels/acme", None).await,
    ] {
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(response.text(), "Not Found.");
    }
}

#[tokio::test]
async fn test_websites_unmatched_returns_fallback_url() {
    let app = TestApp::new();

    for response in [
        app.get("/websites").await,
        app.request(Method::OPTIONS, "/websites/acme", None).await,
        app.request(Method::PATCH, "/websites/acme/x", Some("{}")).await,
    ] {
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.json(), json!(FALLBACK_URL));
    }
}

#[tokio::test]
async fn test_fallback_url_is_configurable() {
    let app = TestApp::with_config(ServiceConfig {
        fallback_url: "https://example.test".to_string(),
        ..ServiceConfig::test()
    });
    assert_eq!(app.get("/websites").await.json(), json!("https://example.test"));
}

#[tokio::test]
async fn test_unknown_resource_is_404() {
    let app = TestApp::new();
    assert_eq!(app.get("/platforms/acme/").await.status, StatusCode::NOT_FOUND);
    assert_eq!(app.get("/").await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_body_is_400() {
    let app = TestApp::new();

    let response = app.request(Method::POST, "/levels/acme", Some("{not json")).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(response.json()["error"].as_str().unwrap().starts_with("Invalid request body"));

    let response = app.post("/levels/acme", json!("a string")).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let response = app.request(Method::POST, "/levels/acme", None).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(app.stored("levels:acme").is_none());
}

// =============================================================================
// Corrupt payloads
// =============================================================================

#[tokio::test]
async fn test_corrupt_blob_fails_by_default() {
    let app = TestApp::new();
    app.store.put("levels:acme", b"{\"not\": \"an array\"").await.unwrap();

    let response = app.get("/levels/acme/").await;
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.json()["error"].is_string());
}

#[tokio::test]
async fn test_corrupt_blob_treated_as_empty_when_configured() {
    let mut config = ServiceConfig::test();
    config.sync.corrupt_payload = CorruptPayloadPolicy::TreatAsEmpty;
    let app = TestApp::with_config(config);
    app.store.put("levels:acme", b"[{\"id\": \"trunc").await.unwrap();

    assert_eq!(app.get("/levels/acme/").await.json(), json!([]));

    let id = created_id(&app.post("/levels/acme", json!({"name": "fresh"})).await);
    assert_eq!(
        app.stored("levels:acme"),
        Some(json!([{"id": id, "name": "fresh"}]))
    );
}
