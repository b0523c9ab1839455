use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use bucket_store::config::ServerConfig;
use bucket_store::engine::Store;
use bucket_store::server::Router;
use bucket_store::{BucketEnumeration, BucketManager, BucketStore, Error, KVReader, KVWriter, Result};
use serde_json::{json, Value};
use tempfile::{tempdir, TempDir};
use tower::ServiceExt;

fn open_app(config: &ServerConfig) -> (TempDir, Arc<Store>, axum::Router) {
    let dir = tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path().join("http.db"), 0o600).unwrap());
    let app = Router::new(store.clone(), config).into_app();
    (dir, store, app)
}

async fn call(app: &axum::Router, method: &str, uri: &str, body: &str) -> Value {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::from(body.to_string()))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "application/json");

    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_users_scenario() {
    let (_dir, _store, app) = open_app(&ServerConfig::default());

    assert_eq!(call(&app, "GET", "/CreateBucket/users", "").await, json!({"error": ""}));
    assert_eq!(call(&app, "PUT", "/users/42", "alice").await, json!({"error": ""}));
    assert_eq!(
        call(&app, "GET", "/users/42", "").await,
        json!({"error": "", "data": "alice"})
    );
    assert_eq!(call(&app, "GET", "/users/43", "").await, json!({"error": "", "data": ""}));

    let missing = call(&app, "GET", "/missing/42", "").await;
    assert_eq!(missing["error"], "bucket doesn't exist");
    assert_eq!(missing["data"], "");
}

#[tokio::test]
async fn test_bucket_lifecycle() {
    let (_dir, _store, app) = open_app(&ServerConfig::default());

    assert_eq!(call(&app, "GET", "/CreateBucket/b", "").await["error"], "");
    assert_eq!(
        call(&app, "GET", "/CreateBucket/b", "").await["error"],
        "bucket already exists"
    );

    for _ in 0..3 {
        assert_eq!(call(&app, "GET", "/CreateBucketIfNotExists/b", "").await["error"], "");
    }

    call(&app, "PUT", "/b/k", "v").await;
    assert_eq!(call(&app, "GET", "/DeleteBucket/b", "").await["error"], "");
    assert_eq!(
        call(&app, "GET", "/DeleteBucket/b", "").await["error"],
        "bucket doesn't exist"
    );

    for (method, uri) in [("GET", "/b/k"), ("PUT", "/b/k"), ("DELETE", "/b/k")] {
        assert_eq!(call(&app, method, uri, "v").await["error"], "bucket doesn't exist");
    }

    assert_eq!(call(&app, "GET", "/CreateBucketIfNotExists/b", "").await["error"], "");
    assert_eq!(call(&app, "GET", "/b/k", "").await["data"], "");
}

#[tokio::test]
async fn test_put_overwrite_and_empty_body() {
    let (_dir, _store, app) = open_app(&ServerConfig::default());
    call(&app, "GET", "/CreateBucket/b", "").await;

    call(&app, "PUT", "/b/k", "first").await;
    call(&app, "PUT", "/b/k", "second").await;
    assert_eq!(call(&app, "GET", "/b/k", "").await["data"], "second");

    assert_eq!(call(&app, "PUT", "/b/k", "").await["error"], "");
    assert_eq!(call(&app, "GET", "/b/k", "").await, json!({"error": "", "data": ""}));
    assert_eq!(call(&app, "GET", "/ListKeys?bucket=b", "").await["data"], json!(["k"]));
}

#[tokio::test]
async fn test_delete_key_is_idempotent() {
    let (_dir, _store, app) = open_app(&ServerConfig::default());
    call(&app, "GET", "/CreateBucket/b", "").await;
    call(&app, "PUT", "/b/keep", "1").await;

    assert_eq!(call(&app, "DELETE", "/b/absent", "").await, json!({"error": ""}));
    assert_eq!(call(&app, "DELETE", "/b/absent", "").await, json!({"error": ""}));
    assert_eq!(call(&app, "GET", "/ListKeys?bucket=b", "").await["data"], json!(["keep"]));
}

#[tokio::test]
async fn test_path_parameters_are_unescaped() {
    let (_dir, store, app) = open_app(&ServerConfig::default());
    call(&app, "GET", "/CreateBucket/my%20bucket", "").await;
    call(&app, "PUT", "/my%20bucket/a%2Fb", "slash").await;

    assert_eq!(store.get("my bucket", b"a/b").unwrap(), b"slash");
    assert_eq!(call(&app, "GET", "/my%20bucket/a%2Fb", "").await["data"], "slash");
}

#[tokio::test]
async fn test_listing() {
    let (_dir, _store, app) = open_app(&ServerConfig::default());
    for bucket in ["c", "a", "b"] {
        call(&app, "GET", &format!("/CreateBucket/{}", bucket), "").await;
    }
    for key in ["z", "x", "y"] {
        call(&app, "PUT", &format!("/a/{}", key), "v").await;
    }

    assert_eq!(
        call(&app, "GET", "/ListBuckets", "").await,
        json!({"error": "", "data": ["a", "b", "c"]})
    );
    assert_eq!(call(&app, "GET", "/ListKeys?bucket=a", "").await["data"], json!(["x", "y", "z"]));
    assert_eq!(
        call(&app, "GET", "/ListKeys?bucket=missing", "").await,
        json!({"error": "bucket doesn't exist", "data": ""})
    );

    let no_bucket = call(&app, "GET", "/ListKeys", "").await;
    assert!(no_bucket["error"].as_str().unwrap().starts_with("bad request"));
    assert_eq!(no_bucket["data"], "");
}

#[tokio::test]
async fn test_buckets_named_like_operations() {
    let (_dir, store, app) = open_app(&ServerConfig::default());

    assert_eq!(call(&app, "GET", "/CreateBucket/CreateBucket", "").await["error"], "");
    assert_eq!(call(&app, "PUT", "/CreateBucket/k", "v").await, json!({"error": ""}));
    assert_eq!(store.get("CreateBucket", b"k").unwrap(), b"v");
    assert_eq!(call(&app, "DELETE", "/CreateBucket/k", "").await, json!({"error": ""}));
    assert_eq!(store.get("CreateBucket", b"k").unwrap(), b"");

    for bucket in ["CreateBucketIfNotExists", "DeleteBucket"] {
        store.create_bucket(bucket).unwrap();
        let uri = format!("/{}/k", bucket);
        assert_eq!(call(&app, "PUT", &uri, bucket).await["error"], "");
        assert_eq!(store.get(bucket, b"k").unwrap(), bucket.as_bytes());
        assert_eq!(call(&app, "DELETE", &uri, "").await["error"], "");
        assert_eq!(store.get(bucket, b"k").unwrap(), b"");
    }

    for bucket in ["ListKeys", "ListBuckets"] {
        assert_eq!(call(&app, "GET", &format!("/CreateBucket/{}", bucket), "").await["error"], "");
        let uri = format!("/{}/k", bucket);
        assert_eq!(call(&app, "PUT", &uri, "v").await["error"], "");
        assert_eq!(call(&app, "GET", &uri, "").await, json!({"error": "", "data": "v"}));
        assert_eq!(call(&app, "DELETE", &uri, "").await["error"], "");
        assert_eq!(call(&app, "GET", &uri, "").await["data"], "");
    }
}

#[tokio::test]
async fn test_empty_bucket_segment() {
    let (_dir, _store, app) = open_app(&ServerConfig::default());

    assert_eq!(
        call(&app, "GET", "//k", "").await,
        json!({"error": "bucket doesn't exist", "data": ""})
    );
    assert_eq!(
        call(&app, "DELETE", "//k", "").await,
        json!({"error": "bucket doesn't exist"})
    );
    assert_eq!(
        call(&app, "PUT", "//k", "v").await,
        json!({"error": "bucket doesn't exist"})
    );
    assert_eq!(
        call(&app, "GET", "/ListKeys?bucket=", "").await,
        json!({"error": "bucket doesn't exist", "data": ""})
    );
}

#[tokio::test]
async fn test_bad_requests_still_get_envelopes() {
    let config = ServerConfig {
        max_body_bytes: 4,
        ..ServerConfig::default()
    };
    let (_dir, _store, app) = open_app(&config);
    call(&app, "GET", "/CreateBucket/b", "").await;

    let too_big = call(&app, "PUT", "/b/k", "more than four bytes").await;
    assert!(too_big["error"].as_str().unwrap().starts_with("bad request"));
    assert_eq!(call(&app, "GET", "/b/k", "").await["data"], "");

    let invalid_utf8 = call(&app, "GET", "/b/%FF", "").await;
    assert!(invalid_utf8["error"].as_str().unwrap().starts_with("bad request"));
    assert_eq!(invalid_utf8["data"], "");

    let unknown = call(&app, "GET", "/a/b/c", "").await;
    assert!(unknown["error"].as_str().unwrap().contains("no route"));

    let wrong_method = call(&app, "POST", "/b/k", "").await;
    assert!(wrong_method["error"].as_str().unwrap().contains("no route"));
}

#[tokio::test]
async fn test_closed_store() {
    let (_dir, store, app) = open_app(&ServerConfig::default());
    store.close().unwrap();

    assert_eq!(call(&app, "GET", "/CreateBucket/b", "").await["error"], "store is closed");
}

#[tokio::test]
async fn test_concurrent_puts() {
    let (_dir, _store, app) = open_app(&ServerConfig::default());
    call(&app, "GET", "/CreateBucket/load", "").await;

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let app = app.clone();
            tokio::spawn(async move {
                let uri = format!("/load/key-{:02}", i);
                call(&app, "PUT", &uri, &format!("value-{}", i)).await
            })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap()["error"], "");
    }

    for i in 0..32 {
        let got = call(&app, "GET", &format!("/load/key-{:02}", i), "").await;
        assert_eq!(got["data"], format!("value-{}", i));
    }
    assert_eq!(
        call(&app, "GET", "/ListKeys?bucket=load", "").await["data"].as_array().unwrap().len(),
        32
    );
}

/// A store whose operations misbehave, for exercising the fault boundary.
struct FaultyStore;

impl BucketManager for FaultyStore {
    fn create_bucket(&self, _bucket: &str) -> Result<()> {
        Ok(())
    }

    fn create_bucket_if_not_exists(&self, _bucket: &str) -> Result<()> {
        panic!("index out of range in create");
    }

    fn delete_bucket(&self, _bucket: &str) -> Result<()> {
        Err(Error::Storage("disk full".to_string()))
    }
}

impl KVReader for FaultyStore {
    fn get(&self, _bucket: &str, _key: &[u8]) -> Result<Vec<u8>> {
        panic!("secret internal state");
    }
}

impl KVWriter for FaultyStore {
    fn put(&self, _bucket: &str, _key: &[u8], _value: &[u8]) -> Result<()> {
        std::thread::sleep(Duration::from_millis(500));
        Ok(())
    }

    fn delete(&self, _bucket: &str, _key: &[u8]) -> Result<()> {
        Ok(())
    }
}

impl BucketEnumeration for FaultyStore {
    fn list_buckets(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn list_keys(&self, _bucket: &str) -> Result<Vec<Vec<u8>>> {
        Ok(Vec::new())
    }
}

fn faulty_app() -> axum::Router {
    let config = ServerConfig {
        request_timeout: Duration::from_millis(50),
        ..ServerConfig::default()
    };
    let store: Arc<dyn BucketStore> = Arc::new(FaultyStore);
    Router::new(store, &config).into_app()
}

#[tokio::test]
async fn test_panics_become_internal_errors() {
    let app = faulty_app();

    assert_eq!(
        call(&app, "GET", "/b/k", "").await,
        json!({"error": "Internal error", "data": ""})
    );
    assert_eq!(
        call(&app, "GET", "/CreateBucketIfNotExists/b", "").await,
        json!({"error": "Internal error"})
    );

    // Other requests are unaffected.
    assert_eq!(call(&app, "GET", "/CreateBucket/b", "").await, json!({"error": ""}));
    assert_eq!(
        call(&app, "GET", "/DeleteBucket/b", "").await,
        json!({"error": "storage error: disk full"})
    );
}

#[tokio::test]
async fn test_request_deadline() {
    let app = faulty_app();

    assert_eq!(
        call(&app, "PUT", "/b/k", "v").await,
        json!({"error": "request deadline exceeded"})
    );
    assert_eq!(call(&app, "DELETE", "/b/k", "").await, json!({"error": ""}));
}
