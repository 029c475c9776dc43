use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use contentgrid_db_memory::InMemoryStorage;
use contentgrid_server::moderation::ResilientModeration;
use contentgrid_server::{
    AppConfig, AppState, CacheBackend, Caches, IngestWorker, MemoryEventLog, ShardRouter,
    ShardSet, build_app,
};
use contentgrid_storage::DynStorage;
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct TestServer {
    base: String,
    shutdown: tokio::sync::oneshot::Sender<()>,
    worker_shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Serves the full app over the in-memory stack. Only `europe` is mapped
/// (no `global` fallback), so other regions are routing errors.
async fn start_server() -> TestServer {
    let cfg = AppConfig::default();
    let router = ShardRouter::new([("europe", "memory://eu")]);
    let storage: DynStorage = Arc::new(InMemoryStorage::new());
    let shards = ShardSet::new(router, HashMap::from([("memory://eu".to_string(), storage)]))
        .expect("shard set");
    let backend = CacheBackend::new_local();
    let log = Arc::new(MemoryEventLog::new());

    let worker = IngestWorker::new(
        shards.clone(),
        Caches::new(backend.clone(), &cfg.cache),
        log.clone(),
        cfg.ingest.clone(),
    );
    let (worker_shutdown, worker_rx) = watch::channel(false);
    let worker_handle = tokio::spawn(worker.run(worker_rx));

    let state = AppState::new(&cfg, shards, backend, log, ResilientModeration::disabled());
    let app = build_app(state, &cfg);

    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
    });

    TestServer {
        base: format!("http://{addr}"),
        shutdown: tx,
        worker_shutdown,
        handles: vec![server, worker_handle],
    }
}

impl TestServer {
    async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.worker_shutdown.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

#[tokio::test]
async fn item_crud_and_listing() {
    let server = start_server().await;
    let base = &server.base;
    let client = reqwest::Client::new();

    // GET /healthz
    let resp = client.get(format!("{base}/healthz")).send().await.unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["cache"], "local");

    // POST creates through the alias
    let resp = client
        .post(format!("{base}/eu/items"))
        .header("traceparent", "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01")
        .json(&json!({ "title": "Hello", "body": "World" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let created: Value = resp.json().await.unwrap();
    assert_eq!(created["region"], "europe");
    let id = created["id"].as_str().unwrap().to_string();

    // GET by id
    let resp = client.get(format!("{base}/europe/items/{id}")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let fetched: Value = resp.json().await.unwrap();
    assert_eq!(fetched["title"], "Hello");

    // PUT updates
    let resp = client
        .put(format!("{base}/europe/items/{id}"))
        .json(&json!({ "title": "Hello again" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let fetched: Value = client
        .get(format!("{base}/europe/items/{id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["title"], "Hello again");

    // GET list
    let resp = client
        .get(format!("{base}/europe/items?skip=0&take=10"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let items: Vec<Value> = resp.json().await.unwrap();
    assert_eq!(items.len(), 1);

    // DELETE then 404
    let resp = client.delete(format!("{base}/europe/items/{id}")).send().await.unwrap();
    assert_eq!(resp.status(), 204);
    let resp = client.get(format!("{base}/europe/items/{id}")).send().await.unwrap();
    assert_eq!(resp.status(), 404);

    server.stop().await;
}

#[tokio::test]
async fn error_statuses() {
    let server = start_server().await;
    let base = &server.base;
    let client = reqwest::Client::new();

    // Validation
    let resp = client
        .post(format!("{base}/europe/items"))
        .json(&json!({ "title": "", "body": "x" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // No mapping and no global fallback
    let resp = client
        .post(format!("{base}/asia/items"))
        .json(&json!({ "title": "t", "body": "x" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);

    // Malformed id
    let resp = client.get(format!("{base}/europe/items/not-a-uuid")).send().await.unwrap();
    assert_eq!(resp.status(), 400);

    // Offset beyond what any backend can address
    let resp = client
        .get(format!("{base}/europe/items?skip={}", usize::MAX))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    server.stop().await;
}

#[tokio::test]
async fn comments_lifecycle() {
    let server = start_server().await;
    let base = &server.base;
    let client = reqwest::Client::new();
    let item_id = uuid::Uuid::new_v4();
    let comments_url = format!("{base}/europe/items/{item_id}/comments");

    let resp = client
        .post(&comments_url)
        .json(&json!({ "author": "ann", "text": "first" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let created: Value = resp.json().await.unwrap();
    let comment_id = created["id"].as_str().unwrap().to_string();

    let listed: Vec<Value> = client.get(&comments_url).send().await.unwrap().json().await.unwrap();
    assert_eq!(listed.len(), 1);

    let resp = client
        .put(format!("{comments_url}/{comment_id}"))
        .json(&json!({ "text": "edited" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let listed: Vec<Value> = client.get(&comments_url).send().await.unwrap().json().await.unwrap();
    assert_eq!(listed[0]["text"], "edited");

    let resp = client.delete(format!("{comments_url}/{comment_id}")).send().await.unwrap();
    assert_eq!(resp.status(), 204);
    let listed: Vec<Value> = client.get(&comments_url).send().await.unwrap().json().await.unwrap();
    assert!(listed.is_empty());

    server.stop().await;
}

#[tokio::test]
async fn published_item_becomes_readable() {
    let server = start_server().await;
    let base = &server.base;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/europe/items/publish"))
        .json(&json!({ "title": "Async", "body": "later" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let receipt: Value = resp.json().await.unwrap();
    assert_eq!(receipt["stream"], "content:publish:europe");
    let id = receipt["id"].as_str().unwrap().to_string();

    let mut status = 0;
    for _ in 0..200 {
        status = client
            .get(format!("{base}/europe/items/{id}"))
            .send()
            .await
            .unwrap()
            .status()
            .as_u16();
        if status == 200 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(status, 200);

    server.stop().await;
}
