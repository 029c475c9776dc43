use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, put},
};
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::cache::{CacheBackend, Caches};
use crate::config::AppConfig;
use crate::ingest::{EventLog, IngestWorker, Publisher};
use crate::moderation::ResilientModeration;
use crate::services::{CommentService, ContentService};
use crate::shard::ShardSet;
use crate::{create_cache_backend, create_event_log, handlers, observability};

/// Handles shared by every request.
#[derive(Clone)]
pub struct AppState {
    pub content: ContentService,
    pub comments: CommentService,
    pub cache_mode: &'static str,
    pub log_backend: &'static str,
}

impl AppState {
    /// Wires services over already-built shards, cache backend and log.
    pub fn new(
        cfg: &AppConfig,
        shards: ShardSet,
        backend: CacheBackend,
        log: Arc<dyn EventLog>,
        moderation: ResilientModeration,
    ) -> Self {
        let cache_mode = backend.mode();
        let log_backend = log.backend_name();
        let caches = Caches::new(backend, &cfg.cache);
        let publisher = Publisher::new(shards.router().clone(), log, cfg.ingest.stream_prefix.clone());
        Self {
            content: ContentService::new(shards.clone(), caches.clone(), publisher),
            comments: CommentService::new(shards, caches, moderation),
            cache_mode,
            log_backend,
        }
    }
}

pub fn build_app(state: AppState, cfg: &AppConfig) -> Router {
    let body_limit = cfg.server.body_limit_bytes;
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route(
            "/{region}/items",
            get(handlers::list_items).post(handlers::create_item),
        )
        .route("/{region}/items/publish", post(handlers::publish_item))
        .route(
            "/{region}/items/{id}",
            get(handlers::get_item)
                .put(handlers::update_item)
                .delete(handlers::delete_item),
        )
        .route(
            "/{region}/items/{id}/comments",
            get(handlers::list_comments).post(handlers::create_comment),
        )
        .route(
            "/{region}/items/{id}/comments/{comment_id}",
            put(handlers::update_comment).delete(handlers::delete_comment),
        )
        .layer(
            ServiceBuilder::new()
                .layer(axum::extract::DefaultBodyLimit::max(body_limit))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(|req: &axum::http::Request<_>| {
                            use tracing::field::Empty;
                            let span = tracing::info_span!(
                                "http.request",
                                http.method = %req.method(),
                                http.target = %req.uri(),
                                http.status_code = Empty,
                            );
                            // Incoming W3C headers make this span a child of the caller's trace.
                            span.set_parent(observability::context_from_http(req.headers()));
                            span
                        })
                        .on_response(
                            |res: &axum::http::Response<_>,
                             latency: std::time::Duration,
                             span: &tracing::Span| {
                                span.record(
                                    "http.status_code",
                                    tracing::field::display(res.status().as_u16()),
                                );
                                tracing::info!(
                                    http.status = %res.status().as_u16(),
                                    elapsed_ms = %latency.as_millis(),
                                    "request handled"
                                );
                            },
                        ),
                ),
        )
        .with_state(state)
}

pub struct ContentGridServer {
    addr: SocketAddr,
    app: Router,
    worker: Option<IngestWorker>,
}

#[derive(Default)]
pub struct ServerBuilder {
    config: AppConfig,
    addr: Option<SocketAddr>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = Some(addr);
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.config = cfg;
        self
    }

    /// Connects the shards, the cache store and the publish log, then wires
    /// the services and the ingest worker.
    pub async fn build(self) -> anyhow::Result<ContentGridServer> {
        let cfg = self.config;
        cfg.validate().map_err(anyhow::Error::msg)?;

        let shards = ShardSet::connect(&cfg.shards).await?;
        let backend = create_cache_backend(&cfg.redis).await;
        let log = create_event_log(&backend);
        let moderation = ResilientModeration::from_config(&cfg.moderation);
        tracing::info!(
            shards = shards.router().shard_keys().len(),
            cache = backend.mode(),
            log = log.backend_name(),
            moderation = moderation.is_enabled(),
            "Server components ready"
        );

        let worker = cfg.ingest.enabled.then(|| {
            IngestWorker::new(
                shards.clone(),
                Caches::new(backend.clone(), &cfg.cache),
                log.clone(),
                cfg.ingest.clone(),
            )
        });

        let state = AppState::new(&cfg, shards, backend, log, moderation);
        Ok(ContentGridServer {
            addr: self.addr.unwrap_or_else(|| cfg.addr()),
            app: build_app(state, &cfg),
            worker,
        })
    }
}

impl ContentGridServer {
    /// Serves until Ctrl-C, then stops the ingest worker between entries.
    pub async fn run(self) -> anyhow::Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = self.worker.map(|w| tokio::spawn(w.run(shutdown_rx)));

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        let _ = shutdown_tx.send(true);
        if let Some(handle) = worker
            && let Err(e) = handle.await
        {
            tracing::error!(error = %e, "Ingest worker task failed");
        }
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
