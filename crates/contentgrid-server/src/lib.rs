pub mod cache;
pub mod config;
pub mod handlers;
pub mod ingest;
pub mod moderation;
pub mod observability;
pub mod server;
pub mod services;
pub mod shard;

use std::sync::Arc;
use std::time::Duration;

pub use cache::{CacheBackend, Caches};
pub use config::{AppConfig, CacheConfig, IngestConfig, ModerationConfig, RedisConfig, ShardsConfig};
pub use ingest::{EventLog, IngestWorker, MemoryEventLog, Publisher, RedisEventLog};
pub use observability::{init_tracing, shutdown_tracing};
pub use server::{AppState, ContentGridServer, ServerBuilder, build_app};
pub use shard::{ShardRouter, ShardSet, normalize_region};

/// Create a cache backend based on configuration.
///
/// ## Cache Modes
///
/// - **Redis disabled**: Returns the local store (DashMap)
/// - **Redis enabled**: Attempts to connect to Redis, falls back to local on failure
///
/// ## Graceful Degradation
///
/// If Redis connection fails, the system falls back to local-only mode, so
/// the server starts and runs even if Redis is unavailable.
pub async fn create_cache_backend(config: &RedisConfig) -> CacheBackend {
    if !config.enabled {
        tracing::info!("Redis disabled, using local cache only");
        return CacheBackend::new_local();
    }

    tracing::info!(url = %config.url, "Connecting to Redis");

    let timeout = Duration::from_millis(config.timeout_ms);
    let mut pool_config = deadpool_redis::PoolConfig::new(config.pool_size);
    pool_config.timeouts.wait = Some(timeout);
    pool_config.timeouts.create = Some(timeout);
    pool_config.timeouts.recycle = Some(timeout);

    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    redis_config.pool = Some(pool_config);

    let pool = match redis_config.create_pool(Some(deadpool_redis::Runtime::Tokio1)) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to create Redis pool. Falling back to local cache."
            );
            return CacheBackend::new_local();
        }
    };

    match pool.get().await {
        Ok(_) => {
            tracing::info!("Connected to Redis");
            CacheBackend::new_redis(pool)
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to connect to Redis. Falling back to local cache."
            );
            CacheBackend::new_local()
        }
    }
}

/// Publish log over the cache backend's Redis pool, or an in-process log
/// when running local-only.
pub fn create_event_log(backend: &CacheBackend) -> Arc<dyn EventLog> {
    match backend.redis_pool() {
        Some(pool) => Arc::new(RedisEventLog::new(pool.clone())),
        None => {
            tracing::warn!("Using in-process publish log; events do not survive a restart");
            Arc::new(MemoryEventLog::new())
        }
    }
}
