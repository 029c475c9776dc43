use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, net::SocketAddr, time::Duration};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// Region → shard connection map
    #[serde(default)]
    pub shards: ShardsConfig,
    /// Redis configuration (cache store and durable log)
    #[serde(default)]
    pub redis: RedisConfig,
    /// Cache sizing and TTLs
    #[serde(default)]
    pub cache: CacheConfig,
    /// Asynchronous publish pipeline
    #[serde(default)]
    pub ingest: IngestConfig,
    /// External moderation dependency
    #[serde(default)]
    pub moderation: ModerationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }
        // Shard validations
        if self.shards.regions.is_empty() {
            return Err("shards.regions must map at least one region".into());
        }
        if let Some((region, _)) = self
            .shards
            .regions
            .iter()
            .find(|(_, target)| target.trim().is_empty())
        {
            return Err(format!("shards.regions.{region} must not be empty"));
        }
        if self.shards.pool_size == 0 {
            return Err("shards.pool_size must be > 0".into());
        }
        // Cache validations
        if self.cache.item_capacity == 0
            || self.cache.list_index_capacity == 0
            || self.cache.comment_list_capacity == 0
        {
            return Err("cache capacities must be > 0".into());
        }
        if self.cache.item_ttl_secs == 0 || self.cache.comment_list_ttl_secs == 0 {
            return Err("cache TTLs must be > 0".into());
        }
        // Ingest validations
        if self.ingest.batch_size == 0 {
            return Err("ingest.batch_size must be > 0".into());
        }
        if self.ingest.group.is_empty() || self.ingest.consumer_name.is_empty() {
            return Err("ingest.group and ingest.consumer_name must not be empty".into());
        }
        // Moderation validations
        if self.moderation.enabled && self.moderation.endpoint.is_empty() {
            return Err("moderation.enabled=true requires moderation.endpoint".into());
        }
        if self.moderation.max_attempts == 0 {
            return Err("moderation.max_attempts must be > 0".into());
        }
        if !(self.moderation.failure_ratio > 0.0 && self.moderation.failure_ratio <= 1.0) {
            return Err("moderation.failure_ratio must be in (0, 1]".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        // OTEL validation
        if self.otel.enabled && self.otel.endpoint.as_deref().unwrap_or("").is_empty() {
            return Err("otel.enabled=true requires otel.endpoint".into());
        }
        if let Some(ratio) = self.otel.sample_ratio
            && !(0.0..=1.0).contains(&ratio)
        {
            return Err("otel.sample_ratio must be within [0, 1]".into());
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_body_limit() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

/// Which storage implementation backs the shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ShardBackend {
    /// One PostgreSQL pool per distinct connection target
    Postgres,
    /// In-process shards; the target string only identifies the shard
    #[default]
    Memory,
}

/// Shard configuration.
///
/// `regions` maps a region name to a connection target. Regions that share a
/// target share one shard. A `global` entry, if present, catches every
/// region without its own mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardsConfig {
    #[serde(default)]
    pub backend: ShardBackend,
    #[serde(default = "default_regions")]
    pub regions: BTreeMap<String, String>,
    #[serde(default = "default_shard_pool_size")]
    pub pool_size: u32,
    /// Pool acquire timeout; bounds how long a storage call may block
    #[serde(default = "default_shard_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Create tables and indexes on startup
    #[serde(default = "default_true")]
    pub ensure_schema: bool,
}

fn default_regions() -> BTreeMap<String, String> {
    BTreeMap::from([("global".to_string(), "memory://global".to_string())])
}
fn default_shard_pool_size() -> u32 {
    10
}
fn default_shard_connect_timeout_ms() -> u64 {
    5000
}
fn default_true() -> bool {
    true
}

impl Default for ShardsConfig {
    fn default() -> Self {
        Self {
            backend: ShardBackend::default(),
            regions: default_regions(),
            pool_size: default_shard_pool_size(),
            connect_timeout_ms: default_shard_connect_timeout_ms(),
            ensure_schema: default_true(),
        }
    }
}

/// Redis configuration for the shared cache and the durable publish log.
///
/// When disabled (or unreachable at startup) the server falls back to an
/// in-process cache and log, which only works for a single instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Enable Redis
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_enabled() -> bool {
    false
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Item blob TTL in seconds
    #[serde(default = "default_item_ttl_secs")]
    pub item_ttl_secs: u64,

    /// Items kept per region in the recency index
    #[serde(default = "default_item_capacity")]
    pub item_capacity: usize,

    /// Ids kept per region in the list index
    #[serde(default = "default_list_index_capacity")]
    pub list_index_capacity: usize,

    /// Comment list blob TTL in seconds
    #[serde(default = "default_comment_list_ttl_secs")]
    pub comment_list_ttl_secs: u64,

    /// Parents whose comment lists are kept per region
    #[serde(default = "default_comment_list_capacity")]
    pub comment_list_capacity: usize,

    /// Upper bound for any best-effort cache warm
    #[serde(default = "default_warm_timeout_ms")]
    pub warm_timeout_ms: u64,
}

fn default_item_ttl_secs() -> u64 {
    3600
}
fn default_item_capacity() -> usize {
    1000
}
fn default_list_index_capacity() -> usize {
    5000
}
fn default_comment_list_ttl_secs() -> u64 {
    600
}
fn default_comment_list_capacity() -> usize {
    30
}
fn default_warm_timeout_ms() -> u64 {
    500
}

impl CacheConfig {
    pub fn item_ttl(&self) -> Duration {
        Duration::from_secs(self.item_ttl_secs)
    }
    pub fn comment_list_ttl(&self) -> Duration {
        Duration::from_secs(self.comment_list_ttl_secs)
    }
    pub fn warm_timeout(&self) -> Duration {
        Duration::from_millis(self.warm_timeout_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            item_ttl_secs: default_item_ttl_secs(),
            item_capacity: default_item_capacity(),
            list_index_capacity: default_list_index_capacity(),
            comment_list_ttl_secs: default_comment_list_ttl_secs(),
            comment_list_capacity: default_comment_list_capacity(),
            warm_timeout_ms: default_warm_timeout_ms(),
        }
    }
}

/// What the ingest worker does when an event's id is already persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Re-warm the cache from the stored row and acknowledge the entry
    #[default]
    Acknowledge,
    /// Log and leave the entry pending
    Skip,
}

/// Publish/ingest pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Run the ingest worker in this process
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Streams are named `<stream_prefix>:<shard>`
    #[serde(default = "default_stream_prefix")]
    pub stream_prefix: String,

    /// Consumer group shared by every worker
    #[serde(default = "default_ingest_group")]
    pub group: String,

    /// Stable per-process consumer name; a restarted process must reuse it
    /// to replay its own pending entries
    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,

    /// Maximum entries claimed per shard per round
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Sleep after a round that claimed nothing
    #[serde(default = "default_idle_sleep_ms")]
    pub idle_sleep_ms: u64,

    /// Pending entries idle longer than this are reclaimed from other consumers
    #[serde(default = "default_reclaim_idle_ms")]
    pub reclaim_idle_ms: u64,

    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
}

fn default_stream_prefix() -> String {
    "content:publish".into()
}
fn default_ingest_group() -> String {
    "content-ingest".into()
}
fn default_consumer_name() -> String {
    "contentgrid-ingest".into()
}
fn default_batch_size() -> usize {
    16
}
fn default_idle_sleep_ms() -> u64 {
    250
}
fn default_reclaim_idle_ms() -> u64 {
    60_000
}

impl IngestConfig {
    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }
    pub fn reclaim_idle(&self) -> Duration {
        Duration::from_millis(self.reclaim_idle_ms)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            stream_prefix: default_stream_prefix(),
            group: default_ingest_group(),
            consumer_name: default_consumer_name(),
            batch_size: default_batch_size(),
            idle_sleep_ms: default_idle_sleep_ms(),
            reclaim_idle_ms: default_reclaim_idle_ms(),
            duplicate_policy: DuplicatePolicy::default(),
        }
    }
}

/// Moderation client and resilience settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationConfig {
    #[serde(default)]
    pub enabled: bool,

    /// POST endpoint accepting `{"text": ...}`
    #[serde(default = "default_moderation_endpoint")]
    pub endpoint: String,

    /// Overall budget across every attempt
    #[serde(default = "default_moderation_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First retry delay; doubles on each further retry
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Failure ratio that opens the breaker
    #[serde(default = "default_failure_ratio")]
    pub failure_ratio: f64,

    /// Rolling window the failure ratio is computed over
    #[serde(default = "default_sampling_window_ms")]
    pub sampling_window_ms: u64,

    /// Calls needed in the window before the breaker may open
    #[serde(default = "default_min_throughput")]
    pub min_throughput: u32,

    /// How long the breaker stays open before admitting a trial call
    #[serde(default = "default_break_duration_ms")]
    pub break_duration_ms: u64,
}

fn default_moderation_endpoint() -> String {
    "http://localhost:8081/moderate".into()
}
fn default_moderation_timeout_ms() -> u64 {
    5000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    100
}
fn default_failure_ratio() -> f64 {
    0.5
}
fn default_sampling_window_ms() -> u64 {
    10_000
}
fn default_min_throughput() -> u32 {
    2
}
fn default_break_duration_ms() -> u64 {
    30_000
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_moderation_endpoint(),
            timeout_ms: default_moderation_timeout_ms(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            failure_ratio: default_failure_ratio(),
            sampling_window_ms: default_sampling_window_ms(),
            min_throughput: default_min_throughput(),
            break_duration_ms: default_break_duration_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    /// OTLP/HTTP traces endpoint, e.g. "http://localhost:4318/v1/traces"
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub sample_ratio: Option<f64>,
    #[serde(default = "default_service_name")]
    pub service_name: String,
}
fn default_service_name() -> String {
    "contentgrid".into()
}
impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            sample_ratio: None,
            service_name: default_service_name(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if pathbuf.exists() {
                    builder = builder.add_source(File::from(pathbuf));
                }
            }
            None => {
                let default_path = PathBuf::from("contentgrid.toml");
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., CONTENTGRID__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("CONTENTGRID")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
