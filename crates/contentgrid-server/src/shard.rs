//! Region → shard routing.
//!
//! Every request carries a region. The router normalizes it, applies the
//! alias table and looks it up in the immutable region → target map built
//! at startup, falling back to the `global` shard. [`ShardSet`] then binds
//! each distinct target to one storage handle.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use contentgrid_db_postgres::PostgresConfig;
use contentgrid_storage::{DynStorage, StorageError};

use crate::config::{ShardBackend, ShardsConfig};

/// Region every unmapped region falls back to.
pub const GLOBAL_REGION: &str = "global";

const REGION_ALIASES: &[(&str, &str)] = &[
    ("na", "north-america"),
    ("sa", "south-america"),
    ("eu", "europe"),
    ("oceania", "australia"),
];

/// Routing failures. These are deployment mistakes, never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("no shard mapping for region '{region}' and no '{GLOBAL_REGION}' fallback")]
    NoShardMapping { region: String },

    #[error("region must not be empty")]
    EmptyRegion,
}

/// Result of routing a region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedShard {
    /// Normalized requested region; the entity's region and cache scope
    pub region: String,
    /// Matched map key; names the publish log partition
    pub shard: String,
    /// Connection target of the shard
    pub target: String,
}

/// Normalizes a region name.
///
/// Trims, lowercases, turns `_`, `.` and whitespace into `-`, collapses
/// repeated hyphens, strips hyphens at both ends, then applies the alias
/// table. Idempotent.
pub fn normalize_region(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.trim().chars() {
        let ch = match ch {
            '_' | '.' => '-',
            c if c.is_whitespace() => '-',
            c => c.to_ascii_lowercase(),
        };
        if ch == '-' && (out.is_empty() || out.ends_with('-')) {
            continue;
        }
        out.push(ch);
    }
    while out.ends_with('-') {
        out.pop();
    }

    REGION_ALIASES
        .iter()
        .find(|(alias, _)| *alias == out)
        .map(|(_, canonical)| (*canonical).to_string())
        .unwrap_or(out)
}

/// Immutable region → connection target map.
#[derive(Debug, Clone)]
pub struct ShardRouter {
    regions: BTreeMap<String, String>,
}

impl ShardRouter {
    /// Builds a router. Map keys are normalized the same way requests are.
    pub fn new<I, K, V>(regions: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let regions = regions
            .into_iter()
            .map(|(region, target)| (normalize_region(region.as_ref()), target.into()))
            .collect();
        Self { regions }
    }

    pub fn resolve(&self, region: &str) -> Result<ResolvedShard, ConfigurationError> {
        let normalized = normalize_region(region);
        if normalized.is_empty() {
            return Err(ConfigurationError::EmptyRegion);
        }

        let (shard, target) = self
            .regions
            .get_key_value(&normalized)
            .or_else(|| self.regions.get_key_value(GLOBAL_REGION))
            .ok_or_else(|| ConfigurationError::NoShardMapping {
                region: normalized.clone(),
            })?;

        Ok(ResolvedShard {
            region: normalized,
            shard: shard.clone(),
            target: target.clone(),
        })
    }

    /// Every shard key; one publish stream exists per key.
    pub fn shard_keys(&self) -> Vec<String> {
        self.regions.keys().cloned().collect()
    }

    /// Distinct connection targets.
    pub fn targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = self.regions.values().cloned().collect();
        targets.sort();
        targets.dedup();
        targets
    }
}

/// Router plus one storage handle per distinct connection target.
#[derive(Clone)]
pub struct ShardSet {
    router: ShardRouter,
    storages: Arc<HashMap<String, DynStorage>>,
}

impl ShardSet {
    /// Binds the router's targets to already-built storages.
    ///
    /// Fails if a target has no storage.
    pub fn new(
        router: ShardRouter,
        storages: HashMap<String, DynStorage>,
    ) -> Result<Self, StorageError> {
        if let Some(missing) = router.targets().into_iter().find(|t| !storages.contains_key(t)) {
            return Err(StorageError::internal(format!(
                "no storage bound for shard target '{missing}'"
            )));
        }
        Ok(Self {
            router,
            storages: Arc::new(storages),
        })
    }

    /// Builds every shard described by the configuration.
    ///
    /// Regions sharing a target share one storage (and, for PostgreSQL,
    /// one connection pool).
    pub async fn connect(config: &ShardsConfig) -> Result<Self, StorageError> {
        let router = ShardRouter::new(config.regions.iter());
        let mut storages = HashMap::new();

        for target in router.targets() {
            let storage: DynStorage = match config.backend {
                ShardBackend::Memory => contentgrid_db_memory::create_storage(),
                ShardBackend::Postgres => {
                    let pg = PostgresConfig::new(target.clone())
                        .with_pool_size(config.pool_size)
                        .with_connect_timeout_ms(config.connect_timeout_ms)
                        .with_ensure_schema(config.ensure_schema);
                    contentgrid_db_postgres::create_storage(pg).await?
                }
            };
            tracing::info!(
                shard_target = %contentgrid_db_postgres::mask_password(&target),
                backend = storage.backend_name(),
                "Shard connected"
            );
            storages.insert(target, storage);
        }

        Self::new(router, storages)
    }

    pub fn router(&self) -> &ShardRouter {
        &self.router
    }

    /// Routes a region and returns its shard's storage.
    pub fn storage_for(
        &self,
        region: &str,
    ) -> Result<(ResolvedShard, DynStorage), ConfigurationError> {
        let resolved = self.router.resolve(region)?;
        let storage = self.storage_for_target(&resolved)?;
        Ok((resolved, storage))
    }

    /// Storage for an already-resolved shard.
    pub fn storage_for_target(
        &self,
        resolved: &ResolvedShard,
    ) -> Result<DynStorage, ConfigurationError> {
        self.storages
            .get(&resolved.target)
            .cloned()
            .ok_or_else(|| ConfigurationError::NoShardMapping {
                region: resolved.region.clone(),
            })
    }
}
