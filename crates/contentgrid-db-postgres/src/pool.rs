//! Connection pool management for the PostgreSQL shard backend.

use std::time::Duration;

use sqlx_core::pool::PoolOptions;
use sqlx_postgres::{PgPool, Postgres};
use tracing::{debug, info, instrument};

use crate::config::PostgresConfig;
use crate::error::Result;

/// Type alias for PostgreSQL pool options.
pub type PgPoolOptions = PoolOptions<Postgres>;

/// Default connection lifetime when the shard config leaves it unset.
const DEFAULT_MAX_LIFETIME: Duration = Duration::from_secs(1800);

/// Opens the pool for one shard.
#[instrument(skip(config), fields(url = %mask_password(&config.url)))]
pub async fn create_pool(config: &PostgresConfig) -> Result<PgPool> {
    let options = pool_options(config);
    info!(
        max_connections = options.get_max_connections(),
        min_connections = options.get_min_connections(),
        acquire_timeout_ms = config.connect_timeout_ms,
        "Opening shard connection pool"
    );

    let pool = options.connect(&config.url).await?;
    debug!(size = pool.size(), "Shard connection pool ready");
    Ok(pool)
}

/// Pool options derived from a shard config. At least one connection is
/// kept warm so the first request after idling does not pay the connect.
pub fn pool_options(config: &PostgresConfig) -> PgPoolOptions {
    let min_connections = config
        .min_connections
        .unwrap_or(config.pool_size / 4)
        .clamp(1, config.pool_size.max(1));

    let mut options = PgPoolOptions::new()
        .max_connections(config.pool_size)
        .min_connections(min_connections)
        .acquire_timeout(Duration::from_millis(config.connect_timeout_ms))
        .max_lifetime(
            config
                .max_lifetime_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_MAX_LIFETIME),
        )
        .test_before_acquire(false);

    if let Some(idle_timeout) = config.idle_timeout_ms {
        options = options.idle_timeout(Duration::from_millis(idle_timeout));
    }
    options
}

/// Hides the password of a connection URL for logging.
pub fn mask_password(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((userinfo, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match userinfo.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:****@{host}"),
        None => url.to_string(),
    }
}
