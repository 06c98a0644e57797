//! Postgres pools for the recommendation batch job
//!
//! The job reads `ratings` and `books` from two source databases and writes
//! its snapshot to a third. Each database gets a small pool described by a
//! [`DbConfig`] built from `{PREFIX}_*` variables.

pub mod env_utils;
mod metrics;

use env_utils::{database_url_from_prefix, parse_env_with_default, prefixed_var};
pub use metrics::acquire_with_metrics;

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info};

/// Connection settings of one of the job's databases
#[derive(Clone)]
pub struct DbConfig {
    /// Label of the pool in logs and `db_pool_*` metrics
    pub pool_name: String,
    pub database_url: String,
    pub max_connections: u32,
    /// Seconds allowed to open the first connection
    pub connect_timeout_secs: u64,
    /// Seconds a query waits for a free connection
    pub acquire_timeout_secs: u64,
    /// Idle connections are closed after this many seconds, e.g. between passes
    pub idle_timeout_secs: u64,
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("pool_name", &self.pool_name)
            .field("database_url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("acquire_timeout_secs", &self.acquire_timeout_secs)
            .field("idle_timeout_secs", &self.idle_timeout_secs)
            .finish()
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            pool_name: String::from("recommendation"),
            database_url: String::new(),
            max_connections: 4,
            connect_timeout_secs: 5,
            acquire_timeout_secs: 10,
            idle_timeout_secs: 600,
        }
    }
}

impl DbConfig {
    /// Settings for the database behind `prefix` (`RATING`, `BOOK`, ...)
    ///
    /// `{PREFIX}_DATABASE_URL` wins when set, otherwise the URL is assembled
    /// from `{PREFIX}_DB_USER`, `{PREFIX}_DB_PASSWORD`, `{PREFIX}_DB_NAME` and
    /// the host/port pair selected by `RUNNING_IN_DOCKER`.
    ///
    /// Sizing reads `{PREFIX}_DB_MAX_CONNECTIONS` and friends first, then the
    /// unprefixed `DB_*` variable shared by all three pools.
    pub fn from_prefix(pool_name: &str, prefix: &str) -> Result<Self, String> {
        let database_url = match prefixed_var(prefix, "DATABASE_URL") {
            Some(url) => url,
            None => database_url_from_prefix(prefix)?,
        };
        let defaults = Self::default();

        Ok(Self {
            pool_name: pool_name.to_string(),
            database_url,
            max_connections: pool_setting(prefix, "DB_MAX_CONNECTIONS", defaults.max_connections),
            connect_timeout_secs: pool_setting(
                prefix,
                "DB_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout_secs,
            ),
            acquire_timeout_secs: pool_setting(
                prefix,
                "DB_ACQUIRE_TIMEOUT_SECS",
                defaults.acquire_timeout_secs,
            ),
            idle_timeout_secs: pool_setting(
                prefix,
                "DB_IDLE_TIMEOUT_SECS",
                defaults.idle_timeout_secs,
            ),
        })
    }
}

fn pool_setting<T: FromStr>(prefix: &str, key: &str, default: T) -> T {
    match prefixed_var(prefix, key).and_then(|v| v.parse().ok()) {
        Some(value) => value,
        None => parse_env_with_default(key, default),
    }
}

/// Open a pool and its first connection
///
/// An unreachable host or a wrong URL fails here, before any snapshot is read.
pub async fn create_pool(config: &DbConfig) -> Result<PgPool, sqlx::Error> {
    let options = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs));

    let connect_timeout = Duration::from_secs(config.connect_timeout_secs);
    let pool = match tokio::time::timeout(connect_timeout, options.connect(&config.database_url))
        .await
    {
        Ok(Ok(pool)) => pool,
        Ok(Err(e)) => {
            error!(pool = %config.pool_name, error = %e, "Database connection failed");
            return Err(e);
        }
        Err(_) => {
            error!(
                pool = %config.pool_name,
                timeout_secs = config.connect_timeout_secs,
                "Database connection timed out"
            );
            return Err(sqlx::Error::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("no connection to {} database", config.pool_name),
            )));
        }
    };

    metrics::record_pool_state(&pool, &config.pool_name);
    info!(
        pool = %config.pool_name,
        max_connections = config.max_connections,
        acquire_timeout_secs = config.acquire_timeout_secs,
        "Database pool connected"
    );

    Ok(pool)
}
