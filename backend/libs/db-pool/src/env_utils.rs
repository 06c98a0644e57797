//! Environment variable parsing utilities
//!
//! Services that talk to more than one database read their connection
//! settings from prefixed variables (`RATING_DB_HOST`, `BOOK_DB_NAME`, ...).
//! These helpers keep that lookup in one place.

use std::str::FromStr;

/// Parse an environment variable with a default fallback
///
/// # Example
/// ```ignore
/// let max: u32 = parse_env_with_default("DB_MAX_CONNECTIONS", 20);
/// ```
pub fn parse_env_with_default<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read a non-empty environment variable
pub fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read `{PREFIX}_{SUFFIX}`, e.g. `prefixed_var("RATING", "DB_HOST")`
pub fn prefixed_var(prefix: &str, suffix: &str) -> Option<String> {
    env_non_empty(&format!("{}_{}", prefix, suffix))
}

/// Whether the process runs inside the compose network
///
/// Inside docker the database host/port come from `{PREFIX}_DB_HOST` and
/// `{PREFIX}_DB_PORT`; on a developer machine the databases are reached on
/// `localhost` through `{PREFIX}_DB_LOCAL_PORT`.
pub fn running_in_docker() -> bool {
    std::env::var("RUNNING_IN_DOCKER")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Assemble a PostgreSQL URL from `{PREFIX}_DB_*` variables
pub fn database_url_from_prefix(prefix: &str) -> Result<String, String> {
    let user = prefixed_var(prefix, "DB_USER")
        .ok_or_else(|| format!("{}_DB_USER environment variable not set", prefix))?;
    let name = prefixed_var(prefix, "DB_NAME")
        .ok_or_else(|| format!("{}_DB_NAME environment variable not set", prefix))?;
    let password = prefixed_var(prefix, "DB_PASSWORD").unwrap_or_default();

    let (host, port) = if running_in_docker() {
        (
            prefixed_var(prefix, "DB_HOST")
                .ok_or_else(|| format!("{}_DB_HOST environment variable not set", prefix))?,
            prefixed_var(prefix, "DB_PORT").unwrap_or_else(|| "5432".to_string()),
        )
    } else {
        (
            "localhost".to_string(),
            prefixed_var(prefix, "DB_LOCAL_PORT").unwrap_or_else(|| "5432".to_string()),
        )
    };

    port.parse::<u16>()
        .map_err(|_| format!("Invalid port for {} database: {}", prefix, port))?;

    Ok(format!(
        "postgres://{}:{}@{}:{}/{}",
        user, password, host, port, name
    ))
}
