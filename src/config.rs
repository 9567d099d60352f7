//! Server configuration from environment variables.
//!
//! Every knob has a default so `courier` starts with no environment at all:
//! in-memory message store, query-parameter identity, 60s idle window.

use std::str::FromStr;
use std::time::Duration;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_AUTH_QUERY_PARAM: &str = "user_id";
const DEFAULT_SESSION_IDLE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_CLIENT_QUEUE_CAPACITY: usize = 256;

/// How connections prove their identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    /// Trust a pre-verified id in a query parameter.
    #[default]
    Query,
    /// Look up a `token` query parameter in the `sessions` table.
    Session,
}

impl FromStr for AuthMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "query" => Ok(Self::Query),
            "session" => Ok(Self::Session),
            other => Err(format!("unknown AUTH_MODE: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub auth_mode: AuthMode,
    pub auth_query_param: String,
    /// Sessions with no inbound frame for this long are force-closed.
    pub idle_timeout: Duration,
    /// Per-connection outbound queue depth.
    pub client_queue_capacity: usize,
    /// Allowed CORS origin; any origin when unset.
    pub cors_origin: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database_url: None,
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            auth_mode: AuthMode::Query,
            auth_query_param: DEFAULT_AUTH_QUERY_PARAM.to_owned(),
            idle_timeout: Duration::from_secs(DEFAULT_SESSION_IDLE_TIMEOUT_SECS),
            client_queue_capacity: DEFAULT_CLIENT_QUEUE_CAPACITY,
            cors_origin: None,
        }
    }
}

impl ServerConfig {
    /// Build from the process environment. Unparseable values fall back to
    /// defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        Self {
            port: env_parse(&lookup, "PORT", defaults.port),
            database_url: non_empty("DATABASE_URL"),
            db_max_connections: env_parse(&lookup, "DB_MAX_CONNECTIONS", defaults.db_max_connections),
            auth_mode: env_parse(&lookup, "AUTH_MODE", defaults.auth_mode),
            auth_query_param: non_empty("AUTH_QUERY_PARAM").unwrap_or(defaults.auth_query_param),
            idle_timeout: Duration::from_secs(
                env_parse(&lookup, "SESSION_IDLE_TIMEOUT_SECS", DEFAULT_SESSION_IDLE_TIMEOUT_SECS).max(1),
            ),
            client_queue_capacity: env_parse(&lookup, "CLIENT_QUEUE_CAPACITY", defaults.client_queue_capacity).max(1),
            cors_origin: non_empty("CORS_ORIGIN"),
        }
    }
}

fn env_parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
