//! Server configuration from the environment.

use std::time::Duration;

use axum::http::HeaderValue;

use opsroom_core::defaults;
use opsroom_core::{Error, Result};

/// Gateway tuning knobs.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Maximum concurrently open viewer connections.
    pub max_connections: usize,
    /// Interval between server pings and idle checks.
    pub heartbeat_interval: Duration,
    /// Close a connection after this long without inbound traffic.
    pub idle_timeout: Duration,
    /// Per-connection dedup cache size.
    pub dedup_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_connections: defaults::WS_MAX_CONNECTIONS,
            heartbeat_interval: Duration::from_secs(defaults::WS_HEARTBEAT_SECS),
            idle_timeout: Duration::from_secs(defaults::WS_IDLE_TIMEOUT_SECS),
            dedup_capacity: defaults::DEDUP_CAPACITY,
        }
    }
}

/// Identity service settings.
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// Base URL of the identity service; the provider calls `<url>/user`.
    pub url: String,
    /// Optional API key sent as `apikey` header.
    pub api_key: Option<String>,
}

/// Everything the server reads from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Unset means the in-memory store.
    pub database_url: Option<String>,
    pub webhook_secret: String,
    /// Unset means no viewer can authenticate.
    pub identity: Option<IdentityConfig>,
    pub gateway: GatewayConfig,
    pub ingest_max_body_bytes: usize,
    pub allowed_origins: Vec<HeaderValue>,
}

impl ServerConfig {
    /// Read configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `HOST` | `0.0.0.0` |
    /// | `PORT` | `3000` |
    /// | `DATABASE_URL` | unset (in-memory store) |
    /// | `OPERATIONS_WEBHOOK_SECRET` | required |
    /// | `IDENTITY_URL` / `IDENTITY_API_KEY` | unset |
    /// | `WS_MAX_CONNECTIONS` | `1000` |
    /// | `WS_HEARTBEAT_SECS` | `30` |
    /// | `WS_IDLE_TIMEOUT_SECS` | `300` |
    /// | `INGEST_MAX_BODY_BYTES` | `262144` |
    /// | `ALLOWED_ORIGINS` | `http://localhost:3000` |
    pub fn from_env() -> Result<Self> {
        let webhook_secret = env_string("OPERATIONS_WEBHOOK_SECRET").ok_or_else(|| {
            Error::Config("OPERATIONS_WEBHOOK_SECRET must be set".to_string())
        })?;

        let identity = env_string("IDENTITY_URL").map(|url| IdentityConfig {
            url,
            api_key: env_string("IDENTITY_API_KEY"),
        });

        let gateway = GatewayConfig {
            max_connections: env_parse("WS_MAX_CONNECTIONS")
                .unwrap_or(defaults::WS_MAX_CONNECTIONS),
            heartbeat_interval: Duration::from_secs(
                env_parse("WS_HEARTBEAT_SECS")
                    .unwrap_or(defaults::WS_HEARTBEAT_SECS)
                    .max(1),
            ),
            idle_timeout: Duration::from_secs(
                env_parse("WS_IDLE_TIMEOUT_SECS").unwrap_or(defaults::WS_IDLE_TIMEOUT_SECS),
            ),
            dedup_capacity: defaults::DEDUP_CAPACITY,
        };

        Ok(Self {
            host: env_string("HOST").unwrap_or_else(|| defaults::SERVER_HOST.to_string()),
            port: env_parse("PORT").unwrap_or(defaults::SERVER_PORT),
            database_url: env_string("DATABASE_URL"),
            webhook_secret,
            identity,
            gateway,
            ingest_max_body_bytes: env_parse("INGEST_MAX_BODY_BYTES")
                .unwrap_or(defaults::INGEST_MAX_BODY_BYTES),
            allowed_origins: parse_allowed_origins(
                std::env::var("ALLOWED_ORIGINS").ok().as_deref(),
            ),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Router settings derived from this configuration.
    pub fn router(&self) -> RouterConfig {
        RouterConfig {
            ingest_max_body_bytes: self.ingest_max_body_bytes,
            allowed_origins: self.allowed_origins.clone(),
        }
    }
}

/// HTTP-layer settings applied by [`crate::build_router`].
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub ingest_max_body_bytes: usize,
    pub allowed_origins: Vec<HeaderValue>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            ingest_max_body_bytes: defaults::INGEST_MAX_BODY_BYTES,
            allowed_origins: parse_allowed_origins(None),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}

/// Parse a comma-separated CORS origin whitelist.
///
/// Invalid entries are skipped with a warning; an empty or unset list falls
/// back to the local development origin.
pub fn parse_allowed_origins(raw: Option<&str>) -> Vec<HeaderValue> {
    let fallback = || vec![HeaderValue::from_static("http://localhost:3000")];
    let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else {
        return fallback();
    };

    let origins: Vec<HeaderValue> = raw
        .split(',')
        .filter_map(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            match trimmed.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!("Invalid CORS origin '{}': {}", trimmed, e);
                    None
                }
            }
        })
        .collect();

    if origins.is_empty() {
        fallback()
    } else {
        origins
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.dedup_capacity, 1000);
    }

    #[test]
    fn test_parse_allowed_origins() {
        let origins = parse_allowed_origins(Some("https://ops.example.com, http://localhost:5173"));
        assert_eq!(origins.len(), 2);
        assert_eq!(origins[0], "https://ops.example.com");
        assert_eq!(origins[1], "http://localhost:5173");
    }

    #[test]
    fn test_parse_allowed_origins_fallback() {
        assert_eq!(parse_allowed_origins(None), vec!["http://localhost:3000"]);
        assert_eq!(parse_allowed_origins(Some("  ")), vec!["http://localhost:3000"]);
        assert_eq!(parse_allowed_origins(Some(",,")), vec!["http://localhost:3000"]);
    }
}
