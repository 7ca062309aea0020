// Relay server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. The database pool reads its own tuning variables in
// db/pool.rs.

use std::net::SocketAddr;

pub const DEV_JWT_SECRET: &str = "reelcircle_local_development_jwt_secret_32_chars";
pub const DEFAULT_REACTION_TTL_MS: u64 = 3_000;
pub const MAX_REACTION_TTL_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Core relay server configuration.
///
/// Constructed via [`RelayConfig::from_env`] which reads environment
/// variables and falls back to development defaults.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// HS256 secret shared with the identity service that issues access tokens.
    pub jwt_secret: String,
    /// PostgreSQL connection string. `None` runs on the in-memory store.
    pub database_url: Option<String>,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive (e.g. `info`, `reelcircle_relay=debug`).
    pub log_filter: String,
    pub log_format: LogFormat,
    /// How long receivers should keep a watch-party reaction on screen.
    pub reaction_ttl_ms: u64,
    /// Reject votes once a session's `ends_at` has passed.
    pub enforce_voting_expiry: bool,
}

impl RelayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `REELCIRCLE_RELAY_HOST` | `0.0.0.0` |
    /// | `REELCIRCLE_RELAY_PORT` | `8080` |
    /// | `REELCIRCLE_RELAY_JWT_SECRET` | dev-only placeholder |
    /// | `REELCIRCLE_RELAY_DATABASE_URL` | *(none, in-memory store)* |
    /// | `REELCIRCLE_RELAY_CORS_ORIGINS` | *(none, cors.rs uses dev defaults)* |
    /// | `REELCIRCLE_RELAY_LOG_FILTER` | `info` |
    /// | `REELCIRCLE_RELAY_LOG_FORMAT` | `text` |
    /// | `REELCIRCLE_RELAY_REACTION_TTL_MS` | `3000` (1..=60000, else default) |
    /// | `REELCIRCLE_RELAY_ENFORCE_VOTING_EXPIRY` | `true` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("REELCIRCLE_RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("REELCIRCLE_RELAY_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let jwt_secret =
            env("REELCIRCLE_RELAY_JWT_SECRET").unwrap_or_else(|_| DEV_JWT_SECRET.into());

        let database_url =
            env("REELCIRCLE_RELAY_DATABASE_URL").ok().filter(|value| !value.trim().is_empty());
        let cors_origins = env("REELCIRCLE_RELAY_CORS_ORIGINS").ok();

        let log_filter = env("REELCIRCLE_RELAY_LOG_FILTER").unwrap_or_else(|_| "info".into());
        let log_format = match env("REELCIRCLE_RELAY_LOG_FORMAT").as_deref() {
            Ok(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        let reaction_ttl_ms = env("REELCIRCLE_RELAY_REACTION_TTL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|ttl| (1..=MAX_REACTION_TTL_MS).contains(ttl))
            .unwrap_or(DEFAULT_REACTION_TTL_MS);

        let enforce_voting_expiry = env("REELCIRCLE_RELAY_ENFORCE_VOTING_EXPIRY")
            .ok()
            .and_then(|v| parse_bool(&v))
            .unwrap_or(true);

        Self {
            listen_addr,
            jwt_secret,
            database_url,
            cors_origins,
            log_filter,
            log_format,
            reaction_ttl_ms,
            enforce_voting_expiry,
        }
    }

    /// Returns true when using the development-only JWT secret.
    pub fn is_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
