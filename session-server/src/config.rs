//! Environment-based configuration. Every knob has a development-friendly
//! default so a bare `cargo run` against local Redis works.

use crate::store::redis::RedisConfig;

#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address, built from `PORT`.
    pub server_addr: String,
    pub redis: RedisConfig,
    /// Shared HS256 secret. Empty means token endpoints refuse to mint.
    pub jwt_secret: String,
    /// Archive connection string; `None` disables archival.
    pub postgres_dsn: Option<String>,
    /// Allowed CORS origins; `*` permits all.
    pub cors_origins: Vec<String>,
}

impl Config {
    pub fn load() -> Config {
        let port = env_or("PORT", "8080");
        Config {
            server_addr: format!("0.0.0.0:{port}"),
            redis: RedisConfig {
                addr: env_or("REDIS_ADDR", "localhost:6379"),
                password: env_or("REDIS_PASSWORD", ""),
                db: env_or("REDIS_DB", "0").parse().unwrap_or(0),
            },
            jwt_secret: env_or("JWT_SECRET", ""),
            postgres_dsn: std::env::var("POSTGRES_DSN")
                .ok()
                .filter(|dsn| !dsn.is_empty()),
            cors_origins: env_or("CORS_ORIGINS", "*")
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }
}

fn env_or(key: &str, fallback: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => fallback.to_string(),
    }
}
