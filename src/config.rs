// src/config.rs
use anyhow::{Context, Result};

/// Host process configuration, loaded once at startup from environment
/// variables (§6, §9). `DATABASE_URL` is the only required input;
/// `PORT` is accepted for interface compatibility with the external read
/// surface even though this crate does not bind a listener itself. These
/// two are the full set of recognized inputs; everything else is ignored.
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub database_url: String,
    pub port: u16,
    pub max_db_connections: u32,
}

const DEFAULT_PORT: u16 = 8080;

/// Connection pool ceiling, fixed rather than environment-tunable
/// (`backend/internal/db/pool.go`'s `MaxConns`).
const MAX_DB_CONNECTIONS: u32 = 10;

impl HostConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL environment variable is required")?;

        if database_url.trim().is_empty() {
            anyhow::bail!("DATABASE_URL environment variable must not be empty");
        }

        let port = match std::env::var("PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("PORT must be a valid u16, got {:?}", raw))?,
            Err(_) => DEFAULT_PORT,
        };

        Ok(Self {
            database_url,
            port,
            max_db_connections: MAX_DB_CONNECTIONS,
        })
    }
}
