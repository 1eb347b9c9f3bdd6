use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use tracing::warn;

const DEFAULT_JWT_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
}

impl Config {
    /// Reads `PARLEY_*` variables; call after `.env` is loaded.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = lookup("PARLEY_JWT_SECRET").unwrap_or_else(|| {
            warn!("PARLEY_JWT_SECRET not set, using the development secret");
            DEFAULT_JWT_SECRET.into()
        });
        let port = match lookup("PARLEY_PORT") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("PARLEY_PORT is not a port number: {}", raw))?,
            None => 3000,
        };

        Ok(Self {
            db_path: PathBuf::from(lookup("PARLEY_DB_PATH").unwrap_or_else(|| "parley.db".into())),
            host: lookup("PARLEY_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            jwt_secret,
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}
