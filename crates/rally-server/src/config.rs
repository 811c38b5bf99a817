use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use tracing::warn;

use rally_crypto::keys::{generate_key, key_from_base64};
use rally_db::DEFAULT_PAGE_SIZE;

/// Server settings, read from `RALLY_*` environment variables.
pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub encryption_key: [u8; 32],
    pub upload_dir: PathBuf,
    pub page_size: u32,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let host = var("RALLY_HOST", "0.0.0.0");
        let port: u16 = var("RALLY_PORT", "3000")
            .parse()
            .context("RALLY_PORT must be a port number")?;
        let addr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        let encryption_key = match lookup("RALLY_ENCRYPTION_KEY") {
            Some(encoded) => key_from_base64(&encoded).context("RALLY_ENCRYPTION_KEY")?,
            None => {
                warn!("RALLY_ENCRYPTION_KEY not set, using an ephemeral key: stored messages will be unreadable after restart");
                generate_key()
            }
        };

        let page_size = match lookup("RALLY_PAGE_SIZE") {
            Some(size) => size.parse().context("RALLY_PAGE_SIZE must be a positive number")?,
            None => DEFAULT_PAGE_SIZE,
        };

        Ok(Self {
            addr,
            db_path: PathBuf::from(var("RALLY_DB_PATH", "rally.db")),
            jwt_secret: var("RALLY_JWT_SECRET", "dev-secret-change-me"),
            encryption_key,
            upload_dir: PathBuf::from(var("RALLY_UPLOAD_DIR", "./uploads")),
            page_size,
        })
    }
}
