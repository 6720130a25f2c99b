use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::thumbnail::Backend;

/// Server settings, read from `LOCALBOORU_*` environment variables
/// (a `.env` file is loaded first if present).
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub media_dir: PathBuf,
    /// Prefix for the file and thumbnail URLs handed out in post records.
    pub base_url: String,
    pub thumbnailer: Backend,
    pub convert_bin: String,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let port = var("LOCALBOORU_PORT", "8081")
            .parse()
            .context("LOCALBOORU_PORT must be a port number")?;
        let thumbnailer = var("LOCALBOORU_THUMBNAILER", "image").parse()?;
        let max_upload_mb: usize = var("LOCALBOORU_MAX_UPLOAD_MB", "256")
            .parse()
            .context("LOCALBOORU_MAX_UPLOAD_MB must be a whole number")?;

        Ok(Self {
            host: var("LOCALBOORU_HOST", "0.0.0.0"),
            port,
            db_path: var("LOCALBOORU_DB_PATH", "lb.db").into(),
            media_dir: var("LOCALBOORU_MEDIA_DIR", "./img").into(),
            base_url: var("LOCALBOORU_BASE_URL", "http://127.0.0.1:8081")
                .trim_end_matches('/')
                .to_string(),
            thumbnailer,
            convert_bin: var("LOCALBOORU_CONVERT_BIN", "convert"),
            max_upload_bytes: max_upload_mb.saturating_mul(1024 * 1024),
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", self.host, self.port))
    }
}

fn var(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}
