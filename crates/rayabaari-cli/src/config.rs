use std::path::PathBuf;

use anyhow::{Context, Result};

/// Runtime settings, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub storage_dir: PathBuf,
    pub public_url: String,
    pub encryption_key: String,
    pub push_relay_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let db_path = std::env::var("RAYABAARI_DB_PATH").unwrap_or_else(|_| "rayabaari.db".into());
        let storage_dir =
            std::env::var("RAYABAARI_STORAGE_DIR").unwrap_or_else(|_| "./storage".into());
        let public_url = std::env::var("RAYABAARI_PUBLIC_URL")
            .unwrap_or_else(|_| "http://localhost:3000".into());
        let encryption_key = std::env::var("RAYABAARI_ENCRYPTION_KEY")
            .context("RAYABAARI_ENCRYPTION_KEY must be set")?;
        let push_relay_url = std::env::var("RAYABAARI_PUSH_RELAY_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        Ok(Self {
            db_path: PathBuf::from(db_path),
            storage_dir: PathBuf::from(storage_dir),
            public_url,
            encryption_key,
            push_relay_url,
        })
    }
}
