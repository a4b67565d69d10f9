//! Configuration for the admin client.
//!
//! Loaded from, in increasing precedence:
//! - built-in defaults
//! - `config.toml` in the platform config directory (or `--config <path>`)
//! - environment variables (`CRAFTADMIN_API_URL`, `CRAFTADMIN_ENCRYPTION_KEY`,
//!   `CRAFTADMIN_DATA_DIR`)

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_API_URL: &str = "CRAFTADMIN_API_URL";
pub const ENV_ENCRYPTION_KEY: &str = "CRAFTADMIN_ENCRYPTION_KEY";
pub const ENV_DATA_DIR: &str = "CRAFTADMIN_DATA_DIR";

/// Key used when none is configured. It ships in the binary, so it only
/// keeps stored sessions from being readable at a glance.
const FALLBACK_ENCRYPTION_KEY: &str = "craftadmin-session-store-v1::embroidery-admin";

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root of the admin REST API; also the base for avatar and image paths.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Session store key. Falls back to a built-in key when unset.
    #[serde(default)]
    pub encryption_key: Option<String>,
    /// Directory for the durable session tier.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Per-request timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            encryption_key: None,
            data_dir: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_api_base_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "craftadmin", "craftadmin")
}

impl Config {
    /// Default location of `config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from `path` (or the default location), then apply environment overrides.
    /// A missing file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(Self::default_path);
        let mut config = match path {
            Some(ref p) if p.exists() => Self::from_file(p)?,
            _ => Self::default(),
        };
        config.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Parse a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self =
            toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Apply overrides from `lookup`. Empty values are ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty(ENV_API_URL) {
            self.api_base_url = url;
        }
        if let Some(key) = non_empty(ENV_ENCRYPTION_KEY) {
            self.encryption_key = Some(key);
        }
        if let Some(dir) = non_empty(ENV_DATA_DIR) {
            self.data_dir = Some(PathBuf::from(shellexpand::tilde(&dir).into_owned()));
        }
    }

    /// The key the session store encrypts with.
    pub fn effective_encryption_key(&self) -> &str {
        match self.encryption_key.as_deref() {
            Some(key) if !key.is_empty() => key,
            _ => {
                tracing::warn!(
                    "No session encryption key configured; using the built-in fallback key"
                );
                FALLBACK_ENCRYPTION_KEY
            }
        }
    }

    /// Directory of the durable session tier.
    pub fn session_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            return Ok(dir.join("session"));
        }
        project_dirs()
            .map(|dirs| dirs.data_dir().join("session"))
            .context("could not determine a data directory; set CRAFTADMIN_DATA_DIR")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}
