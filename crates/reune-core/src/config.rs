//! Application configuration management.
//!
//! This module handles loading and saving the client configuration, which
//! includes the API base URL, the credential storage backend and the last
//! used username.
//!
//! Configuration is stored at `~/.config/reune/config.json`. The
//! `REUNE_API_BASE_URL` and `REUNE_CREDENTIAL_BACKEND` environment variables
//! override the file.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "reune";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Route the application navigates to when a session ends
pub const DEFAULT_LOGIN_ROUTE: &str = "/login";

const ENV_API_BASE_URL: &str = "REUNE_API_BASE_URL";
const ENV_CREDENTIAL_BACKEND: &str = "REUNE_CREDENTIAL_BACKEND";

/// Where session credentials are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackend {
    Keyring,
    #[default]
    File,
    Memory,
}

impl FromStr for CredentialBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyring" => Ok(Self::Keyring),
            "file" => Ok(Self::File),
            "memory" => Ok(Self::Memory),
            other => Err(anyhow!("Unknown credential backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub last_username: Option<String>,
    #[serde(default)]
    pub credential_backend: CredentialBackend,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_login_route")]
    pub login_route: String,
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_login_route() -> String {
    DEFAULT_LOGIN_ROUTE.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: None,
            last_username: None,
            credential_backend: CredentialBackend::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            login_route: default_login_route(),
        }
    }
}

impl Config {
    /// Config pointing at `base_url` with defaults for everything else
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: Some(base_url.into()),
            ..Self::default()
        }
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            Self::default()
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply environment variable overrides
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var(ENV_API_BASE_URL) {
            if !url.trim().is_empty() {
                self.api_base_url = Some(url.trim().to_string());
            }
        }
        if let Ok(backend) = std::env::var(ENV_CREDENTIAL_BACKEND) {
            self.credential_backend = backend.parse()?;
        }
        Ok(())
    }

    /// Base URL for API requests, without a trailing slash
    pub fn api_base_url(&self) -> Result<&str> {
        self.api_base_url
            .as_deref()
            .map(|url| url.trim_end_matches('/'))
            .filter(|url| !url.is_empty())
            .ok_or_else(|| anyhow!("API base URL not configured (set {})", ENV_API_BASE_URL))
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }
}

// ============================================================================
// Tests
// ============================================================================
