//! Runtime configuration.
//!
//! Values come from an optional TOML file (`<config_dir>/outlook_mcp/config.toml`,
//! or the path in `OUTLOOK_MCP_CONFIG`) and are then overridden by
//! `OUTLOOK_MCP_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConnectorError;

pub const APP_DIR_NAME: &str = "outlook_mcp";
pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
pub const DEFAULT_SCOPES: &str =
    "offline_access Mail.ReadWrite Mail.Send Calendars.ReadWrite MailboxSettings.ReadWrite User.Read";

const ENV_PREFIX: &str = "OUTLOOK_MCP_";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutlookConfig {
    pub graph_base_url: String,
    pub tenant_id: String,
    pub client_id: Option<String>,
    pub scopes: String,
    /// IANA or Windows time zone name sent with calendar writes.
    pub time_zone: String,
    /// Persist device-flow tokens to the auth store.
    pub persist_tokens: bool,
    pub request_timeout_secs: u64,
    /// Overrides where `auth.json` lives.
    pub auth_dir: Option<PathBuf>,
}

impl Default for OutlookConfig {
    fn default() -> Self {
        Self {
            graph_base_url: DEFAULT_GRAPH_BASE_URL.to_string(),
            tenant_id: "common".to_string(),
            client_id: None,
            scopes: DEFAULT_SCOPES.to_string(),
            time_zone: "UTC".to_string(),
            persist_tokens: true,
            request_timeout_secs: 30,
            auth_dir: None,
        }
    }
}

impl OutlookConfig {
    /// Load from the default file location (if present) and apply environment overrides.
    pub fn load() -> Result<Self, ConnectorError> {
        let path = std::env::var(format!("{ENV_PREFIX}CONFIG"))
            .ok()
            .map(PathBuf::from)
            .unwrap_or_else(default_config_path);
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            debug!(path = %path.display(), "no config file, using defaults");
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConnectorError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConnectorError> {
        toml::from_str(raw).map_err(|e| ConnectorError::InvalidInput(format!("config: {}", e)))
    }

    /// Apply overrides from a key lookup (keys are the suffix after `OUTLOOK_MCP_`).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("GRAPH_BASE_URL") {
            self.graph_base_url = v;
        }
        if let Some(v) = lookup("TENANT_ID") {
            self.tenant_id = v;
        }
        if let Some(v) = lookup("CLIENT_ID") {
            self.client_id = Some(v);
        }
        if let Some(v) = lookup("SCOPES") {
            self.scopes = v;
        }
        if let Some(v) = lookup("TIME_ZONE") {
            self.time_zone = v;
        }
        if let Some(v) = lookup("PERSIST_TOKENS") {
            self.persist_tokens = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Some(secs) = lookup("REQUEST_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.request_timeout_secs = secs;
        }
        if let Some(v) = lookup("AUTH_DIR") {
            self.auth_dir = Some(PathBuf::from(v));
        }
    }

    pub fn validate(&self) -> Result<(), ConnectorError> {
        let url = url::Url::parse(&self.graph_base_url).map_err(|e| {
            ConnectorError::InvalidInput(format!(
                "graph_base_url '{}' is not a valid URL: {}",
                self.graph_base_url, e
            ))
        })?;
        if url.scheme() != "https" && url.host_str() != Some("localhost") {
            return Err(ConnectorError::InvalidInput(format!(
                "graph_base_url must use https: {}",
                self.graph_base_url
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConnectorError::InvalidInput(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Base URL without a trailing slash.
    pub fn graph_base(&self) -> &str {
        self.graph_base_url.trim_end_matches('/')
    }

    pub fn auth_dir(&self) -> PathBuf {
        self.auth_dir.clone().unwrap_or_else(default_app_dir)
    }
}

pub fn default_app_dir() -> PathBuf {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|p| p.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

fn default_config_path() -> PathBuf {
    default_app_dir().join("config.toml")
}
