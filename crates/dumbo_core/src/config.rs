use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use reqwest::Url;
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "dumbo/0.1";
pub const DEFAULT_CLIENT_NAME: &str = "Dumbo Tweet Importer";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct DumboConfig {
    #[serde(default)]
    pub server: ServerSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ServerSection {
    pub host: Option<String>,
    pub user_agent: Option<String>,
    pub client_name: Option<String>,
    pub website: Option<String>,
    pub timeout_ms: Option<u64>,
    pub rate_limit_read_ms: Option<u64>,
    pub rate_limit_write_ms: Option<u64>,
    pub max_retries: Option<usize>,
    pub max_write_retries: Option<usize>,
    pub retry_delay_ms: Option<u64>,
}

impl DumboConfig {
    /// Resolve the target host: flag > env DUMBO_HOST > config.
    pub fn host(&self, flag: Option<&str>) -> Result<Url> {
        let raw = flag
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string)
            .or_else(|| env_override("DUMBO_HOST"))
            .or_else(|| self.server.host.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("no target host configured (use --host, DUMBO_HOST or [server].host)")
            })?;
        normalize_host(&raw)
    }

    /// Resolve user agent: env DUMBO_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        env_override("DUMBO_USER_AGENT")
            .or_else(|| self.server.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn client_name(&self) -> &str {
        self.server
            .client_name
            .as_deref()
            .unwrap_or(DEFAULT_CLIENT_NAME)
    }

    pub fn website(&self) -> Option<&str> {
        self.server.website.as_deref()
    }
}

/// Load and parse a DumboConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<DumboConfig> {
    if !config_path.exists() {
        return Ok(DumboConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: DumboConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Parse a host URL and make sure it ends with `/` so API paths join beneath it.
pub fn normalize_host(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        bail!("host URL cannot be empty");
    }
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    let url = Url::parse(&with_slash).with_context(|| format!("invalid host URL: {trimmed}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("host URL must use http or https: {trimmed}");
    }
    Ok(url)
}

fn env_override(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
