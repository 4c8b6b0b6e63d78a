//! `repowatch.toml` loading and environment overrides.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use github::GithubConfig;
use monitor::MonitorConfig;
use serde::Deserialize;

/// Config file read when neither `--config` nor `REPOWATCH_CONFIG` is given.
pub const DEFAULT_CONFIG_PATH: &str = "repowatch.toml";

/// Environment variables consulted by [`AppConfig::apply_env`].
pub const ENV_CONFIG: &str = "REPOWATCH_CONFIG";
pub const ENV_BOT_TOKEN: &str = "BOT_TOKEN";
pub const ENV_GITHUB_TOKEN: &str = "GITHUB_TOKEN";
pub const ENV_VAULT_KEY: &str = "REPOWATCH_VAULT_KEY";
pub const ENV_OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Whole-process configuration. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub telegram: TelegramSection,
    pub github: GithubConfig,
    pub monitor: MonitorConfig,
    pub storage: StorageSection,
    pub telemetry: TelemetrySection,
}

#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct TelegramSection {
    pub bot_token: Option<String>,
}

impl std::fmt::Debug for TelegramSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSection")
            .field("bot_token", &self.bot_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub trackings_path: PathBuf,
    pub vault_path: PathBuf,
    /// Base64-encoded 32-byte key. Without it credentials are kept in memory only.
    pub vault_key: Option<String>,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            trackings_path: PathBuf::from("data/trackings.json"),
            vault_path: PathBuf::from("data/vault.json"),
            vault_key: None,
        }
    }
}

impl std::fmt::Debug for StorageSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageSection")
            .field("trackings_path", &self.trackings_path)
            .field("vault_path", &self.vault_path)
            .field("vault_key", &self.vault_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TelemetrySection {
    pub log_format: LogFormat,
    pub otlp_endpoint: Option<String>,
}

impl AppConfig {
    /// Loads configuration from `explicit`, `REPOWATCH_CONFIG`, or
    /// `repowatch.toml`, then applies environment overrides and validates.
    ///
    /// An explicitly named file must exist; the default file may be absent.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let env = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        let named = explicit
            .map(Path::to_path_buf)
            .or_else(|| env(ENV_CONFIG).map(PathBuf::from));

        let mut config = match named {
            Some(path) => Self::from_file(&path)?,
            None => {
                let path = Path::new(DEFAULT_CONFIG_PATH);
                if path.exists() {
                    Self::from_file(path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(env);
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse TOML")
    }

    /// Overrides secrets and the OTLP endpoint from the environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup(ENV_BOT_TOKEN) {
            self.telegram.bot_token = Some(token);
        }
        if let Some(token) = lookup(ENV_GITHUB_TOKEN) {
            self.github.token = Some(token);
        }
        if let Some(key) = lookup(ENV_VAULT_KEY) {
            self.storage.vault_key = Some(key);
        }
        if let Some(endpoint) = lookup(ENV_OTLP_ENDPOINT) {
            self.telemetry.otlp_endpoint = Some(endpoint);
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.monitor.validate().context("Invalid [monitor] section")?;
        if self.github.per_page == 0 {
            bail!("Invalid [github] section: per_page must be greater than zero");
        }
        if self.github.api_base.trim().is_empty() {
            bail!("Invalid [github] section: api_base must not be empty");
        }
        Ok(())
    }

    /// Returns the bot token, failing when none is configured.
    pub fn bot_token(&self) -> Result<&str> {
        self.telegram
            .bot_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| anyhow!("No bot token configured: set [telegram].bot_token or {ENV_BOT_TOKEN}"))
    }
}
