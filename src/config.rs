use anyhow::{bail, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
///
/// Read from `~/.tinychat/config.toml` (optional) with `TINYCHAT__*`
/// environment variables layered on top, e.g. `TINYCHAT__REQUEST_TIMEOUT_SECS=30`
/// or `TINYCHAT__ENDPOINTS__OPENAI=http://localhost:8080/v1`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// JSON file holding provider API keys
    pub secrets_file: PathBuf,
    pub default_temperature: f32,
    /// Completion token cap sent to every provider; unset keeps each adapter's default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Whole-call deadline for a response; 0 disables it
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Provider id -> base URL override
    pub endpoints: BTreeMap<String, String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            secrets_file: Self::config_dir().join("tinychat.json"),
            default_temperature: 1.0,
            max_tokens: None,
            request_timeout_secs: 120,
            connect_timeout_secs: 10,
            endpoints: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// `~/.tinychat`, or `./.tinychat` when no home directory is known
    pub fn config_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tinychat")
    }

    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load configuration. An explicitly given file must exist; the default one may not.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (Self::default_path(), false),
        };

        let settings = Config::builder()
            .add_source(
                File::from(path.as_path())
                    .format(FileFormat::Toml)
                    .required(required),
            )
            .add_source(
                Environment::with_prefix("TINYCHAT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path.display()))?;

        let config: AppConfig = settings
            .try_deserialize()
            .context("Invalid configuration")?;

        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Write the default configuration to `path`, refusing to overwrite
    pub fn write_default(path: &Path) -> Result<()> {
        if path.exists() {
            bail!("Configuration file already exists at {}", path.display());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(&Self::default())
            .context("Failed to serialize default configuration")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
