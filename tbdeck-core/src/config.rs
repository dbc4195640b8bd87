use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::manager::ManagerOptions;

/// Where and how to reach the server
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Base URL of the notebook server, e.g. http://127.0.0.1:8888/
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API token, sent as `Authorization: token <token>`
    #[serde(default)]
    pub token: Option<String>,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            request_timeout_ms: default_request_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8888/".into()
}
fn default_request_timeout() -> u64 {
    10_000
}
fn default_poll_interval() -> u64 {
    10_000
}

/// Root configuration file structure
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TbdeckConfig {
    #[serde(default)]
    pub server: ServerConfig,

    /// How often the running list is refreshed, in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Reload interval in seconds passed to new instances
    #[serde(default)]
    pub reload_interval: Option<u64>,

    /// Write logs here while the TUI owns the terminal
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for TbdeckConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            poll_interval_ms: default_poll_interval(),
            reload_interval: None,
            log_file: None,
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
    Invalid { field: &'static str, reason: String },
    NotFound { path: PathBuf },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO error: {}", e),
            Self::Yaml(e) => write!(f, "YAML parse error: {}", e),
            Self::Invalid { field, reason } => write!(f, "invalid '{}': {}", field, reason),
            Self::NotFound { path } => write!(f, "config file not found: {}", path.display()),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(e: serde_yaml::Error) -> Self {
        ConfigError::Yaml(e)
    }
}

const CONFIG_NAMES: [&str; 4] = ["tbdeck.yml", "tbdeck.yaml", ".tbdeck.yml", ".tbdeck.yaml"];

impl TbdeckConfig {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a string (useful for testing)
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        // An empty file is a valid config with every default
        let config: TbdeckConfig = if content.trim().is_empty() {
            TbdeckConfig::default()
        } else {
            serde_yaml::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Find the config file for `start_dir`.
    ///
    /// `TBDECK_CONFIG` wins and must exist. Otherwise the directory and its
    /// parents are searched; no file at all yields the defaults and no path.
    pub fn discover(start_dir: &Path) -> Result<(Option<PathBuf>, Self), ConfigError> {
        if let Ok(env_path) = std::env::var("TBDECK_CONFIG") {
            let path = PathBuf::from(env_path);
            let config = Self::load(&path)?;
            return Ok((Some(path), config));
        }

        let mut dir = Some(start_dir);
        while let Some(current) = dir {
            for name in &CONFIG_NAMES {
                let path = current.join(name);
                if path.is_file() {
                    let config = Self::load(&path)?;
                    return Ok((Some(path), config));
                }
            }
            dir = current.parent();
        }

        Ok((None, Self::default()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_base_url(&self.server.base_url)?;

        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "poll_interval_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.server.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "server.request_timeout_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.reload_interval == Some(0) {
            return Err(ConfigError::Invalid {
                field: "reload_interval",
                reason: "must be greater than zero when set".into(),
            });
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }

    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            poll_interval: self.poll_interval(),
        }
    }
}

fn validate_base_url(raw: &str) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        field: "server.base_url",
        reason,
    };
    let url = Url::parse(raw).map_err(|e| invalid(format!("{:?} is not a valid URL: {}", raw, e)))?;
    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("{:?} is not an http(s) URL", raw)));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid(format!("{:?} has no host", raw)));
    }
    Ok(())
}
