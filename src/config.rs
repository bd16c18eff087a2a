use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub live: LiveConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  pub base_url: String,
  /// Per-request timeout; expiry surfaces as a network error
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  /// Where the UI is sent after an unauthorized response
  #[serde(default = "default_login_path")]
  pub login_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default = "default_ttl_secs")]
  pub ttl_secs: u64,
  /// Interval for the expired-entry sweeper (0 disables it)
  #[serde(default = "default_sweep_interval_secs")]
  pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl_secs: default_ttl_secs(),
      sweep_interval_secs: default_sweep_interval_secs(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LiveConfig {
  /// Websocket endpoint for entity-change events
  pub url: Option<String>,
  /// Entity type -> view store collection, for types that don't pluralize with `s`
  #[serde(default)]
  pub collections: HashMap<String, String>,
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_login_path() -> String {
  "/login".to_string()
}

fn default_ttl_secs() -> u64 {
  300
}

fn default_sweep_interval_secs() -> u64 {
  60
}

impl ApiConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

impl CacheConfig {
  pub fn ttl(&self) -> chrono::Duration {
    let secs = i64::try_from(self.ttl_secs).unwrap_or(i64::MAX);
    chrono::Duration::seconds(secs.min(i64::MAX / 1000))
  }

  pub fn sweep_interval(&self) -> Option<Duration> {
    (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./recruitdesk.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/recruitdesk/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/recruitdesk/config.yaml\n\
                 with at least `api: {{ base_url: https://... }}`."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("recruitdesk.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("recruitdesk").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    url::Url::parse(&config.api.base_url)
      .map_err(|e| eyre!("api.base_url is not a valid URL: {}", e))?;
    Ok(config)
  }

  /// Token supplied through the environment, overriding the stored one.
  ///
  /// Checks RECRUITDESK_TOKEN.
  pub fn env_token() -> Option<String> {
    std::env::var("RECRUITDESK_TOKEN")
      .ok()
      .filter(|token| !token.trim().is_empty())
  }
}
