use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::backend::Endpoint;
use crate::cache::Partition;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin of the dashboard backend; requests to other hosts are cross-origin
  pub backend_url: String,
  /// Prefix shared by every cache this application owns
  pub namespace: String,
  /// Cache version suffix; bump to invalidate every partition on activation
  pub version: String,
  /// Where the cache and pending-write databases live
  pub data_dir: Option<PathBuf>,
  /// Activate immediately after install instead of waiting
  pub skip_waiting: bool,
  /// Route served for failed navigations when the exact page is not cached
  pub offline_fallback: String,
  /// Paths whose failed mutating writes are queued for replay
  #[serde(deserialize_with = "deserialize_paths")]
  pub queueable_paths: Vec<String>,
  pub ttl: TtlConfig,
  pub precache: PrecacheConfig,
  pub sync: SyncConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      backend_url: "http://localhost:5000".to_string(),
      namespace: "nickberg".to_string(),
      version: "v2".to_string(),
      data_dir: None,
      skip_waiting: false,
      offline_fallback: "/".to_string(),
      queueable_paths: vec!["/api/watchlist".to_string()],
      ttl: TtlConfig::default(),
      precache: PrecacheConfig::default(),
      sync: SyncConfig::default(),
    }
  }
}

/// Normalize queueable paths so they always start with a slash.
fn deserialize_paths<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(
    v.into_iter()
      .map(|p| {
        if p.starts_with('/') {
          p
        } else {
          format!("/{}", p)
        }
      })
      .collect(),
  )
}

/// Staleness windows per partition, in seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TtlConfig {
  pub api_secs: i64,
  pub static_secs: i64,
  pub image_secs: i64,
  /// Images older than this are evicted instead of served
  pub image_ceiling_secs: i64,
}

impl Default for TtlConfig {
  fn default() -> Self {
    Self {
      api_secs: 5 * 60,
      static_secs: 7 * 24 * 60 * 60,
      image_secs: 30 * 24 * 60 * 60,
      image_ceiling_secs: 90 * 24 * 60 * 60,
    }
  }
}

impl TtlConfig {
  pub fn for_partition(&self, partition: Partition) -> Duration {
    match partition {
      Partition::Static => Duration::seconds(self.static_secs),
      Partition::Api => Duration::seconds(self.api_secs),
      Partition::Images => Duration::seconds(self.image_secs),
    }
  }

  pub fn image_ceiling(&self) -> Duration {
    Duration::seconds(self.image_ceiling_secs)
  }
}

/// Resources fetched and stored during install.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PrecacheConfig {
  pub static_assets: Vec<String>,
  pub api_endpoints: Vec<String>,
  pub images: Vec<String>,
}

impl Default for PrecacheConfig {
  fn default() -> Self {
    Self {
      static_assets: vec![
        "/".to_string(),
        "/static/css/dashboard.css".to_string(),
        "/static/js/dashboard.js".to_string(),
        "/static/manifest.json".to_string(),
      ],
      api_endpoints: Endpoint::precached().iter().map(Endpoint::path).collect(),
      images: vec![
        "/static/icons/icon-192.png".to_string(),
        "/static/icons/icon-512.png".to_string(),
      ],
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Tag registered for watchlist replay
  pub tag: String,
  /// Replay attempts per registration before waiting for the next trigger
  pub max_attempts: u32,
  pub backoff_secs: u64,
  pub max_backoff_secs: u64,
  /// Interval of the periodic API refresh; 0 disables it
  pub periodic_refresh_secs: u64,
  /// Interval of the connectivity probe against /health; 0 disables it
  pub health_check_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      tag: "sync-watchlist".to_string(),
      max_attempts: 3,
      backoff_secs: 5,
      max_backoff_secs: 300,
      periodic_refresh_secs: 15 * 60,
      health_check_secs: 30,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./nickberg-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/nickberg-offline/config.yaml
  ///
  /// Without any file the defaults are used. `NICKBERG_BACKEND_URL`
  /// overrides the backend origin either way.
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

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    if let Ok(url) = std::env::var("NICKBERG_BACKEND_URL") {
      config.backend_url = url;
    }

    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("nickberg-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("nickberg-offline").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    let url = url::Url::parse(&self.backend_url)
      .map_err(|e| eyre!("Invalid backend_url '{}': {}", self.backend_url, e))?;
    if !matches!(url.scheme(), "http" | "https") {
      return Err(eyre!("backend_url must be http or https: {}", self.backend_url));
    }
    if self.namespace.is_empty() || self.version.is_empty() {
      return Err(eyre!("namespace and version must not be empty"));
    }
    Ok(())
  }

  /// Parsed backend origin.
  pub fn backend(&self) -> Result<url::Url> {
    url::Url::parse(&self.backend_url)
      .map_err(|e| eyre!("Invalid backend_url '{}': {}", self.backend_url, e))
  }

  /// Directory holding the databases and logs.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("nickberg-offline"))
  }

  /// Versioned cache name for a partition, e.g. `nickberg-api-v2`.
  pub fn cache_name(&self, partition: Partition) -> String {
    format!("{}-{}-{}", self.namespace, partition.as_str(), self.version)
  }

  pub fn is_queueable(&self, path: &str) -> bool {
    self.queueable_paths.iter().any(|p| p == path)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_apply_to_empty_document() {
    let config = Config::from_yaml("{}").unwrap();
    assert_eq!(config.namespace, "nickberg");
    assert_eq!(config.ttl.api_secs, 300);
    assert_eq!(config.ttl.static_secs, 604_800);
    assert_eq!(config.ttl.image_secs, 2_592_000);
    assert_eq!(config.sync.max_attempts, 3);
  }

  #[test]
  fn test_partial_override() {
    let config = Config::from_yaml(
      "version: v7\nttl:\n  api_secs: 60\nqueueable_paths: [api/watchlist, /api/alerts]\n",
    )
    .unwrap();
    assert_eq!(config.version, "v7");
    assert_eq!(config.ttl.api_secs, 60);
    assert_eq!(config.ttl.static_secs, 604_800);
    assert!(config.is_queueable("/api/watchlist"));
    assert!(config.is_queueable("/api/alerts"));
  }

  #[test]
  fn test_cache_names_are_versioned() {
    let config = Config::default();
    assert_eq!(config.cache_name(Partition::Static), "nickberg-static-v2");
    assert_eq!(config.cache_name(Partition::Api), "nickberg-api-v2");
    assert_eq!(config.cache_name(Partition::Images), "nickberg-images-v2");
  }

  #[test]
  fn test_rejects_non_http_backend() {
    let config = Config {
      backend_url: "ftp://example.com".to_string(),
      ..Config::default()
    };
    assert!(config.validate().is_err());
  }
}
