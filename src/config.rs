use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{SqliteStorage, DEFAULT_TTL};
use crate::fetch::RetryPolicy;

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
  pub retry: RetryConfig,
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
  /// Retries after the first attempt
  pub max_retries: u32,
  /// Backoff before the second attempt, doubled for each further one
  pub base_delay_ms: u64,
  /// Budget for a single attempt
  pub timeout_ms: u64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    let policy = RetryPolicy::default();
    Self {
      max_retries: policy.max_retries,
      base_delay_ms: duration_millis(policy.base_delay),
      timeout_ms: duration_millis(policy.timeout),
    }
  }
}

impl RetryConfig {
  pub fn policy(&self) -> RetryPolicy {
    RetryPolicy::new(
      self.max_retries,
      Duration::from_millis(self.base_delay_ms),
      Duration::from_millis(self.timeout_ms),
    )
  }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
  /// TTL for entries written without an explicit one
  pub ttl_ms: u64,
  /// Keep entries across runs in SQLite; memory only when false
  pub persistent: bool,
  /// Database location (default: $XDG_DATA_HOME/resfetch/cache.db)
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl_ms: duration_millis(DEFAULT_TTL),
      persistent: true,
      path: None,
    }
  }
}

impl CacheConfig {
  pub fn ttl(&self) -> Duration {
    Duration::from_millis(self.ttl_ms)
  }

  /// Database path, falling back to the default location.
  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.path {
      Some(path) => Ok(path.clone()),
      None => SqliteStorage::default_path(),
    }
  }
}

fn duration_millis(duration: Duration) -> u64 {
  u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided (must exist)
  /// 2. ./resfetch.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/resfetch/config.yaml
  ///
  /// Without any file the defaults are used.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("resfetch.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("resfetch").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  /// Parse YAML; missing sections and fields take their defaults.
  pub fn parse(contents: &str) -> Result<Self> {
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }

    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_match_policy_defaults() {
    let config = Config::default();
    assert_eq!(config.retry.max_retries, 2);
    assert_eq!(config.retry.base_delay_ms, 500);
    assert_eq!(config.retry.timeout_ms, 5000);
    assert_eq!(config.cache.ttl(), DEFAULT_TTL);
    assert!(config.cache.persistent);
  }

  #[test]
  fn test_partial_yaml_keeps_defaults() {
    let config = Config::parse(
      r#"
retry:
  max_retries: 4
cache:
  ttl_ms: 180000
  persistent: false
"#,
    )
    .unwrap();

    assert_eq!(config.retry.max_retries, 4);
    assert_eq!(config.retry.timeout_ms, 5000);
    assert_eq!(config.cache.ttl(), Duration::from_secs(180));
    assert!(!config.cache.persistent);
    assert_eq!(config.cache.path, None);
  }

  #[test]
  fn test_empty_file_is_default() {
    assert_eq!(Config::parse("").unwrap(), Config::default());
  }

  #[test]
  fn test_unknown_types_are_rejected() {
    assert!(Config::parse("retry:\n  max_retries: lots\n").is_err());
  }

  #[test]
  fn test_policy_from_config() {
    let policy = RetryConfig {
      max_retries: 1,
      base_delay_ms: 450,
      timeout_ms: 5500,
    }
    .policy();

    assert_eq!(policy.max_retries, 1);
    assert_eq!(policy.backoff_delay(1), Duration::from_millis(900));
    assert_eq!(policy.timeout, Duration::from_millis(5500));
  }

  #[test]
  fn test_explicit_missing_path_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(Config::load(Some(&dir.path().join("nope.yaml"))).is_err());
  }

  #[test]
  fn test_load_explicit_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("resfetch.yaml");
    std::fs::write(&path, "cache:\n  path: /tmp/cache.db\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(
      config.cache.database_path().unwrap(),
      PathBuf::from("/tmp/cache.db")
    );
  }
}
