//! Cache layer that maps partitions onto versioned named caches.

use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use reqwest::Method;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use super::storage::CacheStorage;
use super::traits::{cache_key, CacheEntry, Partition};
use crate::backend::Response;
use crate::config::Config;

/// A cache hit together with its freshness.
#[derive(Debug, Clone)]
pub struct Cached {
  pub entry: CacheEntry,
  pub age: Duration,
  /// Older than the partition's TTL
  pub is_stale: bool,
}

/// Entry counts per current partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PartitionCounts {
  #[serde(rename = "static")]
  pub static_assets: usize,
  pub api: usize,
  pub images: usize,
}

/// Cache layer that owns the versioned partition names and TTL policy.
///
/// Strategies talk to partitions; this layer resolves them to the named
/// caches of the current version.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  config: Arc<Config>,
}

impl<S: CacheStorage> CacheLayer<S> {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: S, config: Arc<Config>) -> Self {
    Self {
      storage: Arc::new(storage),
      config,
    }
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  pub fn name(&self, partition: Partition) -> String {
    self.config.cache_name(partition)
  }

  /// Check if cached data is stale based on cached_at timestamp.
  pub fn is_stale(&self, partition: Partition, cached_at: DateTime<Utc>) -> bool {
    Utc::now() - cached_at > self.config.ttl.for_partition(partition)
  }

  /// Create the three current-version caches.
  pub fn open_partitions(&self) -> Result<()> {
    for partition in Partition::ALL {
      self.storage.open_cache(&self.name(partition))?;
    }
    Ok(())
  }

  /// Whether the current version has been installed on this storage.
  pub fn is_installed(&self) -> Result<bool> {
    let names = self.storage.cache_names()?;
    Ok(
      Partition::ALL
        .iter()
        .all(|p| names.contains(&self.name(*p))),
    )
  }

  /// Store a network response under the GET identity of `url`.
  pub fn store(&self, partition: Partition, url: &Url, response: &Response) -> Result<CacheEntry> {
    let entry = CacheEntry::from_response(url, response, Utc::now());
    self.put_entry(partition, url, &entry)?;
    Ok(entry)
  }

  /// Store a prepared entry under the GET identity of `url`.
  pub fn put_entry(&self, partition: Partition, url: &Url, entry: &CacheEntry) -> Result<()> {
    let key = cache_key(&Method::GET, url);
    self.storage.put(&self.name(partition), &key, entry)?;
    debug!(partition = partition.as_str(), %url, "Stored response");
    Ok(())
  }

  /// Look up the GET identity of `url` in one partition.
  pub fn lookup(&self, partition: Partition, url: &Url) -> Result<Option<Cached>> {
    let key = cache_key(&Method::GET, url);
    let entry = self.storage.get(&self.name(partition), &key)?;

    Ok(entry.map(|entry| {
      let age = entry.age(Utc::now());
      let is_stale = age > self.config.ttl.for_partition(partition);
      Cached {
        entry,
        age,
        is_stale,
      }
    }))
  }

  /// Look up `url` across all current partitions.
  pub fn lookup_any(&self, url: &Url) -> Result<Option<(Partition, Cached)>> {
    for partition in [Partition::Api, Partition::Static, Partition::Images] {
      if let Some(cached) = self.lookup(partition, url)? {
        return Ok(Some((partition, cached)));
      }
    }
    Ok(None)
  }

  pub fn evict(&self, partition: Partition, url: &Url) -> Result<bool> {
    let key = cache_key(&Method::GET, url);
    self.storage.delete_entry(&self.name(partition), &key)
  }

  /// Drop every entry of one current partition and recreate it empty.
  pub fn clear_partition(&self, partition: Partition) -> Result<()> {
    let name = self.name(partition);
    self.storage.delete_cache(&name)?;
    self.storage.open_cache(&name)
  }

  /// Delete every cache of this namespace, any version.
  pub fn clear_namespace(&self) -> Result<Vec<String>> {
    let prefix = format!("{}-", self.config.namespace);
    let mut deleted = Vec::new();
    for name in self.storage.cache_names()? {
      if name.starts_with(&prefix) && self.storage.delete_cache(&name)? {
        deleted.push(name);
      }
    }
    Ok(deleted)
  }

  /// Delete caches of this namespace that do not belong to the current version.
  pub fn sweep_stale_versions(&self) -> Result<Vec<String>> {
    let prefix = format!("{}-", self.config.namespace);
    let current: Vec<String> = Partition::ALL.iter().map(|p| self.name(*p)).collect();

    let mut deleted = Vec::new();
    for name in self.storage.cache_names()? {
      if name.starts_with(&prefix) && !current.contains(&name) && self.storage.delete_cache(&name)? {
        deleted.push(name);
      }
    }
    Ok(deleted)
  }

  pub fn counts(&self) -> Result<PartitionCounts> {
    Ok(PartitionCounts {
      static_assets: self.storage.entry_count(&self.name(Partition::Static))?,
      api: self.storage.entry_count(&self.name(Partition::Api))?,
      images: self.storage.entry_count(&self.name(Partition::Images))?,
    })
  }

  /// Hard ceiling past which an image is evicted instead of served.
  pub fn image_ceiling(&self) -> Duration {
    self.config.ttl.image_ceiling()
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      config: Arc::clone(&self.config),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;

  fn layer(config: Config) -> CacheLayer<SqliteStorage> {
    CacheLayer::new(SqliteStorage::open_in_memory().unwrap(), Arc::new(config))
  }

  fn url(path: &str) -> Url {
    Url::parse("http://localhost:5000").unwrap().join(path).unwrap()
  }

  #[test]
  fn test_staleness_follows_partition_ttl() {
    let layer = layer(Config::default());
    let six_minutes_ago = Utc::now() - Duration::minutes(6);
    assert!(layer.is_stale(Partition::Api, six_minutes_ago));
    assert!(!layer.is_stale(Partition::Static, six_minutes_ago));
    assert!(!layer.is_stale(Partition::Images, six_minutes_ago));
  }

  #[test]
  fn test_lookup_reports_stale_entry() {
    let layer = layer(Config::default());
    let target = url("/api/stats");
    let mut entry = CacheEntry::from_response(&target, &Response::new(200, "{}"), Utc::now());
    entry.cached_at = Utc::now() - Duration::minutes(10);
    layer.put_entry(Partition::Api, &target, &entry).unwrap();

    let cached = layer.lookup(Partition::Api, &target).unwrap().unwrap();
    assert!(cached.is_stale);
    assert!(cached.age >= Duration::minutes(10));
  }

  #[test]
  fn test_sweep_keeps_current_and_foreign_caches() {
    let layer = layer(Config::default());
    let storage = layer.storage();
    for name in ["nickberg-static-v1", "nickberg-api-v1", "nickberg-static-v2", "other-app-v1"] {
      storage.open_cache(name).unwrap();
    }

    let mut deleted = layer.sweep_stale_versions().unwrap();
    deleted.sort();
    assert_eq!(deleted, vec!["nickberg-api-v1", "nickberg-static-v1"]);
    assert_eq!(
      storage.cache_names().unwrap(),
      vec!["nickberg-static-v2", "other-app-v1"]
    );
  }

  #[test]
  fn test_clear_partition_empties_only_that_partition() {
    let layer = layer(Config::default());
    layer
      .store(Partition::Api, &url("/api/stats"), &Response::new(200, "{}"))
      .unwrap();
    layer
      .store(Partition::Static, &url("/app.js"), &Response::new(200, ""))
      .unwrap();

    layer.clear_partition(Partition::Api).unwrap();
    let counts = layer.counts().unwrap();
    assert_eq!(counts.api, 0);
    assert_eq!(counts.static_assets, 1);
  }
}
