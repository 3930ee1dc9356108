//! Core types for the response caches.

use chrono::{DateTime, Duration, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use url::Url;

use crate::backend::Response;

/// Header carrying the time a stored response was cached
pub const CACHED_AT_HEADER: &str = "x-cached-at";

/// Logical cache namespaces. Entries never cross partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
  Static,
  Api,
  Images,
}

impl Partition {
  pub const ALL: [Partition; 3] = [Partition::Static, Partition::Api, Partition::Images];

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Static => "static",
      Self::Api => "api",
      Self::Images => "images",
    }
  }
}

/// Storage key for a request identity (method + URL).
///
/// SHA256 of `"{METHOD} {url}"` for stable, fixed-length keys.
pub fn cache_key(method: &Method, url: &Url) -> String {
  let mut hasher = Sha256::new();
  hasher.update(method.as_str().as_bytes());
  hasher.update(b" ");
  hasher.update(url.as_str().as_bytes());
  hex::encode(hasher.finalize())
}

/// A stored response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  pub url: String,
  pub status: u16,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
  pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
  /// Capture a network response, stamping it with `cached_at`.
  pub fn from_response(url: &Url, response: &Response, cached_at: DateTime<Utc>) -> Self {
    let mut headers = response.headers.clone();
    headers.insert(CACHED_AT_HEADER.to_string(), cached_at.to_rfc3339());
    Self {
      url: url.to_string(),
      status: response.status,
      headers,
      body: response.body.clone(),
      cached_at,
    }
  }

  pub fn age(&self, now: DateTime<Utc>) -> Duration {
    now - self.cached_at
  }

  pub fn into_response(self) -> Response {
    Response {
      status: self.status,
      headers: self.headers,
      body: self.body,
    }
  }
}

/// A strategy's answer together with its provenance.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  pub data: T,
  pub source: CacheSource,
  /// Set whenever `data` came out of a partition
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self::new(data, CacheSource::Network, None)
  }

  /// Served from a partition while the network was not consulted first.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>, is_stale: bool) -> Self {
    let source = match is_stale {
      true => CacheSource::CacheStale,
      false => CacheSource::CacheFresh,
    };
    Self::new(data, source, Some(cached_at))
  }

  /// Served from a partition because the network fetch failed.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self::new(data, CacheSource::Offline, Some(cached_at))
  }

  /// Built locally: offline page, placeholder, 503 body or queued receipt.
  pub fn generated(data: T) -> Self {
    Self::new(data, CacheSource::Generated, None)
  }

  fn new(data: T, source: CacheSource, cached_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source,
      cached_at,
    }
  }
}

/// Provenance of a served response, reported to pages as `source`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheSource {
  Network,
  /// Cache-first hit within the partition TTL
  CacheFresh,
  /// Cache-first hit past the partition TTL
  CacheStale,
  /// Network failed; fell back to a stored copy
  Offline,
  Generated,
}
