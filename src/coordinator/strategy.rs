//! Per-class fetch strategies.

use color_eyre::Result;
use reqwest::Method;
use std::sync::Arc;
use tracing::{debug, warn};
use url::{Position, Url};

use super::{Coordinator, LifecycleState};
use crate::backend::{Fetcher, Request, Response};
use crate::cache::{CacheEntry, CacheResult, CacheStorage, Cached, Partition};
use crate::classify::{classify, Strategy};
use crate::message::Notification;
use crate::offline;
use crate::queue::{NewPendingWrite, PendingStore};

impl<S, Q, F> Coordinator<S, Q, F>
where
  S: CacheStorage + 'static,
  Q: PendingStore + 'static,
  F: Fetcher,
{
  /// Serve an intercepted request.
  ///
  /// Only an active coordinator applies strategies; otherwise the request
  /// goes straight to the network.
  pub async fn handle_fetch(&self, request: Request) -> Result<CacheResult<Response>> {
    if self.state() != LifecycleState::Active {
      debug!(url = %request.url, state = ?self.state(), "Not controlling; passing through");
      let response = self.fetcher.fetch(&request).await?;
      return Ok(CacheResult::from_network(response));
    }

    let strategy = classify(&request, &self.origin);
    debug!(url = %request.url, ?strategy, "Intercepted request");

    match strategy {
      Strategy::Api => self.network_first_api(request).await,
      Strategy::Image => self.cache_first_image(request).await,
      Strategy::Static => self.cache_first_static(request).await,
      Strategy::Navigation => self.network_first_navigation(request).await,
      Strategy::Default => self.network_first_default(request).await,
      Strategy::PassThrough => self.pass_through(request).await,
    }
  }

  /// Network-first; falls back to the api partition, then to a 503 JSON error.
  async fn network_first_api(&self, request: Request) -> Result<CacheResult<Response>> {
    match self.fetcher.fetch(&request).await {
      Ok(response) => {
        if let Some(entry) = self.store_fresh(Partition::Api, &request, &response) {
          self.clients.broadcast(Notification::DataUpdated {
            url: request.url.to_string(),
            timestamp: entry.cached_at,
          });
        }
        Ok(CacheResult::from_network(response))
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "API fetch failed; trying cache");

        match self.cached(Partition::Api, &request.url) {
          Some(cached) => {
            let cached_at = cached.entry.cached_at;
            self.clients.broadcast(Notification::ServingCached {
              url: request.url.to_string(),
              cached_at,
              age_secs: cached.age.num_seconds(),
              is_stale: cached.is_stale,
            });
            Ok(CacheResult::offline(cached.entry.into_response(), cached_at))
          }
          None => Ok(CacheResult::generated(offline::api_unavailable(
            request.url.path(),
          ))),
        }
      }
    }
  }

  /// Cache-first; a hit is served immediately and revalidated in the background.
  async fn cache_first_static(&self, request: Request) -> Result<CacheResult<Response>> {
    if let Some(cached) = self.cached(Partition::Static, &request.url) {
      let cached_at = cached.entry.cached_at;
      self.revalidate(Partition::Static, request);
      return Ok(CacheResult::from_cache(
        cached.entry.into_response(),
        cached_at,
        cached.is_stale,
      ));
    }

    let response = self.fetcher.fetch(&request).await?;
    self.store_fresh(Partition::Static, &request, &response);
    Ok(CacheResult::from_network(response))
  }

  /// Cache-first; expired hits are still served but refreshed in the background.
  /// Entries past the hard ceiling are evicted and treated as a miss.
  async fn cache_first_image(&self, request: Request) -> Result<CacheResult<Response>> {
    if let Some(cached) = self.cached(Partition::Images, &request.url) {
      if cached.age > self.cache.image_ceiling() {
        debug!(url = %request.url, age_secs = cached.age.num_seconds(), "Image past eviction ceiling");
        if let Err(e) = self.cache.evict(Partition::Images, &request.url) {
          warn!(url = %request.url, error = %e, "Failed to evict expired image");
        }
      } else {
        let cached_at = cached.entry.cached_at;
        if cached.is_stale {
          self.revalidate(Partition::Images, request);
        }
        return Ok(CacheResult::from_cache(
          cached.entry.into_response(),
          cached_at,
          cached.is_stale,
        ));
      }
    }

    match self.fetcher.fetch(&request).await {
      Ok(response) => {
        self.store_fresh(Partition::Images, &request, &response);
        Ok(CacheResult::from_network(response))
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "Image unavailable");
        Ok(CacheResult::generated(offline::image_placeholder()))
      }
    }
  }

  /// Network-first page load; falls back to the cached page, the offline
  /// route, then a generated offline page.
  async fn network_first_navigation(&self, request: Request) -> Result<CacheResult<Response>> {
    let error = match self.fetcher.fetch(&request).await {
      Ok(response) => {
        self.store_fresh(Partition::Static, &request, &response);
        return Ok(CacheResult::from_network(response));
      }
      Err(e) => e,
    };
    debug!(url = %request.url, error = %error, "Navigation failed; trying cache");

    if let Some(cached) = self.cached(Partition::Static, &request.url) {
      let cached_at = cached.entry.cached_at;
      return Ok(CacheResult::offline(cached.entry.into_response(), cached_at));
    }

    let fallback = self.url(&self.config.offline_fallback)?;
    if let Some(cached) = self.cached(Partition::Static, &fallback) {
      let cached_at = cached.entry.cached_at;
      return Ok(CacheResult::offline(cached.entry.into_response(), cached_at));
    }

    Ok(CacheResult::generated(offline::offline_page(
      &request.url[Position::BeforePath..],
    )))
  }

  /// Network-first with a lookup across every current partition.
  async fn network_first_default(&self, request: Request) -> Result<CacheResult<Response>> {
    match self.fetcher.fetch(&request).await {
      Ok(response) => {
        self.store_fresh(Partition::Static, &request, &response);
        Ok(CacheResult::from_network(response))
      }
      Err(e) => {
        let found = self.cache.lookup_any(&request.url).unwrap_or_else(|lookup_err| {
          warn!(url = %request.url, error = %lookup_err, "Cache lookup failed; treating as miss");
          None
        });
        match found {
          Some((_, cached)) => {
            let cached_at = cached.entry.cached_at;
            Ok(CacheResult::offline(cached.entry.into_response(), cached_at))
          }
          None => Err(e),
        }
      }
    }
  }

  /// Uncached. A failed JSON write to a queueable path is stored for replay.
  async fn pass_through(&self, request: Request) -> Result<CacheResult<Response>> {
    let error = match self.fetcher.fetch(&request).await {
      Ok(response) => return Ok(CacheResult::from_network(response)),
      Err(e) => e,
    };
    if !self.is_queueable(&request) {
      return Err(error);
    }
    let Some(body) = replay_body(&request) else {
      warn!(url = %request.url, "Write body is not JSON; not queueing");
      return Err(error);
    };

    warn!(url = %request.url, method = %request.method, error = %error, "Write failed; queueing for replay");
    let id = self.queue_write(NewPendingWrite {
      path: request.url[Position::BeforePath..].to_string(),
      method: request.method.to_string(),
      body,
    })?;
    self.clients.broadcast(Notification::UpdateQueued { id });
    Ok(CacheResult::generated(offline::queued(id)))
  }

  /// Store a 2xx response. A storage failure is logged and the response is
  /// still served.
  fn store_fresh(
    &self,
    partition: Partition,
    request: &Request,
    response: &Response,
  ) -> Option<CacheEntry> {
    if !response.is_ok() {
      return None;
    }
    match self.cache.store(partition, &request.url, response) {
      Ok(entry) => Some(entry),
      Err(e) => {
        warn!(url = %request.url, partition = partition.as_str(), error = %e, "Failed to cache response");
        None
      }
    }
  }

  /// Look up `url`; a storage failure counts as a miss.
  fn cached(&self, partition: Partition, url: &Url) -> Option<Cached> {
    self.cache.lookup(partition, url).unwrap_or_else(|e| {
      warn!(%url, partition = partition.as_str(), error = %e, "Cache lookup failed; treating as miss");
      None
    })
  }

  fn is_queueable(&self, request: &Request) -> bool {
    [Method::POST, Method::PUT, Method::DELETE].contains(&request.method)
      && request.url.origin() == self.origin.origin()
      && self.config.is_queueable(request.url.path())
  }

  /// Re-fetch `request` detached and overwrite the cached copy on success.
  fn revalidate(&self, partition: Partition, request: Request) {
    let cache = self.cache.clone();
    let fetcher = Arc::clone(&self.fetcher);

    self.spawn_background(async move {
      match fetcher.fetch(&request).await {
        Ok(response) if response.is_ok() => {
          if let Err(e) = cache.store(partition, &request.url, &response) {
            warn!(url = %request.url, error = %e, "Failed to store revalidated response");
          } else {
            debug!(url = %request.url, partition = partition.as_str(), "Revalidated");
          }
        }
        Ok(response) => {
          debug!(url = %request.url, status = response.status, "Revalidation not ok; keeping cached copy");
        }
        Err(e) => {
          debug!(url = %request.url, error = %e, "Revalidation failed");
        }
      }
    });
  }
}

/// Body to persist for replay. Replays are always sent as JSON, so only an
/// empty body or a JSON document qualifies.
fn replay_body(request: &Request) -> Option<String> {
  if let Some(content_type) = request.headers.get("content-type") {
    if !content_type.contains("json") {
      return None;
    }
  }
  match &request.body {
    None => Some(String::new()),
    Some(bytes) => {
      let body = String::from_utf8(bytes.clone()).ok()?;
      serde_json::from_str::<serde_json::Value>(&body).ok()?;
      Some(body)
    }
  }
}
