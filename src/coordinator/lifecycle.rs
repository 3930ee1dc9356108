//! Install / activate state machine.

use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use tracing::{info, warn};

use super::{lock, Coordinator};
use crate::backend::{Fetcher, Request};
use crate::cache::{CacheStorage, Partition};
use crate::queue::PendingStore;

/// Lifecycle of one coordinator version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
  /// Pre-caching the current version
  Installing,
  /// Installed, not yet controlling requests
  Waiting,
  /// Serving requests through the strategies
  Active,
  /// Superseded; everything passes through
  Redundant,
}

impl LifecycleState {
  fn can_become(self, next: LifecycleState) -> bool {
    use LifecycleState::*;
    matches!(
      (self, next),
      (Installing, Waiting)
        | (Waiting, Active)
        | (Installing, Redundant)
        | (Waiting, Redundant)
        | (Active, Redundant)
    )
  }
}

/// Pre-cache results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InstallReport {
  pub cached: usize,
  pub failed: usize,
}

impl<S, Q, F> Coordinator<S, Q, F>
where
  S: CacheStorage + 'static,
  Q: PendingStore + 'static,
  F: Fetcher,
{
  pub fn state(&self) -> LifecycleState {
    *lock(&self.state)
  }

  fn transition(&self, next: LifecycleState) -> Result<()> {
    let mut state = lock(&self.state);
    if !state.can_become(next) {
      return Err(eyre!(
        "Invalid lifecycle transition {:?} -> {:?}",
        *state,
        next
      ));
    }
    info!(from = ?*state, to = ?next, "Lifecycle transition");
    *state = next;
    Ok(())
  }

  /// Pre-populate all three partitions.
  ///
  /// A failed asset is logged and skipped; it never aborts the install.
  pub async fn install(&self) -> Result<InstallReport> {
    let report = self.precache_all().await?;
    if self.config.skip_waiting {
      self.activate()?;
    }
    Ok(report)
  }

  /// Install without honoring `skip_waiting`; always ends in Waiting.
  async fn precache_all(&self) -> Result<InstallReport> {
    if self.state() != LifecycleState::Installing {
      return Err(eyre!("Cannot install from state {:?}", self.state()));
    }

    self.cache.open_partitions()?;

    let precache = &self.config.precache;
    let mut report = InstallReport::default();
    for (partition, paths) in [
      (Partition::Static, &precache.static_assets),
      (Partition::Api, &precache.api_endpoints),
      (Partition::Images, &precache.images),
    ] {
      for path in paths {
        if self.precache_one(partition, path).await {
          report.cached += 1;
        } else {
          report.failed += 1;
        }
      }
    }

    info!(
      version = %self.config.version,
      cached = report.cached,
      failed = report.failed,
      "Install complete"
    );
    self.transition(LifecycleState::Waiting)?;
    Ok(report)
  }

  /// Fetch `path` and store it in `partition`. Returns whether it was stored.
  pub(super) async fn precache_one(&self, partition: Partition, path: &str) -> bool {
    let url = match self.url(path) {
      Ok(url) => url,
      Err(e) => {
        warn!(path, error = %e, "Skipping pre-cache");
        return false;
      }
    };

    match self.fetcher.fetch(&Request::get(url.clone())).await {
      Ok(response) if response.is_ok() => match self.cache.store(partition, &url, &response) {
        Ok(_) => true,
        Err(e) => {
          warn!(%url, error = %e, "Failed to store pre-cached response");
          false
        }
      },
      Ok(response) => {
        warn!(%url, status = response.status, "Pre-cache returned non-success");
        false
      }
      Err(e) => {
        warn!(%url, error = %e, "Pre-cache fetch failed");
        false
      }
    }
  }

  /// Take control: delete caches of other versions, then become active.
  ///
  /// Returns the names of the deleted caches.
  pub fn activate(&self) -> Result<Vec<String>> {
    if self.state() != LifecycleState::Waiting {
      return Err(eyre!("Cannot activate from state {:?}", self.state()));
    }

    let deleted = self.cache.sweep_stale_versions()?;
    for name in &deleted {
      info!(cache = %name, "Deleted stale cache");
    }

    self.transition(LifecycleState::Active)?;
    Ok(deleted)
  }

  /// Activate a waiting coordinator. Returns whether it was waiting.
  pub fn skip_waiting(&self) -> Result<bool> {
    if self.state() == LifecycleState::Waiting {
      self.activate()?;
      return Ok(true);
    }
    Ok(false)
  }

  /// Become active over existing state, installing first if this version
  /// has never been installed on this storage.
  ///
  /// Returns the names of the caches deleted on activation.
  pub async fn resume(&self) -> Result<Vec<String>> {
    if self.cache.is_installed()? {
      info!(version = %self.config.version, "Resuming existing installation");
      self.transition(LifecycleState::Waiting)?;
    } else {
      self.precache_all().await?;
    }
    self.activate()
  }

  /// Hand over to a newer version. Fetches pass through from now on.
  pub fn retire(&self) -> Result<()> {
    self.stop_sync_scheduler();
    self.transition(LifecycleState::Redundant)
  }
}
