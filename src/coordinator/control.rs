//! Control messages from pages and API refreshes.

use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use tracing::{debug, info};

use super::Coordinator;
use crate::backend::{Endpoint, Fetcher};
use crate::cache::{CacheStorage, Partition};
use crate::message::{CacheStatus, ControlMessage, Notification};
use crate::queue::{NewPendingWrite, PendingStore};

/// Result of re-fetching the known API endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
  pub refreshed: usize,
  pub failed: usize,
}

impl<S, Q, F> Coordinator<S, Q, F>
where
  S: CacheStorage + 'static,
  Q: PendingStore + 'static,
  F: Fetcher,
{
  /// Handle a control message, returning the reply for the sender if any.
  pub async fn handle_message(&self, message: ControlMessage) -> Result<Option<Notification>> {
    debug!(?message, "Control message");

    match message {
      ControlMessage::SkipWaiting => {
        self.skip_waiting()?;
        Ok(None)
      }
      ControlMessage::ClearCache => {
        let deleted = self.cache.clear_namespace()?;
        info!(count = deleted.len(), "Cleared caches");
        Ok(Some(Notification::CacheCleared { deleted }))
      }
      ControlMessage::GetCacheStatus => Ok(Some(Notification::CacheStatus {
        payload: self.cache_status()?,
      })),
      ControlMessage::ForceRefresh => {
        self.cache.clear_partition(Partition::Api)?;
        let summary = self.refresh_api().await;
        Ok(Some(Notification::RefreshComplete {
          refreshed: summary.refreshed,
          failed: summary.failed,
        }))
      }
      ControlMessage::QueueWatchlistUpdate { payload } => {
        let body = serde_json::to_string(&payload)
          .map_err(|e| eyre!("Failed to serialize watchlist update: {}", e))?;
        let id = self.queue_write(NewPendingWrite {
          path: Endpoint::Watchlist.path(),
          method: "POST".to_string(),
          body,
        })?;
        Ok(Some(Notification::UpdateQueued { id }))
      }
    }
  }

  /// Entry counts of the current partitions and the write queue.
  pub fn cache_status(&self) -> Result<CacheStatus> {
    Ok(CacheStatus::new(
      &self.config.version,
      self.cache.counts()?,
      self.pending.count()?,
    ))
  }

  /// Re-fetch and store every known API endpoint.
  pub async fn refresh_api(&self) -> RefreshSummary {
    let mut summary = RefreshSummary::default();
    for path in &self.config.precache.api_endpoints {
      if self.precache_one(Partition::Api, path).await {
        summary.refreshed += 1;
      } else {
        summary.failed += 1;
      }
    }
    summary
  }

  /// Periodic refresh of cached API data.
  pub async fn background_refresh(&self) -> RefreshSummary {
    let summary = self.refresh_api().await;
    info!(refreshed = summary.refreshed, failed = summary.failed, "Background refresh");
    self
      .clients
      .broadcast(Notification::BackgroundRefreshComplete {
        refreshed: summary.refreshed,
        failed: summary.failed,
      });
    summary
  }
}
