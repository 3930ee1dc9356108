//! Write-queue replay and the sync scheduler.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{lock, Coordinator};
use crate::backend::{Endpoint, Fetcher, Request};
use crate::cache::{CacheStorage, Partition};
use crate::message::Notification;
use crate::queue::{NewPendingWrite, PendingStore, PendingWrite};

/// Result of one replay pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReplayOutcome {
  /// Writes acknowledged and removed in this pass
  pub replayed: usize,
  /// Writes still queued
  pub remaining: usize,
  /// False when the pass stopped at a failed write; retry later
  pub completed: bool,
}

impl<S, Q, F> Coordinator<S, Q, F>
where
  S: CacheStorage + 'static,
  Q: PendingStore + 'static,
  F: Fetcher,
{
  /// Persist a write and register a sync for it.
  ///
  /// Storage failures are returned to the caller as-is.
  pub fn queue_write(&self, write: NewPendingWrite) -> Result<i64> {
    let id = self.pending.add(&write)?;
    info!(id, path = %write.path, method = %write.method, "Queued write for replay");
    self.register_sync(&self.config.sync.tag);
    Ok(id)
  }

  /// Ask the scheduler to replay. Without a running scheduler the queue
  /// waits for the next explicit or periodic trigger.
  pub fn register_sync(&self, tag: &str) {
    let registered = lock(&self.sync_tx)
      .as_ref()
      .is_some_and(|tx| tx.send(tag.to_string()).is_ok());

    if registered {
      debug!(tag, "Registered sync");
    } else {
      debug!(tag, "No sync scheduler running; replay waits for the next trigger");
    }
  }

  /// Replay pending writes in enqueue order.
  ///
  /// Each write is removed only after a 2xx acknowledgement. The first
  /// failure stops the pass so later writes never overtake it.
  pub async fn replay(&self) -> Result<ReplayOutcome> {
    let _guard = self.replay_lock.lock().await;

    let pending = self.pending.list()?;
    let total = pending.len();
    let mut replayed = 0;

    for write in &pending {
      let request = self.replay_request(write)?;
      match self.fetcher.fetch(&request).await {
        Ok(response) if response.is_ok() => {
          self.pending.remove(write.id)?;
          replayed += 1;
          debug!(id = write.id, path = %write.path, "Replayed queued write");
        }
        Ok(response) => {
          warn!(id = write.id, status = response.status, "Backend rejected queued write; keeping it");
          return Ok(ReplayOutcome {
            replayed,
            remaining: total - replayed,
            completed: false,
          });
        }
        Err(e) => {
          warn!(id = write.id, error = %e, "Replay failed; keeping write");
          return Ok(ReplayOutcome {
            replayed,
            remaining: total - replayed,
            completed: false,
          });
        }
      }
    }

    if replayed > 0 {
      self.after_drain(replayed).await?;
    }

    Ok(ReplayOutcome {
      replayed,
      remaining: 0,
      completed: true,
    })
  }

  fn replay_request(&self, write: &PendingWrite) -> Result<Request> {
    let url = self.url(&write.path)?;
    let method = Method::from_bytes(write.method.as_bytes())
      .map_err(|e| eyre!("Invalid method '{}' on queued write {}: {}", write.method, write.id, e))?;

    if write.body.is_empty() {
      let mut request = Request::get(url);
      request.method = method;
      Ok(request)
    } else {
      Ok(Request::json(method, url, write.body.as_bytes()))
    }
  }

  /// Refresh the cached watchlist and tell the pages the queue is drained.
  async fn after_drain(&self, replayed: usize) -> Result<()> {
    let url = self.url(&Endpoint::Watchlist.path())?;
    match self.fetcher.fetch(&Request::get(url.clone())).await {
      Ok(response) if response.is_ok() => {
        self.cache.store(Partition::Api, &url, &response)?;
      }
      Ok(response) => warn!(status = response.status, "Watchlist refresh after sync not ok"),
      Err(e) => warn!(error = %e, "Watchlist refresh after sync failed"),
    }

    info!(replayed, "Write queue drained");
    self.clients.broadcast(Notification::WatchlistSynced {
      timestamp: Utc::now(),
    });
    self
      .clients
      .broadcast(Notification::SyncComplete { replayed });
    Ok(())
  }

  /// Start the background scheduler that runs registered syncs.
  ///
  /// An incomplete replay is retried with exponential backoff up to
  /// `sync.max_attempts` times, then waits for the next registration.
  pub fn spawn_sync_scheduler(&self) -> JoinHandle<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    *lock(&self.sync_tx) = Some(tx);

    let this = self.clone();
    tokio::spawn(async move {
      while let Some(tag) = rx.recv().await {
        // Coalesce registrations that piled up meanwhile
        while rx.try_recv().is_ok() {}
        this.run_sync(&tag).await;
      }
      debug!("Sync scheduler stopped");
    })
  }

  pub fn stop_sync_scheduler(&self) {
    lock(&self.sync_tx).take();
  }

  async fn run_sync(&self, tag: &str) {
    let max_attempts = self.config.sync.max_attempts.max(1);

    for attempt in 0..max_attempts {
      match self.replay().await {
        Ok(outcome) if outcome.completed => {
          debug!(tag, replayed = outcome.replayed, "Sync complete");
          return;
        }
        Ok(outcome) => {
          info!(tag, attempt, remaining = outcome.remaining, "Sync incomplete");
        }
        Err(e) => {
          warn!(tag, attempt, error = %e, "Sync failed");
        }
      }

      if attempt + 1 < max_attempts {
        tokio::time::sleep(self.backoff(attempt)).await;
      }
    }

    warn!(tag, max_attempts, "Giving up until the next sync trigger");
  }

  /// Delay before retry `attempt + 1`.
  pub fn backoff(&self, attempt: u32) -> Duration {
    let sync = &self.config.sync;
    let secs = sync
      .backoff_secs
      .saturating_mul(1u64 << attempt.min(16))
      .min(sync.max_backoff_secs);
    Duration::from_secs(secs)
  }

  /// Probe `/health`; true when the backend answered with 2xx.
  pub async fn probe_online(&self) -> bool {
    let url = match self.url(&Endpoint::Health.path()) {
      Ok(url) => url,
      Err(_) => return false,
    };
    matches!(self.fetcher.fetch(&Request::get(url)).await, Ok(response) if response.is_ok())
  }
}
