//! The offline cache coordinator.
//!
//! Sits between dashboard pages and the backend. Every request, lifecycle
//! event and control message enters through [`Coordinator::dispatch`];
//! handlers suspend only on network fetches and storage operations.

mod control;
mod lifecycle;
mod strategy;
mod sync;

pub use control::RefreshSummary;
pub use lifecycle::{InstallReport, LifecycleState};
pub use sync::ReplayOutcome;

use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;
use url::Url;

use crate::backend::{Fetcher, HttpFetcher, Request, Response};
use crate::cache::{CacheLayer, CacheResult, CacheStorage, SqliteStorage};
use crate::config::Config;
use crate::db;
use crate::message::{ControlMessage, Notification};
use crate::notify::Clients;
use crate::queue::{PendingStore, SqlitePendingStore};

/// Events the coordinator reacts to.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
  Install,
  Activate,
  Fetch(Request),
  Message(ControlMessage),
  /// Replay the write queue now
  Sync { tag: String },
  /// Refresh cached API data in the background
  PeriodicSync { tag: String },
  /// Connectivity came back
  Online,
}

/// What handling an event produced.
#[derive(Debug)]
pub enum EventOutcome {
  Installed(InstallReport),
  Activated { deleted: Vec<String> },
  Response(CacheResult<Response>),
  Reply(Option<Notification>),
  Synced(ReplayOutcome),
  Refreshed(RefreshSummary),
  SyncRegistered,
}

/// Coordinator over injected cache storage, pending-write store and fetcher.
pub struct Coordinator<S, Q, F>
where
  S: CacheStorage + 'static,
  Q: PendingStore + 'static,
  F: Fetcher,
{
  config: Arc<Config>,
  origin: Url,
  cache: CacheLayer<S>,
  pending: Arc<Q>,
  fetcher: Arc<F>,
  clients: Clients,
  state: Arc<Mutex<LifecycleState>>,
  /// Detached revalidation tasks
  background: Arc<Mutex<Vec<JoinHandle<()>>>>,
  /// Sender of the running sync scheduler, if any
  sync_tx: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
  /// Serializes replay passes
  replay_lock: Arc<tokio::sync::Mutex<()>>,
}

impl Coordinator<SqliteStorage, SqlitePendingStore, HttpFetcher> {
  /// Coordinator over the on-disk databases in the configured data directory.
  pub fn open(config: Config) -> Result<Self> {
    let data_dir = config.data_dir()?;
    let storage = SqliteStorage::open(&data_dir.join(db::CACHE_DB))?;
    let pending = SqlitePendingStore::open(&data_dir.join(db::OFFLINE_DB))?;
    let fetcher = HttpFetcher::new()?;
    Self::new(config, storage, pending, fetcher)
  }
}

impl<S, Q, F> Coordinator<S, Q, F>
where
  S: CacheStorage + 'static,
  Q: PendingStore + 'static,
  F: Fetcher,
{
  pub fn new(config: Config, storage: S, pending: Q, fetcher: F) -> Result<Self> {
    let origin = config.backend()?;
    let config = Arc::new(config);

    Ok(Self {
      cache: CacheLayer::new(storage, Arc::clone(&config)),
      config,
      origin,
      pending: Arc::new(pending),
      fetcher: Arc::new(fetcher),
      clients: Clients::new(),
      state: Arc::new(Mutex::new(LifecycleState::Installing)),
      background: Arc::new(Mutex::new(Vec::new())),
      sync_tx: Arc::new(Mutex::new(None)),
      replay_lock: Arc::new(tokio::sync::Mutex::new(())),
    })
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn cache(&self) -> &CacheLayer<S> {
    &self.cache
  }

  pub fn pending(&self) -> &Q {
    &self.pending
  }

  /// Open a page: receive every notification broadcast from now on.
  pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
    self.clients.subscribe()
  }

  /// Route an event to its handler.
  pub async fn dispatch(&self, event: WorkerEvent) -> Result<EventOutcome> {
    match event {
      WorkerEvent::Install => Ok(EventOutcome::Installed(self.install().await?)),
      WorkerEvent::Activate => Ok(EventOutcome::Activated {
        deleted: self.activate()?,
      }),
      WorkerEvent::Fetch(request) => Ok(EventOutcome::Response(self.handle_fetch(request).await?)),
      WorkerEvent::Message(message) => Ok(EventOutcome::Reply(self.handle_message(message).await?)),
      WorkerEvent::Sync { tag } => {
        debug!(tag, "Sync event");
        Ok(EventOutcome::Synced(self.replay().await?))
      }
      WorkerEvent::PeriodicSync { tag } => {
        debug!(tag, "Periodic sync event");
        Ok(EventOutcome::Refreshed(self.background_refresh().await))
      }
      WorkerEvent::Online => {
        self.register_sync(&self.config.sync.tag);
        Ok(EventOutcome::SyncRegistered)
      }
    }
  }

  /// Resolve a backend path against the origin.
  fn url(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid path '{}': {}", path, e))
  }

  /// Run `task` detached from the response path.
  fn spawn_background<Fut>(&self, task: Fut)
  where
    Fut: Future<Output = ()> + Send + 'static,
  {
    let handle = tokio::spawn(task);
    let mut background = lock(&self.background);
    background.retain(|h| !h.is_finished());
    background.push(handle);
  }

  /// Wait for every detached background task, including ones spawned meanwhile.
  pub async fn settle(&self) {
    loop {
      let handles: Vec<JoinHandle<()>> = lock(&self.background).drain(..).collect();
      if handles.is_empty() {
        break;
      }
      for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
          debug!(error = %e, "Background task aborted");
        }
      }
    }
  }
}

impl<S, Q, F> Clone for Coordinator<S, Q, F>
where
  S: CacheStorage + 'static,
  Q: PendingStore + 'static,
  F: Fetcher,
{
  fn clone(&self) -> Self {
    Self {
      config: Arc::clone(&self.config),
      origin: self.origin.clone(),
      cache: self.cache.clone(),
      pending: Arc::clone(&self.pending),
      fetcher: Arc::clone(&self.fetcher),
      clients: self.clients.clone(),
      state: Arc::clone(&self.state),
      background: Arc::clone(&self.background),
      sync_tx: Arc::clone(&self.sync_tx),
      replay_lock: Arc::clone(&self.replay_lock),
    }
  }
}

/// Lock a mutex, recovering the data if a holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
