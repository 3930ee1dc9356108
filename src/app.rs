//! Hosts the coordinator as a long-running worker speaking JSON lines.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::backend::{Destination, Fetcher, Request, RequestMode};
use crate::cache::CacheStorage;
use crate::coordinator::{Coordinator, EventOutcome, WorkerEvent};
use crate::event::{period, Event, EventHandler};
use crate::message::ControlMessage;
use crate::queue::PendingStore;

/// Tag of the periodic API refresh
const REFRESH_TAG: &str = "refresh-data";

/// A fetch issued by a page over the input channel
#[derive(Debug, Deserialize)]
struct FetchCommand {
  url: String,
  #[serde(default)]
  method: Option<String>,
  #[serde(default)]
  mode: RequestMode,
  #[serde(default)]
  destination: Destination,
  #[serde(default)]
  body: Option<serde_json::Value>,
}

/// Main worker state
pub struct App<S, Q, F>
where
  S: CacheStorage + 'static,
  Q: PendingStore + 'static,
  F: Fetcher,
{
  coordinator: Coordinator<S, Q, F>,
  /// Result of the last connectivity probe
  online: bool,
  /// Whether to quit
  should_quit: bool,
}

impl<S, Q, F> App<S, Q, F>
where
  S: CacheStorage + 'static,
  Q: PendingStore + 'static,
  F: Fetcher,
{
  pub fn new(coordinator: Coordinator<S, Q, F>) -> Self {
    Self {
      coordinator,
      online: true,
      should_quit: false,
    }
  }

  pub async fn run(&mut self) -> Result<()> {
    let deleted = self.coordinator.resume().await?;
    emit(&json!({ "type": "ACTIVATED", "deleted": deleted }));

    let scheduler = self.coordinator.spawn_sync_scheduler();
    // Writes left over from a previous session
    if self.coordinator.pending().count()? > 0 {
      self.coordinator.register_sync(&self.coordinator.config().sync.tag);
    }

    let sync = &self.coordinator.config().sync;
    let mut events = EventHandler::new(
      period(sync.periodic_refresh_secs),
      period(sync.health_check_secs),
    );
    let mut notifications = self.coordinator.subscribe();

    info!("Worker running");

    // Main loop
    while !self.should_quit {
      tokio::select! {
        event = events.next() => match event {
          Some(event) => self.handle_event(event).await,
          None => self.should_quit = true,
        },
        Ok(notification) = notifications.recv() => emit(&notification),
      }
    }

    self.coordinator.settle().await;
    self.coordinator.stop_sync_scheduler();
    if let Err(e) = scheduler.await {
      warn!(error = %e, "Sync scheduler ended abnormally");
    }

    info!("Worker stopped");
    Ok(())
  }

  async fn handle_event(&mut self, event: Event) {
    match event {
      Event::Input(line) => {
        if line.trim().is_empty() {
          return;
        }
        if let Err(e) = self.handle_input(&line).await {
          warn!(error = %e, "Failed to handle page input");
          emit(&json!({ "type": "ERROR", "message": e.to_string() }));
        }
      }
      Event::InputClosed => self.should_quit = true,
      Event::Refresh => {
        let tag = REFRESH_TAG.to_string();
        if let Err(e) = self.coordinator.dispatch(WorkerEvent::PeriodicSync { tag }).await {
          warn!(error = %e, "Periodic refresh failed");
        }
      }
      Event::HealthCheck => {
        let online = self.coordinator.probe_online().await;
        if online && !self.online {
          info!("Backend reachable again");
          if let Err(e) = self.coordinator.dispatch(WorkerEvent::Online).await {
            warn!(error = %e, "Failed to register sync");
          }
        } else if !online && self.online {
          warn!("Backend unreachable");
        }
        self.online = online;
      }
    }
  }

  async fn handle_input(&self, line: &str) -> Result<()> {
    let value: serde_json::Value =
      serde_json::from_str(line).map_err(|e| eyre!("Invalid JSON: {}", e))?;

    let event = if value.get("type").and_then(|t| t.as_str()) == Some("FETCH") {
      let command: FetchCommand =
        serde_json::from_value(value).map_err(|e| eyre!("Invalid FETCH: {}", e))?;
      WorkerEvent::Fetch(self.build_request(command)?)
    } else {
      let message: ControlMessage =
        serde_json::from_value(value).map_err(|e| eyre!("Unknown message: {}", e))?;
      WorkerEvent::Message(message)
    };

    match self.coordinator.dispatch(event).await? {
      EventOutcome::Response(result) => emit(&json!({
        "type": "RESPONSE",
        "status": result.data.status,
        "source": result.source,
        "cachedAt": result.cached_at,
        "headers": result.data.headers,
        "body": result.data.text(),
      })),
      EventOutcome::Reply(Some(reply)) => emit(&reply),
      _ => {}
    }
    Ok(())
  }

  fn build_request(&self, command: FetchCommand) -> Result<Request> {
    let url = resolve(&self.coordinator.config().backend()?, &command.url)?;
    let method = match command.method {
      Some(m) => Method::from_bytes(m.to_ascii_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method '{}': {}", m, e))?,
      None => Method::GET,
    };

    let mut request = match command.body {
      Some(body) => Request::json(method, url, body.to_string()),
      None => {
        let mut request = Request::get(url);
        request.method = method;
        request
      }
    };
    request.mode = command.mode;
    request.destination = command.destination;
    Ok(request)
  }
}

/// Absolute URL, or a path resolved against the backend origin.
pub fn resolve(origin: &url::Url, target: &str) -> Result<url::Url> {
  match url::Url::parse(target) {
    Ok(url) => Ok(url),
    Err(url::ParseError::RelativeUrlWithoutBase) => origin
      .join(target)
      .map_err(|e| eyre!("Invalid path '{}': {}", target, e)),
    Err(e) => Err(eyre!("Invalid URL '{}': {}", target, e)),
  }
}

/// Write one JSON line to the page side.
fn emit<T: serde::Serialize>(value: &T) {
  match serde_json::to_string(value) {
    Ok(line) => println!("{}", line),
    Err(e) => warn!(error = %e, "Failed to serialize output"),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::HttpFetcher;
  use crate::cache::SqliteStorage;
  use crate::config::Config;
  use crate::queue::SqlitePendingStore;

  fn app() -> App<SqliteStorage, SqlitePendingStore, HttpFetcher> {
    let coordinator = Coordinator::new(
      Config::default(),
      SqliteStorage::open_in_memory().unwrap(),
      SqlitePendingStore::open_in_memory().unwrap(),
      HttpFetcher::new().unwrap(),
    )
    .unwrap();
    App::new(coordinator)
  }

  fn request(line: serde_json::Value) -> Request {
    let command: FetchCommand = serde_json::from_value(line).unwrap();
    app().build_request(command).unwrap()
  }

  #[test]
  fn test_fetch_line_defaults_to_plain_get() {
    let request = request(json!({ "type": "FETCH", "url": "/api/stats" }));
    assert_eq!(request.method, Method::GET);
    assert_eq!(request.url.as_str(), "http://localhost:5000/api/stats");
    assert_eq!(request.mode, RequestMode::Cors);
    assert_eq!(request.destination, Destination::Empty);
    assert!(request.body.is_none());
  }

  #[test]
  fn test_fetch_line_with_body_becomes_json_write() {
    let request = request(json!({
      "type": "FETCH",
      "url": "/api/watchlist",
      "method": "post",
      "body": { "ticker": "NVDA", "action": "add" },
    }));
    assert_eq!(request.method, Method::POST);
    assert_eq!(
      request.headers.get("content-type").map(String::as_str),
      Some("application/json")
    );
    let body: serde_json::Value = serde_json::from_slice(request.body.as_deref().unwrap()).unwrap();
    assert_eq!(body, json!({ "ticker": "NVDA", "action": "add" }));
  }

  #[test]
  fn test_fetch_line_carries_mode_and_destination() {
    let request = request(json!({
      "type": "FETCH",
      "url": "https://cdn.example.com/logo.webp",
      "mode": "no-cors",
      "destination": "image",
    }));
    assert_eq!(request.url.host_str(), Some("cdn.example.com"));
    assert_eq!(request.mode, RequestMode::NoCors);
    assert_eq!(request.destination, Destination::Image);

    let navigation = self::request(json!({ "type": "FETCH", "url": "/alerts", "mode": "navigate" }));
    assert_eq!(navigation.mode, RequestMode::Navigate);
  }

  #[test]
  fn test_fetch_line_rejects_bad_method() {
    let command: FetchCommand =
      serde_json::from_value(json!({ "url": "/api/stats", "method": "GE T" })).unwrap();
    assert!(app().build_request(command).is_err());
  }

  #[test]
  fn test_resolve_paths_and_urls() {
    let origin = url::Url::parse("http://localhost:5000").unwrap();
    assert_eq!(
      resolve(&origin, "/api/stats").unwrap().as_str(),
      "http://localhost:5000/api/stats"
    );
    assert_eq!(
      resolve(&origin, "https://cdn.example.com/a.js").unwrap().as_str(),
      "https://cdn.example.com/a.js"
    );
  }
}
