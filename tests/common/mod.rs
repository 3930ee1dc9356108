//! Shared fixtures: a scripted backend and a coordinator over in-memory stores.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use tokio::sync::broadcast;
use url::Url;

use nickberg_offline::backend::{Fetcher, Request, Response};
use nickberg_offline::cache::SqliteStorage;
use nickberg_offline::config::{Config, PrecacheConfig, SyncConfig};
use nickberg_offline::message::Notification;
use nickberg_offline::queue::SqlitePendingStore;
use nickberg_offline::Coordinator;

pub const ORIGIN: &str = "http://localhost:5000";

pub type TestCoordinator = Coordinator<SqliteStorage, SqlitePendingStore, Arc<ScriptedFetcher>>;

/// A request the backend saw.
#[derive(Debug, Clone)]
pub struct Call {
  pub method: Method,
  pub url: String,
  pub body: Option<String>,
}

/// Backend double with an online switch and per-route responses.
pub struct ScriptedFetcher {
  online: AtomicBool,
  routes: Mutex<HashMap<(Method, String), Response>>,
  /// Writes whose body contains the pattern get the given status
  rejections: Mutex<Vec<(String, u16)>>,
  calls: Mutex<Vec<Call>>,
}

impl ScriptedFetcher {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      online: AtomicBool::new(true),
      routes: Mutex::new(HashMap::new()),
      rejections: Mutex::new(Vec::new()),
      calls: Mutex::new(Vec::new()),
    })
  }

  pub fn respond(&self, path: &str, status: u16, body: &str) {
    self.respond_to(Method::GET, path, status, body);
  }

  pub fn respond_to(&self, method: Method, path: &str, status: u16, body: &str) {
    let response = Response::new(status, body).with_header("content-type", "application/json");
    self
      .routes
      .lock()
      .unwrap()
      .insert((method, url(path).to_string()), response);
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  pub fn reject_body_containing(&self, pattern: &str, status: u16) {
    self
      .rejections
      .lock()
      .unwrap()
      .push((pattern.to_string(), status));
  }

  pub fn clear_rejections(&self) {
    self.rejections.lock().unwrap().clear();
  }

  pub fn calls(&self) -> Vec<Call> {
    self.calls.lock().unwrap().clone()
  }

  pub fn calls_to(&self, method: Method, path: &str) -> Vec<Call> {
    let target = url(path).to_string();
    self
      .calls()
      .into_iter()
      .filter(|c| c.method == method && c.url == target)
      .collect()
  }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let body = request
      .body
      .as_ref()
      .map(|b| String::from_utf8_lossy(b).into_owned());

    self.calls.lock().unwrap().push(Call {
      method: request.method.clone(),
      url: request.url.to_string(),
      body: body.clone(),
    });

    if !self.online.load(Ordering::SeqCst) {
      return Err(eyre!("network unreachable: {}", request.url));
    }

    if let Some(body) = &body {
      let rejections = self.rejections.lock().unwrap();
      if let Some((_, status)) = rejections.iter().find(|(p, _)| body.contains(p.as_str())) {
        return Ok(Response::new(*status, r#"{"error":"rejected"}"#));
      }
    }

    let routes = self.routes.lock().unwrap();
    Ok(
      routes
        .get(&(request.method.clone(), request.url.to_string()))
        .cloned()
        .unwrap_or_else(|| Response::new(404, "not found")),
    )
  }
}

pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

/// Small precache lists, immediate retries.
pub fn test_config() -> Config {
  Config {
    backend_url: ORIGIN.to_string(),
    precache: PrecacheConfig {
      static_assets: vec!["/".to_string(), "/static/js/dashboard.js".to_string()],
      api_endpoints: vec!["/api/stats".to_string(), "/api/watchlist".to_string()],
      images: vec!["/static/icons/icon-192.png".to_string()],
    },
    sync: SyncConfig {
      backoff_secs: 0,
      ..SyncConfig::default()
    },
    ..Config::default()
  }
}

/// Routes for everything `test_config` pre-caches, plus the write endpoint.
pub fn serve_dashboard(fetcher: &ScriptedFetcher) {
  fetcher.respond("/", 200, "<html>dashboard</html>");
  fetcher.respond("/static/js/dashboard.js", 200, "console.log('v1')");
  fetcher.respond("/api/stats", 200, r#"{"total_articles":10}"#);
  fetcher.respond("/api/watchlist", 200, r#"[]"#);
  fetcher.respond("/static/icons/icon-192.png", 200, "PNG-v1");
  fetcher.respond("/health", 200, r#"{"status":"ok"}"#);
  fetcher.respond_to(Method::POST, "/api/watchlist", 200, r#"{"ok":true}"#);
}

pub fn coordinator(config: Config, fetcher: &Arc<ScriptedFetcher>) -> TestCoordinator {
  Coordinator::new(
    config,
    SqliteStorage::open_in_memory().unwrap(),
    SqlitePendingStore::open_in_memory().unwrap(),
    Arc::clone(fetcher),
  )
  .unwrap()
}

/// Installed and activated coordinator over a served dashboard.
pub async fn active_coordinator(fetcher: &Arc<ScriptedFetcher>) -> TestCoordinator {
  serve_dashboard(fetcher);
  let coordinator = coordinator(test_config(), fetcher);
  coordinator.install().await.unwrap();
  coordinator.activate().unwrap();
  coordinator
}

/// Everything broadcast so far.
pub fn drain(rx: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
  let mut out = Vec::new();
  while let Ok(notification) = rx.try_recv() {
    out.push(notification);
  }
  out
}
