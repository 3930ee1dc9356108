//! Messages exchanged between dashboard pages and the coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::PartitionCounts;

/// Control messages sent by a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
  /// Activate a waiting coordinator now
  SkipWaiting,
  ClearCache,
  GetCacheStatus,
  /// Drop the api partition and re-fetch every known endpoint
  ForceRefresh,
  /// Queue a watchlist change made while offline
  QueueWatchlistUpdate { payload: serde_json::Value },
}

/// Snapshot of the caches and the write queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatus {
  pub version: String,
  #[serde(rename = "static")]
  pub static_assets: usize,
  pub api: usize,
  pub images: usize,
  pub pending: usize,
}

impl CacheStatus {
  pub fn new(version: &str, counts: PartitionCounts, pending: usize) -> Self {
    Self {
      version: version.to_string(),
      static_assets: counts.static_assets,
      api: counts.api,
      images: counts.images,
      pending,
    }
  }
}

/// Events delivered to pages, either broadcast or as a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Notification {
  /// Fresh API data was stored
  #[serde(rename_all = "camelCase")]
  DataUpdated { url: String, timestamp: DateTime<Utc> },
  /// The network failed and a cached API response was served
  #[serde(rename_all = "camelCase")]
  ServingCached {
    url: String,
    cached_at: DateTime<Utc>,
    age_secs: i64,
    is_stale: bool,
  },
  #[serde(rename_all = "camelCase")]
  WatchlistSynced { timestamp: DateTime<Utc> },
  #[serde(rename_all = "camelCase")]
  SyncComplete { replayed: usize },
  #[serde(rename_all = "camelCase")]
  BackgroundRefreshComplete { refreshed: usize, failed: usize },
  #[serde(rename_all = "camelCase")]
  CacheCleared { deleted: Vec<String> },
  CacheStatus { payload: CacheStatus },
  #[serde(rename_all = "camelCase")]
  RefreshComplete { refreshed: usize, failed: usize },
  #[serde(rename_all = "camelCase")]
  UpdateQueued { id: i64 },
}

impl Notification {
  pub fn kind(&self) -> &'static str {
    match self {
      Self::DataUpdated { .. } => "DATA_UPDATED",
      Self::ServingCached { .. } => "SERVING_CACHED",
      Self::WatchlistSynced { .. } => "WATCHLIST_SYNCED",
      Self::SyncComplete { .. } => "SYNC_COMPLETE",
      Self::BackgroundRefreshComplete { .. } => "BACKGROUND_REFRESH_COMPLETE",
      Self::CacheCleared { .. } => "CACHE_CLEARED",
      Self::CacheStatus { .. } => "CACHE_STATUS",
      Self::RefreshComplete { .. } => "REFRESH_COMPLETE",
      Self::UpdateQueued { .. } => "UPDATE_QUEUED",
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_control_message_wire_format() {
    let message: ControlMessage = serde_json::from_value(json!({
      "type": "QUEUE_WATCHLIST_UPDATE",
      "payload": {"ticker": "TSLA", "action": "add"}
    }))
    .unwrap();
    assert_eq!(
      message,
      ControlMessage::QueueWatchlistUpdate {
        payload: json!({"ticker": "TSLA", "action": "add"})
      }
    );

    let skip: ControlMessage = serde_json::from_value(json!({"type": "SKIP_WAITING"})).unwrap();
    assert_eq!(skip, ControlMessage::SkipWaiting);
  }

  #[test]
  fn test_serving_cached_uses_page_field_names() {
    let notification = Notification::ServingCached {
      url: "/api/stats".to_string(),
      cached_at: Utc::now(),
      age_secs: 12,
      is_stale: false,
    };
    let value = serde_json::to_value(&notification).unwrap();
    assert_eq!(value["type"], "SERVING_CACHED");
    assert_eq!(value["isStale"], false);
    assert_eq!(value["ageSecs"], 12);
    assert_eq!(notification.kind(), "SERVING_CACHED");
  }

  #[test]
  fn test_cache_status_payload_shape() {
    let status = Notification::CacheStatus {
      payload: CacheStatus {
        version: "v2".to_string(),
        static_assets: 4,
        api: 7,
        images: 2,
        pending: 1,
      },
    };
    let value = serde_json::to_value(&status).unwrap();
    assert_eq!(value["type"], "CACHE_STATUS");
    assert_eq!(value["payload"]["static"], 4);
    assert_eq!(value["payload"]["pending"], 1);
  }

  #[test]
  fn test_unknown_message_is_rejected() {
    assert!(serde_json::from_value::<ControlMessage>(json!({"type": "REBOOT"})).is_err());
  }
}
