//! Broadcast channel from the coordinator to every open page.

use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::message::Notification;

/// Notifications buffered per page before the oldest are dropped
const CHANNEL_CAPACITY: usize = 64;

/// Handle to all open pages.
///
/// Delivery is best-effort and fire-and-forget: with no page listening the
/// notification is dropped, and a page that falls behind loses the oldest.
#[derive(Clone)]
pub struct Clients {
  tx: broadcast::Sender<Notification>,
}

impl Clients {
  pub fn new() -> Self {
    let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
    Self { tx }
  }

  /// Register a page.
  pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
    self.tx.subscribe()
  }

  pub fn page_count(&self) -> usize {
    self.tx.receiver_count()
  }

  pub fn broadcast(&self, notification: Notification) {
    let kind = notification.kind();
    match self.tx.send(notification) {
      Ok(pages) => debug!(kind, pages, "Broadcast notification"),
      Err(_) => trace!(kind, "No open pages"),
    }
  }
}

impl Default for Clients {
  fn default() -> Self {
    Self::new()
  }
}
