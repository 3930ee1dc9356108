use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Events driving the hosted worker
#[derive(Debug)]
pub enum Event {
  /// One JSON line from the page side
  Input(String),
  /// The page side closed its end
  InputClosed,
  /// Periodic refresh of cached API data
  Refresh,
  /// Periodic connectivity probe
  HealthCheck,
}

/// Event handler that produces events from page input and tick timers
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Create a new event handler; a `None` period disables that timer
  pub fn new(refresh: Option<Duration>, health_check: Option<Duration>) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    // Spawn page input reader
    let input_tx = tx.clone();
    tokio::spawn(async move {
      let mut lines = BufReader::new(tokio::io::stdin()).lines();
      while let Ok(Some(line)) = lines.next_line().await {
        if input_tx.send(Event::Input(line)).is_err() {
          return;
        }
      }
      let _ = input_tx.send(Event::InputClosed);
    });

    if let Some(period) = refresh {
      spawn_ticker(tx.clone(), period, || Event::Refresh);
    }
    if let Some(period) = health_check {
      spawn_ticker(tx, period, || Event::HealthCheck);
    }

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}

fn spawn_ticker(tx: mpsc::UnboundedSender<Event>, period: Duration, make: fn() -> Event) {
  tokio::spawn(async move {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
      ticker.tick().await;
      if tx.send(make()).is_err() {
        break;
      }
    }
  });
}

/// Timer period from seconds; 0 disables it
pub fn period(secs: u64) -> Option<Duration> {
  (secs > 0).then(|| Duration::from_secs(secs))
}
