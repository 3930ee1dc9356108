use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde_json::json;
use std::path::PathBuf;

use nickberg_offline::app::{resolve, App};
use nickberg_offline::backend::{Destination, Endpoint, Request};
use nickberg_offline::cache::CacheResult;
use nickberg_offline::config::Config;
use nickberg_offline::coordinator::LifecycleState;
use nickberg_offline::message::ControlMessage;
use nickberg_offline::queue::NewPendingWrite;
use nickberg_offline::{logging, Coordinator};

#[derive(Parser, Debug)]
#[command(name = "nickberg-offline")]
#[command(about = "Offline cache coordinator for the Nickberg dashboard")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/nickberg-offline/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Debug logging
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Host the coordinator; page messages are JSON lines on stdin
  Run,
  /// Fetch a URL or backend path through the coordinator
  Fetch {
    target: String,
    /// Treat as a full-page navigation
    #[arg(long)]
    navigate: bool,
    /// Treat as an image request
    #[arg(long)]
    image: bool,
  },
  /// Fetch price quotes through the coordinator
  Prices {
    #[arg(required = true)]
    tickers: Vec<String>,
  },
  /// Pre-cache the current version and activate it
  Install,
  /// Activate the current version, deleting caches of other versions
  Activate,
  /// Show cache entry counts and pending writes
  Status,
  /// Delete every cache of this application
  Clear,
  /// Re-fetch all cached API endpoints
  Refresh,
  /// Replay pending writes now
  Sync,
  /// Queue a write for replay
  Queue {
    #[arg(long, default_value = "/api/watchlist")]
    path: String,
    #[arg(long, default_value = "POST")]
    method: String,
    /// JSON body
    #[arg(long)]
    body: String,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.data_dir()?, args.verbose)?;

  let coordinator = Coordinator::open(config)?;

  match args.command {
    Command::Run => {
      let mut app = App::new(coordinator);
      app.run().await?;
    }
    Command::Fetch {
      target,
      navigate,
      image,
    } => {
      coordinator.resume().await?;
      let url = resolve(&coordinator.config().backend()?, &target)?;
      let request = if navigate {
        Request::navigate(url)
      } else if image {
        Request::get(url).with_destination(Destination::Image)
      } else {
        Request::get(url)
      };
      print_result(&coordinator.handle_fetch(request).await?);
      coordinator.settle().await;
    }
    Command::Prices { tickers } => {
      coordinator.resume().await?;
      let url = coordinator
        .config()
        .backend()?
        .join(&Endpoint::Prices { tickers }.path())
        .map_err(|e| eyre!("Invalid prices path: {}", e))?;
      print_result(&coordinator.handle_fetch(Request::get(url)).await?);
    }
    Command::Install => {
      let report = coordinator.install().await?;
      coordinator.skip_waiting()?;
      let activated = coordinator.state() == LifecycleState::Active;
      print_json(&json!({ "installed": report, "activated": activated }));
    }
    Command::Activate => {
      let deleted = coordinator.resume().await?;
      print_json(&json!({ "deleted": deleted }));
    }
    Command::Status => {
      print_json(&coordinator.cache_status()?);
    }
    Command::Clear => {
      let reply = coordinator.handle_message(ControlMessage::ClearCache).await?;
      print_json(&reply);
    }
    Command::Refresh => {
      coordinator.resume().await?;
      let reply = coordinator.handle_message(ControlMessage::ForceRefresh).await?;
      print_json(&reply);
    }
    Command::Sync => {
      let outcome = coordinator.replay().await?;
      print_json(&outcome);
      if !outcome.completed {
        return Err(eyre!("{} write(s) still pending; retry later", outcome.remaining));
      }
    }
    Command::Queue { path, method, body } => {
      serde_json::from_str::<serde_json::Value>(&body)
        .map_err(|e| eyre!("Body is not valid JSON: {}", e))?;
      Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;
      let id = coordinator.queue_write(NewPendingWrite {
        path,
        method: method.to_ascii_uppercase(),
        body,
      })?;
      print_json(&json!({ "queued": id }));
    }
  }

  Ok(())
}

fn print_result(result: &CacheResult<nickberg_offline::backend::Response>) {
  eprintln!(
    "{} ({:?}{})",
    result.data.status,
    result.source,
    result
      .cached_at
      .map(|t| format!(", cached {}", t.to_rfc3339()))
      .unwrap_or_default()
  );
  println!("{}", result.data.text());
}

fn print_json<T: serde::Serialize>(value: &T) {
  match serde_json::to_string_pretty(value) {
    Ok(s) => println!("{}", s),
    Err(e) => eprintln!("Failed to serialize output: {}", e),
  }
}
