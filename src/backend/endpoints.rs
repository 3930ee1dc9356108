//! Dashboard backend endpoints the coordinator talks to on its own behalf.

/// Known backend endpoints.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
  Stats,
  Articles,
  Alerts,
  TopCompanies,
  MarketData,
  Watchlist,
  Sources,
  /// Price quotes for a set of tickers
  Prices { tickers: Vec<String> },
  /// Mention timeline for the last `hours`
  Timeline { hours: u32 },
  Health,
}

impl Endpoint {
  /// Path and query relative to the backend origin.
  pub fn path(&self) -> String {
    match self {
      Self::Stats => "/api/stats".to_string(),
      Self::Articles => "/api/articles".to_string(),
      Self::Alerts => "/api/alerts".to_string(),
      Self::TopCompanies => "/api/companies/top".to_string(),
      Self::MarketData => "/api/market-data".to_string(),
      Self::Watchlist => "/api/watchlist".to_string(),
      Self::Sources => "/api/sources".to_string(),
      Self::Prices { tickers } => format!("/api/prices?tickers={}", normalize_tickers(tickers)),
      Self::Timeline { hours } => format!("/api/timeline?hours={}", hours),
      Self::Health => "/health".to_string(),
    }
  }

  /// Endpoints pre-cached at install when the config does not say otherwise.
  pub fn precached() -> Vec<Endpoint> {
    vec![
      Self::Stats,
      Self::Articles,
      Self::Alerts,
      Self::TopCompanies,
      Self::MarketData,
      Self::Watchlist,
      Self::Sources,
      Self::Timeline { hours: 24 },
    ]
  }
}

/// Uppercase, de-duplicate and sort tickers so equivalent queries share a cache entry.
fn normalize_tickers(tickers: &[String]) -> String {
  let mut normalized: Vec<String> = tickers
    .iter()
    .map(|t| t.trim().to_uppercase())
    .filter(|t| !t.is_empty())
    .collect();
  normalized.sort();
  normalized.dedup();
  normalized.join(",")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_prices_query_is_normalized() {
    let endpoint = Endpoint::Prices {
      tickers: vec!["tsla".into(), " AAPL".into(), "TSLA".into()],
    };
    assert_eq!(endpoint.path(), "/api/prices?tickers=AAPL,TSLA");
  }

  #[test]
  fn test_timeline_path() {
    assert_eq!(
      Endpoint::Timeline { hours: 48 }.path(),
      "/api/timeline?hours=48"
    );
  }

  #[test]
  fn test_precached_are_api_paths() {
    assert!(Endpoint::precached()
      .iter()
      .all(|e| e.path().starts_with("/api/")));
  }
}
