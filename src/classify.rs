//! Maps intercepted requests to a fetch strategy.

use reqwest::Method;
use url::Url;

use crate::backend::{Destination, Request, RequestMode};

/// How an intercepted request is served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Network-first, cached in the api partition
  Api,
  /// Cache-first with TTL-driven refresh
  Image,
  /// Cache-first with background revalidation
  Static,
  /// Network-first with offline page fallback
  Navigation,
  /// Network-first with cache fallback
  Default,
  /// Not intercepted: non-GET or non-HTTP
  PassThrough,
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "svg", "webp", "ico"];
const STATIC_EXTENSIONS: &[&str] = &["css", "js", "json", "woff", "woff2", "ttf", "eot"];

/// Classify a request. First match wins.
pub fn classify(request: &Request, origin: &Url) -> Strategy {
  if !matches!(request.url.scheme(), "http" | "https") || request.method != Method::GET {
    return Strategy::PassThrough;
  }

  let path = request.url.path();
  if path.starts_with("/api/") {
    return Strategy::Api;
  }

  let ext = extension(path);
  let has_ext = |set: &[&str]| ext.as_deref().is_some_and(|e| set.contains(&e));

  if has_ext(IMAGE_EXTENSIONS) || request.destination == Destination::Image {
    return Strategy::Image;
  }

  if has_ext(STATIC_EXTENSIONS) || request.url.origin() != origin.origin() {
    return Strategy::Static;
  }

  if request.mode == RequestMode::Navigate {
    return Strategy::Navigation;
  }

  Strategy::Default
}

/// Lowercased extension of the last path segment.
fn extension(path: &str) -> Option<String> {
  let segment = path.rsplit('/').next()?;
  let (stem, ext) = segment.rsplit_once('.')?;
  if stem.is_empty() && ext.is_empty() {
    return None;
  }
  Some(ext.to_ascii_lowercase())
}
