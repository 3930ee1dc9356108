//! Responses synthesized when neither the network nor the cache can answer.

use serde_json::json;

use crate::backend::Response;

/// 503 JSON body for an uncached API request.
pub fn api_unavailable(path: &str) -> Response {
  Response::json(
    503,
    &json!({
      "error": "offline",
      "message": format!("You are offline and {} has not been cached yet", path),
    }),
  )
}

/// 503 placeholder for an image that could not be fetched or served.
pub fn image_placeholder() -> Response {
  let svg = r##"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="150" viewBox="0 0 200 150"><rect width="200" height="150" fill="#1f2937"/><text x="100" y="80" fill="#9ca3af" font-family="sans-serif" font-size="14" text-anchor="middle">Image unavailable offline</text></svg>"##;
  Response::new(503, svg).with_header("content-type", "image/svg+xml")
}

/// 202 acknowledgement for a write that was queued for replay.
pub fn queued(id: i64) -> Response {
  Response::json(
    202,
    &json!({
      "queued": true,
      "id": id,
      "message": "Saved offline; it will be sent when the connection returns",
    }),
  )
}

/// Static offline page with a manual retry action.
pub fn offline_page(retry_path: &str) -> Response {
  let html = format!(
    r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>Offline - Nickberg Terminal</title>
  <style>
    body {{ background: #0f172a; color: #e2e8f0; font-family: system-ui, sans-serif; display: flex; align-items: center; justify-content: center; min-height: 100vh; margin: 0; }}
    main {{ text-align: center; max-width: 28rem; padding: 2rem; }}
    a.retry {{ display: inline-block; margin-top: 1.5rem; padding: 0.75rem 1.5rem; background: #2563eb; color: #fff; border-radius: 0.5rem; text-decoration: none; }}
  </style>
</head>
<body>
  <main>
    <h1>You're offline</h1>
    <p>The dashboard could not reach the server and this page has not been cached yet.
       Cached data will be shown again as soon as the connection returns.</p>
    <a class="retry" href="{}" onclick="window.location.reload(); return false;">Retry</a>
  </main>
</body>
</html>
"#,
    escape_attr(retry_path)
  );
  Response::html(503, html)
}

fn escape_attr(s: &str) -> String {
  s.replace('&', "&amp;")
    .replace('"', "&quot;")
    .replace('<', "&lt;")
    .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_api_unavailable_shape() {
    let response = api_unavailable("/api/stats");
    assert_eq!(response.status, 503);
    assert_eq!(response.header("content-type"), Some("application/json"));
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["error"], "offline");
    assert!(body["message"].as_str().unwrap().contains("/api/stats"));
  }

  #[test]
  fn test_offline_page_has_retry_and_escapes_path() {
    let response = offline_page("/alerts?x=\"><script>");
    assert_eq!(response.status, 503);
    let html = response.text();
    assert!(html.contains("Retry"));
    assert!(!html.contains("<script>"));
  }

  #[test]
  fn test_image_placeholder_is_svg() {
    let response = image_placeholder();
    assert_eq!(response.status, 503);
    assert_eq!(response.header("content-type"), Some("image/svg+xml"));
  }
}
