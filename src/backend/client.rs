use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;

use super::types::{Request, Response};

/// Issues requests against the network.
///
/// An `Err` means the transport failed (connection refused, DNS, reset).
/// Non-2xx statuses are returned as `Ok` responses.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

#[async_trait]
impl<F: Fetcher> Fetcher for Arc<F> {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    (**self).fetch(request).await
  }
}

/// HTTP client used against the real backend
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("nickberg-offline/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());

    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {} {}: {}", request.method, request.url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    Ok(Response {
      status,
      headers,
      body: body.to_vec(),
    })
  }
}
