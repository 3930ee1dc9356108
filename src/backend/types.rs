use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// What kind of resource the page asked for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
  #[default]
  Empty,
  Document,
  Image,
  Script,
  Style,
  Font,
}

/// How the request was issued
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
  #[default]
  Cors,
  /// Full-page load
  Navigate,
  NoCors,
  SameOrigin,
}

/// An intercepted request
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub destination: Destination,
  pub mode: RequestMode,
  pub headers: BTreeMap<String, String>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      destination: Destination::Empty,
      mode: RequestMode::Cors,
      headers: BTreeMap::new(),
      body: None,
    }
  }

  /// A full-page navigation to `url`
  pub fn navigate(url: Url) -> Self {
    Self {
      destination: Destination::Document,
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  /// A request carrying a JSON body
  pub fn json(method: Method, url: Url, body: impl Into<Vec<u8>>) -> Self {
    let mut headers = BTreeMap::new();
    headers.insert("content-type".to_string(), "application/json".to_string());
    Self {
      method,
      headers,
      body: Some(body.into()),
      ..Self::get(url)
    }
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }
}

/// A response returned to the page, either from the network or synthesized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  /// Header names are lowercase
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: BTreeMap::new(),
      body: body.into(),
    }
  }

  pub fn json(status: u16, value: &serde_json::Value) -> Self {
    Self::new(status, value.to_string()).with_header("content-type", "application/json")
  }

  pub fn html(status: u16, html: String) -> Self {
    Self::new(status, html).with_header("content-type", "text/html; charset=utf-8")
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self
      .headers
      .insert(name.to_ascii_lowercase(), value.to_string());
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .get(&name.to_ascii_lowercase())
      .map(String::as_str)
  }

  /// 2xx status
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}
