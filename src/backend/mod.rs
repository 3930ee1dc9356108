//! Backend collaborator: request/response types and the network fetcher.

pub mod client;
pub mod endpoints;
pub mod types;

pub use client::{Fetcher, HttpFetcher};
pub use endpoints::Endpoint;
pub use types::{Destination, Request, RequestMode, Response};
