//! nickberg-offline: offline cache coordinator for the Nickberg dashboard.
//!
//! Intercepts dashboard requests and serves them network-first or
//! cache-first depending on their class, keeps versioned caches for static
//! assets, API responses and images, and queues writes made while offline
//! for in-order replay once the backend is reachable again.

pub mod app;
pub mod backend;
pub mod cache;
pub mod classify;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod event;
pub mod logging;
pub mod message;
pub mod notify;
pub mod offline;
pub mod queue;

pub use coordinator::Coordinator;
