//! Durable queue of writes made while the backend was unreachable.

mod store;

pub use store::{NewPendingWrite, PendingStore, PendingWrite, SqlitePendingStore};
