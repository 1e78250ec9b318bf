//! Offline cache for spaces, queued payloads and received data objects.
//!
//! Two backends implement [`CacheStore`]:
//! - [`SqlStore`] keeps the cache in SQLite, PostgreSQL or MySQL
//! - [`MemoryStore`] keeps it in process memory and loses it on exit
//!
//! [`CacheLayer`] picks one from a [`DatabaseConfig`](crate::config::DatabaseConfig)
//! and turns backend failures into logged, empty answers.

mod layer;
mod memory;
pub mod sql;
mod traits;

pub use layer::{global, init, CacheLayer};
pub use memory::MemoryStore;
pub use sql::SqlStore;
pub use traits::CacheStore;
