//! Offline cache of the MIRROR pub/sub SDK.
//!
//! The cache keeps the spaces a user belongs to, payloads that still have to
//! be published and data objects received from spaces, so a client can work
//! while the server is unreachable.
//!
//! ```no_run
//! use mirror_cache::cache::CacheLayer;
//! use mirror_cache::config::DatabaseConfig;
//!
//! # fn main() -> color_eyre::Result<()> {
//! let cache = CacheLayer::open(&DatabaseConfig::embedded_default())?;
//! let spaces = cache.cached_spaces_for_user("alice@mirror-demo.eu");
//! # let _ = spaces;
//! mirror_cache::shutdown::run_global();
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod logging;
pub mod model;
pub mod shutdown;

pub use cache::{CacheLayer, CacheStore, MemoryStore, SqlStore};
pub use config::{DatabaseConfig, DatabaseType};
pub use shutdown::ShutdownCoordinator;
