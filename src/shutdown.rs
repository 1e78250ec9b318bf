//! Exit hook that closes an embedded cache database exactly once.
//!
//! Rust has no process shutdown hooks, so hosts call [`run_global`] before
//! leaving `main`. A [`SqlStore`] that is dropped first closes itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use color_eyre::{eyre::eyre, Result};
use tracing::{debug, error};

use crate::cache::{CacheStore, SqlStore};

/// Holds the durable backend to close on exit, if any.
#[derive(Default)]
pub struct ShutdownCoordinator {
  target: Mutex<Option<Weak<SqlStore>>>,
  fired: AtomicBool,
}

impl ShutdownCoordinator {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register `store` as the backend to close.
  ///
  /// Only embedded engines are registered. A later registration replaces the
  /// earlier one, so there is never more than one hook. Returns whether the
  /// store was registered.
  pub fn register(&self, store: &Arc<SqlStore>) -> Result<bool> {
    if !store.is_embedded() {
      debug!(backend = store.backend_name(), "Networked cache needs no exit hook");
      return Ok(false);
    }
    let mut target = self
      .target
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    *target = Some(Arc::downgrade(store));
    self.fired.store(false, Ordering::SeqCst);
    Ok(true)
  }

  pub fn is_registered(&self) -> bool {
    self
      .target
      .lock()
      .map(|t| t.as_ref().is_some_and(|w| w.strong_count() > 0))
      .unwrap_or(false)
  }

  /// Close the registered backend. Runs at most once per registration.
  ///
  /// Returns whether a backend was closed.
  pub fn run(&self) -> bool {
    if self.fired.swap(true, Ordering::SeqCst) {
      return false;
    }

    let target = match self.target.lock() {
      Ok(mut target) => target.take(),
      Err(poisoned) => poisoned.into_inner().take(),
    };

    match target.and_then(|weak| weak.upgrade()) {
      Some(store) => {
        if let Err(e) = store.shutdown() {
          error!(error = %e, "Failed to shut down embedded cache database");
        }
        true
      }
      None => false,
    }
  }
}

static GLOBAL: OnceLock<ShutdownCoordinator> = OnceLock::new();

/// The process-wide coordinator.
pub fn global() -> &'static ShutdownCoordinator {
  GLOBAL.get_or_init(ShutdownCoordinator::new)
}

/// Close the embedded cache registered with the global coordinator.
pub fn run_global() -> bool {
  global().run()
}
