//! Cache facade used by the SDK handlers.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use color_eyre::{eyre::eyre, Result};
use tracing::{error, info, warn};

use crate::config::{DatabaseConfig, DatabaseType};
use crate::model::{DataModel, DataObject, Payload, Space};
use crate::shutdown;

use super::memory::MemoryStore;
use super::sql::SqlStore;
use super::traits::CacheStore;

/// Selects a backend from the configuration and shields callers from its
/// failures.
///
/// Every operation logs a failing backend call and answers with an empty
/// result, `false` or `None`. The cache is an optimization, so a broken
/// database never interrupts the SDK.
#[derive(Clone)]
pub struct CacheLayer {
  store: Arc<dyn CacheStore>,
}

impl CacheLayer {
  /// Build the backend named by `config`.
  ///
  /// A disabled database gives the volatile in-memory store. Embedded
  /// databases are registered with the global shutdown coordinator.
  pub fn open(config: &DatabaseConfig) -> Result<Self> {
    if config.db_type == DatabaseType::None {
      info!("Database caching disabled, using in-memory cache");
      return Ok(Self::memory());
    }

    let store = match SqlStore::open(config) {
      Ok(store) => Arc::new(store),
      Err(e) => {
        error!(backend = ?config.db_type, error = %e, "Failed to open cache database");
        return Err(e);
      }
    };
    shutdown::global().register(&store)?;
    info!(backend = store.backend_name(), "Opened cache database");
    Ok(Self { store })
  }

  pub fn memory() -> Self {
    Self::from_store(Arc::new(MemoryStore::new()))
  }

  pub fn from_store(store: Arc<dyn CacheStore>) -> Self {
    Self { store }
  }

  /// The backend behind this layer, with errors surfaced.
  pub fn store(&self) -> &Arc<dyn CacheStore> {
    &self.store
  }

  pub fn backend_name(&self) -> &'static str {
    self.store.backend_name()
  }

  fn or_log<T>(&self, operation: &str, key: &str, result: Result<T>, fallback: T) -> T {
    result.unwrap_or_else(|e| {
      warn!(
        backend = self.store.backend_name(),
        operation,
        key,
        error = %e,
        "Cache operation failed"
      );
      fallback
    })
  }

  pub fn save_space(&self, space: &Space, user: &str) {
    let result = self.store.save_space(space, user);
    self.or_log("save_space", &space.id, result, ())
  }

  pub fn save_spaces(&self, spaces: &[Space], user: &str) {
    let result = self.store.save_spaces(spaces, user);
    self.or_log("save_spaces", user, result, ())
  }

  pub fn space_ids_for_user(&self, user: &str) -> Vec<String> {
    let result = self.store.space_ids_for_user(user);
    self.or_log("space_ids_for_user", user, result, Vec::new())
  }

  pub fn cached_spaces_for_user(&self, user: &str) -> Vec<Space> {
    let result = self.store.cached_spaces_for_user(user);
    self.or_log("cached_spaces_for_user", user, result, Vec::new())
  }

  pub fn is_space_cached(&self, space_id: &str) -> bool {
    let result = self.store.is_space_cached(space_id);
    self.or_log("is_space_cached", space_id, result, false)
  }

  pub fn update_cached_space(&self, space: &Space) {
    let result = self.store.update_cached_space(space);
    self.or_log("update_cached_space", &space.id, result, ())
  }

  pub fn delete_cached_space(&self, space_id: &str) {
    let result = self.store.delete_cached_space(space_id);
    self.or_log("delete_cached_space", space_id, result, ())
  }

  pub fn delete_cached_spaces_for_user(&self, user: &str) {
    let result = self.store.delete_cached_spaces_for_user(user);
    self.or_log("delete_cached_spaces_for_user", user, result, ())
  }

  pub fn save_payload_to_send(
    &self,
    user: &str,
    payload_id: &str,
    space_id: &str,
    payload: &Payload,
  ) {
    let result = self
      .store
      .save_payload_to_send(user, payload_id, space_id, payload);
    self.or_log("save_payload_to_send", payload_id, result, ())
  }

  pub fn payloads_to_send(&self, user: &str) -> HashMap<String, Payload> {
    let result = self.store.payloads_to_send(user);
    self.or_log("payloads_to_send", user, result, HashMap::new())
  }

  pub fn space_for_payload(&self, payload_id: &str) -> Option<String> {
    let result = self.store.space_for_payload(payload_id);
    self.or_log("space_for_payload", payload_id, result, None)
  }

  pub fn delete_payload_to_send(&self, payload_id: &str) {
    let result = self.store.delete_payload_to_send(payload_id);
    self.or_log("delete_payload_to_send", payload_id, result, ())
  }

  pub fn clear_send_cache(&self, user: &str) {
    let result = self.store.clear_send_cache(user);
    self.or_log("clear_send_cache", user, result, ())
  }

  pub fn is_data_object_cached(&self, object_id: &str) -> bool {
    let result = self.store.is_data_object_cached(object_id);
    self.or_log("is_data_object_cached", object_id, result, false)
  }

  pub fn save_data_object(&self, space_id: &str, object: &DataObject) {
    let result = self.store.save_data_object(space_id, object);
    self.or_log("save_data_object", &object.id, result, ())
  }

  pub fn cached_data_objects(&self, space_id: &str) -> Vec<DataObject> {
    let result = self.store.cached_data_objects(space_id);
    self.or_log("cached_data_objects", space_id, result, Vec::new())
  }

  pub fn delete_cached_data_objects_for_space(&self, space_id: &str) {
    let result = self.store.delete_cached_data_objects_for_space(space_id);
    self.or_log("delete_cached_data_objects_for_space", space_id, result, ())
  }

  pub fn update_cached_data_objects(&self, supported: &HashSet<DataModel>) {
    let result = self.store.update_cached_data_objects(supported);
    self.or_log("update_cached_data_objects", "", result, ())
  }

  pub fn clear_data_cache(&self) {
    let result = self.store.clear_data_cache();
    self.or_log("clear_data_cache", "", result, ())
  }

  pub fn clear_spaces_cache(&self) {
    let result = self.store.clear_spaces_cache();
    self.or_log("clear_spaces_cache", "", result, ())
  }

  pub fn clear_saved_data_objects(&self) {
    let result = self.store.clear_saved_data_objects();
    self.or_log("clear_saved_data_objects", "", result, ())
  }

  pub fn shutdown(&self) {
    let result = self.store.shutdown();
    self.or_log("shutdown", "", result, ())
  }
}

static GLOBAL: OnceLock<CacheLayer> = OnceLock::new();

/// Install the process-wide cache. Fails if one is already installed.
pub fn init(config: &DatabaseConfig) -> Result<&'static CacheLayer> {
  if GLOBAL.get().is_some() {
    return Err(eyre!("Cache layer is already initialized"));
  }
  let layer = CacheLayer::open(config)?;
  GLOBAL
    .set(layer)
    .map_err(|_| eyre!("Cache layer is already initialized"))?;
  GLOBAL
    .get()
    .ok_or_else(|| eyre!("Cache layer is not initialized"))
}

/// The process-wide cache, if [`init`] has run.
pub fn global() -> Option<&'static CacheLayer> {
  GLOBAL.get()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{Persistence, SpaceType};

  fn space(id: &str) -> Space {
    Space::new(id, "Space", "mirror-demo.eu", SpaceType::Private, Persistence::On)
  }

  #[test]
  fn test_disabled_config_uses_memory() {
    let layer = CacheLayer::open(&DatabaseConfig::disabled()).unwrap();
    assert_eq!(layer.backend_name(), "memory");
  }

  #[test]
  fn test_unopenable_database_is_an_error() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let config = DatabaseConfig::embedded(file.path().join("nested").to_string_lossy());
    assert!(CacheLayer::open(&config).is_err());
  }

  #[test]
  fn test_failures_degrade_to_empty_results() {
    let store = Arc::new(SqlStore::open_in_memory().unwrap());
    let layer = CacheLayer::from_store(store.clone());
    layer.save_space(&space("s1"), "u1");
    assert!(layer.is_space_cached("s1"));

    store.shutdown().unwrap();
    assert!(!layer.is_space_cached("s1"));
    assert!(layer.space_ids_for_user("u1").is_empty());
    assert!(layer.cached_spaces_for_user("u1").is_empty());
    assert!(layer.payloads_to_send("u1").is_empty());
    assert_eq!(layer.space_for_payload("p1"), None);
    layer.clear_spaces_cache();
  }

  #[test]
  fn test_invalid_space_is_not_cached() {
    let layer = CacheLayer::memory();
    let mut broken = space("s1");
    broken.name = String::new();
    layer.save_space(&broken, "u1");
    assert!(!layer.is_space_cached("s1"));
  }

  #[test]
  fn test_clones_share_the_backend() {
    let layer = CacheLayer::memory();
    let other = layer.clone();
    layer.save_space(&space("s1"), "u1");
    assert_eq!(other.space_ids_for_user("u1"), vec!["s1".to_string()]);
  }

  #[test]
  fn test_embedded_config_registers_exit_hook() {
    let dir = tempfile::tempdir().unwrap();
    let layer = CacheLayer::open(&DatabaseConfig::embedded(dir.path().to_string_lossy())).unwrap();
    assert_eq!(layer.backend_name(), "sqlite");
    assert!(shutdown::global().is_registered());
  }
}
