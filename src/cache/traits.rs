//! The backend-agnostic cache contract.

use std::collections::{HashMap, HashSet};

use color_eyre::Result;

use crate::model::{DataModel, DataObject, Payload, Space};

/// Contract implemented by every cache backend.
///
/// Errors are returned as-is; [`CacheLayer`](super::CacheLayer) decides how
/// callers degrade when an operation fails. Implementations synchronize
/// internally, so one instance can be shared by every thread of the process.
pub trait CacheStore: Send + Sync {
  /// Name of the backend, for logs.
  fn backend_name(&self) -> &'static str;

  // Spaces

  /// Cache a space with its members and channels for `user`.
  ///
  /// Id, name and domain must be set. Re-saving refreshes the stored fields.
  fn save_space(&self, space: &Space, user: &str) -> Result<()>;

  /// Cache several spaces for `user` in one atomic batch.
  fn save_spaces(&self, spaces: &[Space], user: &str) -> Result<()>;

  fn space_ids_for_user(&self, user: &str) -> Result<Vec<String>>;

  fn cached_spaces_for_user(&self, user: &str) -> Result<Vec<Space>>;

  fn is_space_cached(&self, space_id: &str) -> Result<bool>;

  /// Replace the stored fields, members and channels of an already cached space.
  fn update_cached_space(&self, space: &Space) -> Result<()>;

  /// Remove a space for all users, with its members and channels.
  fn delete_cached_space(&self, space_id: &str) -> Result<()>;

  /// Drop the user's spaces; spaces still cached for another user survive.
  fn delete_cached_spaces_for_user(&self, user: &str) -> Result<()>;

  // Send queue

  fn save_payload_to_send(
    &self,
    user: &str,
    payload_id: &str,
    space_id: &str,
    payload: &Payload,
  ) -> Result<()>;

  fn payloads_to_send(&self, user: &str) -> Result<HashMap<String, Payload>>;

  fn space_for_payload(&self, payload_id: &str) -> Result<Option<String>>;

  /// Remove a single queued entry, e.g. after it was delivered.
  fn delete_payload_to_send(&self, payload_id: &str) -> Result<()>;

  fn clear_send_cache(&self, user: &str) -> Result<()>;

  // Data objects

  fn is_data_object_cached(&self, object_id: &str) -> Result<bool>;

  /// Store an object under `space_id`, replacing any object with the same id.
  fn save_data_object(&self, space_id: &str, object: &DataObject) -> Result<()>;

  fn cached_data_objects(&self, space_id: &str) -> Result<Vec<DataObject>>;

  fn delete_cached_data_objects_for_space(&self, space_id: &str) -> Result<()>;

  /// Delete every cached object whose data model is not in `supported`.
  fn update_cached_data_objects(&self, supported: &HashSet<DataModel>) -> Result<()>;

  // Bulk resets

  /// Send queue and data objects.
  fn clear_data_cache(&self) -> Result<()>;

  /// Spaces, members and channels.
  fn clear_spaces_cache(&self) -> Result<()>;

  fn clear_saved_data_objects(&self) -> Result<()>;

  /// Release the backend. Later calls on a durable backend fail.
  fn shutdown(&self) -> Result<()>;
}
