//! Volatile cache backend kept in process memory.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use color_eyre::{eyre::eyre, Result};
use tracing::debug;

use crate::model::{DataModel, DataObject, Payload, Space};

use super::traits::CacheStore;

#[derive(Debug, Default)]
struct MemoryState {
  user_spaces: HashMap<String, Vec<String>>,
  spaces: HashMap<String, Space>,
  user_payloads: HashMap<String, Vec<String>>,
  payloads: HashMap<String, Payload>,
  payload_spaces: HashMap<String, String>,
  data_objects: HashMap<String, Vec<DataObject>>,
}

impl MemoryState {
  fn put_space(&mut self, space: &Space, user: &str) {
    let ids = self.user_spaces.entry(user.to_string()).or_default();
    if !ids.iter().any(|id| id == &space.id) {
      ids.push(space.id.clone());
    }
    self.spaces.insert(space.id.clone(), space.normalized());
  }

  fn remove_payload(&mut self, payload_id: &str) {
    self.payloads.remove(payload_id);
    self.payload_spaces.remove(payload_id);
    for ids in self.user_payloads.values_mut() {
      ids.retain(|id| id != payload_id);
    }
    self.user_payloads.retain(|_, ids| !ids.is_empty());
  }

  fn remove_data_object(&mut self, object_id: &str) {
    for objects in self.data_objects.values_mut() {
      objects.retain(|o| o.id != object_id);
    }
  }
}

/// In-memory [`CacheStore`]. Nothing survives a restart.
///
/// All state sits behind one mutex, so every operation is a single
/// critical section.
#[derive(Debug, Default)]
pub struct MemoryStore {
  state: Mutex<MemoryState>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
    self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CacheStore for MemoryStore {
  fn backend_name(&self) -> &'static str {
    "memory"
  }

  fn save_space(&self, space: &Space, user: &str) -> Result<()> {
    space.validate()?;
    self.lock()?.put_space(space, user);
    Ok(())
  }

  fn save_spaces(&self, spaces: &[Space], user: &str) -> Result<()> {
    for space in spaces {
      space.validate()?;
    }
    let mut state = self.lock()?;
    for space in spaces {
      state.put_space(space, user);
    }
    Ok(())
  }

  fn space_ids_for_user(&self, user: &str) -> Result<Vec<String>> {
    Ok(self.lock()?.user_spaces.get(user).cloned().unwrap_or_default())
  }

  fn cached_spaces_for_user(&self, user: &str) -> Result<Vec<Space>> {
    let state = self.lock()?;
    let spaces: Vec<Space> = state
      .user_spaces
      .get(user)
      .map(|ids| {
        ids
          .iter()
          .filter_map(|id| state.spaces.get(id).cloned())
          .collect()
      })
      .unwrap_or_default();
    Ok(spaces)
  }

  fn is_space_cached(&self, space_id: &str) -> Result<bool> {
    Ok(self.lock()?.spaces.contains_key(space_id))
  }

  fn update_cached_space(&self, space: &Space) -> Result<()> {
    space.validate()?;
    let mut state = self.lock()?;
    match state.spaces.get_mut(&space.id) {
      Some(cached) => *cached = space.normalized(),
      None => debug!(space_id = %space.id, "Update for a space that is not cached"),
    }
    Ok(())
  }

  fn delete_cached_space(&self, space_id: &str) -> Result<()> {
    let mut state = self.lock()?;
    for ids in state.user_spaces.values_mut() {
      ids.retain(|id| id != space_id);
    }
    state.user_spaces.retain(|_, ids| !ids.is_empty());
    state.spaces.remove(space_id);
    Ok(())
  }

  fn delete_cached_spaces_for_user(&self, user: &str) -> Result<()> {
    let mut state = self.lock()?;
    let Some(ids) = state.user_spaces.remove(user) else {
      return Ok(());
    };

    let still_referenced: HashSet<&String> = state.user_spaces.values().flatten().collect();
    let orphaned: Vec<String> = ids
      .into_iter()
      .filter(|id| !still_referenced.contains(id))
      .collect();

    for id in orphaned {
      state.spaces.remove(&id);
    }
    Ok(())
  }

  fn save_payload_to_send(
    &self,
    user: &str,
    payload_id: &str,
    space_id: &str,
    payload: &Payload,
  ) -> Result<()> {
    let mut state = self.lock()?;
    state.remove_payload(payload_id);
    state
      .user_payloads
      .entry(user.to_string())
      .or_default()
      .push(payload_id.to_string());
    state.payloads.insert(payload_id.to_string(), payload.clone());
    state
      .payload_spaces
      .insert(payload_id.to_string(), space_id.to_string());
    Ok(())
  }

  fn payloads_to_send(&self, user: &str) -> Result<HashMap<String, Payload>> {
    let state = self.lock()?;
    let payloads: HashMap<String, Payload> = state
      .user_payloads
      .get(user)
      .map(|ids| {
        ids
          .iter()
          .filter_map(|id| state.payloads.get(id).map(|p| (id.clone(), p.clone())))
          .collect()
      })
      .unwrap_or_default();
    Ok(payloads)
  }

  fn space_for_payload(&self, payload_id: &str) -> Result<Option<String>> {
    Ok(self.lock()?.payload_spaces.get(payload_id).cloned())
  }

  fn delete_payload_to_send(&self, payload_id: &str) -> Result<()> {
    self.lock()?.remove_payload(payload_id);
    Ok(())
  }

  fn clear_send_cache(&self, user: &str) -> Result<()> {
    let mut state = self.lock()?;
    if let Some(ids) = state.user_payloads.remove(user) {
      for id in ids {
        state.payloads.remove(&id);
        state.payload_spaces.remove(&id);
      }
    }
    Ok(())
  }

  fn is_data_object_cached(&self, object_id: &str) -> Result<bool> {
    let state = self.lock()?;
    Ok(
      state
        .data_objects
        .values()
        .flatten()
        .any(|o| o.id == object_id),
    )
  }

  fn save_data_object(&self, space_id: &str, object: &DataObject) -> Result<()> {
    let mut state = self.lock()?;
    state.remove_data_object(&object.id);
    state
      .data_objects
      .entry(space_id.to_string())
      .or_default()
      .push(object.clone());
    Ok(())
  }

  fn cached_data_objects(&self, space_id: &str) -> Result<Vec<DataObject>> {
    Ok(
      self
        .lock()?
        .data_objects
        .get(space_id)
        .cloned()
        .unwrap_or_default(),
    )
  }

  fn delete_cached_data_objects_for_space(&self, space_id: &str) -> Result<()> {
    self.lock()?.data_objects.remove(space_id);
    Ok(())
  }

  fn update_cached_data_objects(&self, supported: &HashSet<DataModel>) -> Result<()> {
    let mut state = self.lock()?;
    for (space_id, objects) in state.data_objects.iter_mut() {
      let before = objects.len();
      objects.retain(|o| o.is_supported_by(supported));
      if objects.len() != before {
        debug!(space_id = %space_id, pruned = before - objects.len(), "Pruned data objects");
      }
    }
    Ok(())
  }

  fn clear_data_cache(&self) -> Result<()> {
    let mut state = self.lock()?;
    state.user_payloads.clear();
    state.payloads.clear();
    state.payload_spaces.clear();
    state.data_objects.clear();
    Ok(())
  }

  fn clear_spaces_cache(&self) -> Result<()> {
    let mut state = self.lock()?;
    state.spaces.clear();
    state.user_spaces.clear();
    Ok(())
  }

  fn clear_saved_data_objects(&self) -> Result<()> {
    self.lock()?.data_objects.clear();
    Ok(())
  }

  fn shutdown(&self) -> Result<()> {
    Ok(())
  }
}
